//! Session memory handlers

use crate::AppState;
use askforge_common::context::MemoryEntry;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

/// Upper bound on entries returned by one call
const MAX_MEMORY_ENTRIES: usize = 100;

#[derive(Debug, Deserialize)]
pub struct MemoryQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct SessionMemoryResponse {
    pub session_id: String,
    pub entries: Vec<MemoryEntry>,
}

/// Recent conversation turns of a session, oldest first
pub async fn get_memory(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<MemoryQuery>,
) -> Json<SessionMemoryResponse> {
    let memory = state.orchestrator.memory();
    let limit = query
        .limit
        .unwrap_or_else(|| memory.recent_limit())
        .min(MAX_MEMORY_ENTRIES);

    let entries = memory.recent(&session_id, limit).await;
    Json(SessionMemoryResponse {
        session_id,
        entries,
    })
}
