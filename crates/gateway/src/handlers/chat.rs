//! Conversational query handler

use crate::handlers::validation_error;
use crate::AppState;
use askforge_common::{context::QueryResponse, errors::Result};
use axum::{extract::State, Json};
use serde::Deserialize;
use validator::Validate;

fn default_session() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    #[serde(default = "default_session")]
    #[validate(length(min = 1, max = 128))]
    pub session_id: String,

    /// Maximum chunks to retrieve; defaults to `retrieval.default_limit`
    #[serde(default)]
    pub n_results: Option<i64>,
}

/// Answer a question within a session
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<QueryResponse>> {
    request.validate().map_err(validation_error)?;

    let limit = state.config.clamp_result_limit(request.n_results);
    let response = state
        .orchestrator
        .handle_query(&request.query, &request.session_id, limit)
        .await?;

    Ok(Json(response))
}
