//! Document ingestion handler

use crate::handlers::validation_error;
use crate::AppState;
use askforge_common::{
    errors::Result,
    ingest::{IngestOutcome, IngestRequest},
};
use axum::{extract::State, Json};
use serde::Deserialize;
use validator::Validate;

fn default_intent() -> String {
    "general".to_string()
}

#[derive(Debug, Deserialize, Validate)]
pub struct IngestBody {
    #[validate(length(min = 1, max = 255))]
    pub filename: String,

    #[validate(length(max = 5000000))]
    pub content: String,

    #[serde(default = "default_intent")]
    #[validate(length(max = 64))]
    pub intent: String,

    /// JSON object, or a string containing one
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Chunk, embed and index one document
pub async fn ingest(
    State(state): State<AppState>,
    Json(body): Json<IngestBody>,
) -> Result<Json<IngestOutcome>> {
    body.validate().map_err(validation_error)?;

    let outcome = state
        .ingest
        .ingest(IngestRequest {
            filename: body.filename,
            content: body.content,
            intent: Some(body.intent),
            metadata: body.metadata,
        })
        .await?;

    Ok(Json(outcome))
}
