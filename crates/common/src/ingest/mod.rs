//! Document ingestion
//!
//! extract text -> chunk -> attach metadata -> embed in batch -> upsert
//!
//! Each chunk is indexed with `intent`, `source_filename`, `source_type`
//! and `chunk_index`, followed by caller-supplied scalar extras (which win
//! on key collisions).

mod chunker;

pub use chunker::{chunk_text, extract_text, ChunkingConfig, SourceType};

use crate::context::{Metadata, Scalar, GENERAL_INTENT};
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::index::{IndexedChunk, VectorIndex};
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A document to ingest
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub filename: String,
    pub content: String,
    #[serde(default)]
    pub intent: Option<String>,
    /// Extra metadata: a JSON object, or a string holding one
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Ok,
    EmptyDocument,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    pub chunks_added: usize,
    pub ids: Vec<String>,
}

/// Turn caller extras into scalar metadata. Unparseable input is recorded
/// under `metadata_parse_error` instead of failing the upload.
pub fn parse_extra_metadata(extra: Option<&serde_json::Value>) -> Metadata {
    let parse_error = || {
        let mut meta = Metadata::new();
        meta.insert("metadata_parse_error".to_string(), Scalar::from("invalid_json"));
        meta
    };

    let object = match extra {
        None | Some(serde_json::Value::Null) => return Metadata::new(),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => return Metadata::new(),
        Some(serde_json::Value::String(s)) => match serde_json::from_str(s) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => return parse_error(),
        },
        Some(serde_json::Value::Object(map)) => map.clone(),
        Some(_) => return parse_error(),
    };

    object
        .into_iter()
        .filter_map(|(k, v)| Scalar::from_json(&v).map(|s| (k, s)))
        .collect()
}

pub struct IngestService {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chunking: ChunkingConfig,
}

impl IngestService {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            chunking: ChunkingConfig::default(),
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    #[instrument(skip(self, request), fields(filename = %request.filename))]
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome> {
        let start = Instant::now();

        let (text, source_type) = extract_text(&request.filename, request.content.as_bytes())?;
        let chunks = chunk_text(&text, &self.chunking);
        if chunks.is_empty() {
            info!("Document has no text, nothing indexed");
            return Ok(IngestOutcome {
                status: IngestStatus::EmptyDocument,
                chunks_added: 0,
                ids: Vec::new(),
            });
        }

        let intent = request
            .intent
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| GENERAL_INTENT.to_string());

        let extra = parse_extra_metadata(request.metadata.as_ref());
        if extra.contains_key("metadata_parse_error") {
            warn!("Extra metadata is not a JSON object, recorded as parse error");
        }

        let embeddings = self.embedder.embed_batch(&chunks).await?;
        if embeddings.len() != chunks.len() {
            return Err(AppError::EmbeddingError {
                message: format!(
                    "Expected {} embeddings, got {}",
                    chunks.len(),
                    embeddings.len()
                ),
            });
        }

        let indexed: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(idx, (document, embedding))| {
                let mut metadata = Metadata::new();
                metadata.insert("intent".into(), Scalar::from(intent.as_str()));
                metadata.insert("source_filename".into(), Scalar::from(request.filename.as_str()));
                metadata.insert("source_type".into(), Scalar::from(source_type.as_str()));
                metadata.insert("chunk_index".into(), Scalar::Integer(idx as i64));
                metadata.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));

                IndexedChunk {
                    id: Uuid::new_v4().to_string(),
                    document,
                    metadata,
                    embedding,
                }
            })
            .collect();

        let ids: Vec<String> = indexed.iter().map(|c| c.id.clone()).collect();
        self.index.upsert(indexed).await?;

        metrics::record_ingestion(start.elapsed().as_secs_f64(), ids.len(), source_type.as_str());
        info!(
            intent = %intent,
            source_type = source_type.as_str(),
            chunks = ids.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Document ingested"
        );

        Ok(IngestOutcome {
            status: IngestStatus::Ok,
            chunks_added: ids.len(),
            ids,
        })
    }
}
