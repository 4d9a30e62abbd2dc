//! askforge common library
//!
//! Everything the gateway needs to answer questions over a document corpus:
//! - The conversational retrieval core (classification, filters, cascade,
//!   grounding, session memory)
//! - Embedding, language model and vector index clients
//! - Document ingestion
//! - Error types, configuration, metrics

pub mod config;
pub mod context;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod metrics;

// Re-export commonly used types
pub use config::AppConfig;
pub use context::{MemoryStore, Orchestrator, QueryResponse};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use index::VectorIndex;
pub use ingest::IngestService;
pub use llm::LanguageModel;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
