//! Conversational retrieval core
//!
//! Turns a raw user query into an answer grounded in the document corpus:
//! - Intent classification into a structured retrieval intent
//! - Whitelisted metadata filters
//! - A three-tier retrieval cascade over the vector index
//! - Grounding in fresh context, carried-forward memory, or neither
//! - Bounded per-session conversational memory with citations

mod cascade;
mod classifier;
mod filter;
mod memory;
mod orchestrator;
mod synthesizer;
mod types;

pub use cascade::RetrievalCascade;
pub use classifier::{Classification, FallbackReason, IntentClassifier, CLASSIFIER_PREAMBLE};
pub use filter::{FilterPolicy, ALLOWED_FILTER_KEYS};
pub use memory::{MemoryStore, SessionTurn};
pub use orchestrator::Orchestrator;
pub use synthesizer::{
    condense_memory, latest_memory_citations, Synthesis, Synthesizer, MEMORY_SEPARATOR, REFUSAL,
};
pub use types::{
    truncate_chars, CascadeTier, Citation, ClassificationResult, Filter, Grounding, MemoryEntry,
    Metadata, QueryResponse, RawFilters, RetrievalResult, Scalar, GENERAL_INTENT,
};
