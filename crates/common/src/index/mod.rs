//! Vector index abstraction
//!
//! Nearest-neighbour search over chunk embeddings with optional metadata
//! predicates. Two backends:
//! - In-memory brute-force cosine search (local runs and tests)
//! - Postgres + pgvector

mod memory;
mod pgvector;

pub use memory::InMemoryIndex;
pub use pgvector::PgVectorIndex;

use crate::config::{AppConfig, IndexConfig};
use crate::context::{Citation, Metadata, Scalar};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Equality test on one metadata key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Clause {
    pub key: String,
    pub value: Scalar,
}

impl Clause {
    pub fn equals(key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        metadata
            .get(&self.key)
            .map(|v| v.matches(&self.value))
            .unwrap_or(false)
    }
}

/// Metadata predicate: a single clause, or a flat AND of clauses.
/// Nesting and OR are not representable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Clause(Clause),
    And(Vec<Clause>),
}

impl Predicate {
    /// Combine clauses: none yields no predicate, one yields that clause,
    /// more yield their conjunction.
    pub fn all(mut clauses: Vec<Clause>) -> Option<Self> {
        match clauses.len() {
            0 => None,
            1 => clauses.pop().map(Predicate::Clause),
            _ => Some(Predicate::And(clauses)),
        }
    }

    pub fn clauses(&self) -> &[Clause] {
        match self {
            Predicate::Clause(c) => std::slice::from_ref(c),
            Predicate::And(cs) => cs,
        }
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.clauses().iter().all(|c| c.matches(metadata))
    }
}

/// A chunk as written to the index.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// A chunk returned by a search, best match first.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub score: f32,
}

impl From<SearchHit> for Citation {
    fn from(hit: SearchHit) -> Self {
        Citation {
            id: hit.id,
            document: hit.document,
            metadata: hit.metadata,
        }
    }
}

/// Trait for vector index backends
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top-`limit` nearest neighbours of `query`, restricted by `predicate`
    /// when one is given.
    async fn search(
        &self,
        query: &[f32],
        predicate: Option<&Predicate>,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;

    /// Insert or replace chunks by id
    async fn upsert(&self, chunks: Vec<IndexedChunk>) -> Result<()>;

    /// Number of stored chunks
    async fn count(&self) -> Result<usize>;

    /// Backend name for logs and health output
    fn backend(&self) -> &str;
}

/// Create a vector index based on configuration
pub async fn create_index(config: &AppConfig) -> Result<Arc<dyn VectorIndex>> {
    let IndexConfig { backend, table } = &config.index;
    match backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryIndex::new())),
        "pgvector" => {
            let pool = DbPool::new(&config.database).await?;
            pool.ping().await?;
            let index = PgVectorIndex::new(pool, table, config.embedding.dimension)?;
            index.ensure_schema().await?;
            Ok(Arc::new(index))
        }
        other => Err(AppError::Configuration {
            message: format!("Unknown index backend: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(pairs: &[(&str, Scalar)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_predicate_shapes() {
        assert_eq!(Predicate::all(vec![]), None);

        let single = Predicate::all(vec![Clause::equals("intent", "hr")]).unwrap();
        assert!(matches!(single, Predicate::Clause(_)));

        let both = Predicate::all(vec![
            Clause::equals("intent", "hr"),
            Clause::equals("department", "Engineering"),
        ])
        .unwrap();
        assert_eq!(both.clauses().len(), 2);
        assert!(matches!(both, Predicate::And(_)));
    }

    #[test]
    fn test_predicate_matching() {
        let meta = metadata(&[
            ("intent", Scalar::from("hr")),
            ("department", Scalar::from("Engineering")),
            ("severity", Scalar::Integer(2)),
        ]);

        let pred = Predicate::all(vec![
            Clause::equals("intent", "hr"),
            Clause::equals("severity", 2.0),
        ])
        .unwrap();
        assert!(pred.matches(&meta));

        let miss = Predicate::all(vec![Clause::equals("department", "Sales")]).unwrap();
        assert!(!miss.matches(&meta));

        let absent = Predicate::all(vec![Clause::equals("policy_id", "P-1")]).unwrap();
        assert!(!absent.matches(&meta));
    }

    #[tokio::test]
    async fn test_unknown_backend_rejected() {
        let mut config = AppConfig::default();
        config.index.backend = "faiss".to_string();
        let err = create_index(&config).await.err().unwrap();
        assert!(matches!(err, AppError::Configuration { .. }));
    }
}
