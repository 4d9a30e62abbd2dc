//! In-memory vector index using brute-force cosine similarity

use super::{IndexedChunk, Predicate, SearchHit, VectorIndex};
use crate::errors::Result;
use async_trait::async_trait;
use std::cmp::Ordering;
use tokio::sync::RwLock;

/// Vector index held entirely in process memory
#[derive(Default)]
pub struct InMemoryIndex {
    chunks: RwLock<Vec<IndexedChunk>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn search(
        &self,
        query: &[f32],
        predicate: Option<&Predicate>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let chunks = self.chunks.read().await;
        let mut hits: Vec<SearchHit> = chunks
            .iter()
            .filter(|c| predicate.map(|p| p.matches(&c.metadata)).unwrap_or(true))
            .map(|c| SearchHit {
                id: c.id.clone(),
                document: c.document.clone(),
                metadata: c.metadata.clone(),
                score: cosine_similarity(query, &c.embedding),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn upsert(&self, new_chunks: Vec<IndexedChunk>) -> Result<()> {
        let mut chunks = self.chunks.write().await;
        for chunk in new_chunks {
            match chunks.iter_mut().find(|c| c.id == chunk.id) {
                Some(existing) => *existing = chunk,
                None => chunks.push(chunk),
            }
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.chunks.read().await.len())
    }

    fn backend(&self) -> &str {
        "memory"
    }
}
