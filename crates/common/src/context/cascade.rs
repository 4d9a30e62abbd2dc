//! Retrieval Cascade - three progressively relaxed searches
//!
//! 1. intent + validated filters
//! 2. intent only, when that differs from tier 1
//! 3. unrestricted
//!
//! The first tier returning anything wins; results are never merged.

use super::filter::FilterPolicy;
use super::types::{CascadeTier, Citation, Filter, RetrievalResult};
use crate::embeddings::Embedder;
use crate::errors::Result;
use crate::index::{Predicate, VectorIndex};
use crate::metrics;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct RetrievalCascade {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl RetrievalCascade {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    async fn search(
        &self,
        embedding: &[f32],
        predicate: Option<&Predicate>,
        limit: usize,
        tier: CascadeTier,
    ) -> Result<Vec<Citation>> {
        let hits = self.index.search(embedding, predicate, limit).await?;
        debug!(
            tier = tier.as_str(),
            predicate = ?predicate,
            hits = hits.len(),
            "Cascade tier searched"
        );
        Ok(hits.into_iter().map(Citation::from).collect())
    }

    /// Retrieve up to `limit` chunks for `user_query`. A non-positive limit
    /// yields an empty result without touching the embedder or the index.
    pub async fn retrieve(
        &self,
        user_query: &str,
        intent: &str,
        filters: &Filter,
        limit: i64,
    ) -> Result<RetrievalResult> {
        if limit <= 0 {
            debug!(limit, "Non-positive result limit, skipping retrieval");
            return Ok(RetrievalResult::empty());
        }
        let limit = limit as usize;

        let embedding = self.embedder.embed(user_query).await?;

        let combined = FilterPolicy::combined(intent, filters);
        let found = self
            .search(&embedding, combined.as_ref(), limit, CascadeTier::Combined)
            .await?;
        if !found.is_empty() {
            return Ok(Self::finish(CascadeTier::Combined, found));
        }
        let mut unrestricted_done = combined.is_none();

        let intent_only = FilterPolicy::intent_only(intent);
        if intent_only != combined {
            let found = self
                .search(&embedding, intent_only.as_ref(), limit, CascadeTier::IntentOnly)
                .await?;
            if !found.is_empty() {
                return Ok(Self::finish(CascadeTier::IntentOnly, found));
            }
            unrestricted_done |= intent_only.is_none();
        }

        if unrestricted_done {
            return Ok(Self::finish(CascadeTier::Unrestricted, Vec::new()));
        }

        // Results from here on can violate filters the query asked for.
        warn!(
            dropped_predicate = ?combined,
            "Filtered tiers empty, relaxing to unrestricted search"
        );
        let found = self
            .search(&embedding, None, limit, CascadeTier::Unrestricted)
            .await?;
        Ok(Self::finish(CascadeTier::Unrestricted, found))
    }

    fn finish(tier: CascadeTier, citations: Vec<Citation>) -> RetrievalResult {
        let result = RetrievalResult::from_tier(tier, citations);
        metrics::record_cascade_tier(result.tier().map(|t| t.as_str()));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Metadata, RawFilters, Scalar};
    use crate::embeddings::MockEmbedder;
    use crate::index::{Clause, InMemoryIndex, IndexedChunk, SearchHit};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    /// Index double that answers per predicate and records every search.
    struct RecordingIndex {
        inner: InMemoryIndex,
        searches: Mutex<Vec<Option<Predicate>>>,
    }

    impl RecordingIndex {
        fn new() -> Self {
            Self {
                inner: InMemoryIndex::new(),
                searches: Mutex::new(Vec::new()),
            }
        }

        async fn searches(&self) -> Vec<Option<Predicate>> {
            self.searches.lock().await.clone()
        }
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        async fn search(
            &self,
            query: &[f32],
            predicate: Option<&Predicate>,
            limit: usize,
        ) -> Result<Vec<SearchHit>> {
            self.searches.lock().await.push(predicate.cloned());
            self.inner.search(query, predicate, limit).await
        }

        async fn upsert(&self, chunks: Vec<IndexedChunk>) -> Result<()> {
            self.inner.upsert(chunks).await
        }

        async fn count(&self) -> Result<usize> {
            self.inner.count().await
        }

        fn backend(&self) -> &str {
            "recording"
        }
    }

    async fn seed(index: &RecordingIndex, embedder: &MockEmbedder, chunks: &[(&str, &str, &str)]) {
        let mut batch = Vec::new();
        for (id, intent, department) in chunks {
            let document = format!("{} policy for {}", intent, department);
            let mut metadata = Metadata::new();
            metadata.insert("intent".into(), Scalar::from(*intent));
            metadata.insert("department".into(), Scalar::from(*department));
            batch.push(IndexedChunk {
                id: id.to_string(),
                embedding: embedder.embed(&document).await.unwrap(),
                document,
                metadata,
            });
        }
        index.upsert(batch).await.unwrap();
    }

    fn filters(pairs: &[(&str, &str)]) -> Filter {
        let raw: RawFilters = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Scalar::from(*v)))
            .collect();
        FilterPolicy::validate(&raw)
    }

    fn cascade(index: Arc<RecordingIndex>) -> RetrievalCascade {
        RetrievalCascade::new(Arc::new(MockEmbedder::new(16)), index)
    }

    #[tokio::test]
    async fn test_tier_one_hit_stops_cascade() {
        let index = Arc::new(RecordingIndex::new());
        seed(&index, &MockEmbedder::new(16), &[("hr-eng", "hr", "Engineering")]).await;

        let result = cascade(index.clone())
            .retrieve("leave", "hr", &filters(&[("department", "Engineering")]), 4)
            .await
            .unwrap();

        assert_eq!(result.tier(), Some(CascadeTier::Combined));
        assert_eq!(result.len(), 1);
        assert_eq!(index.searches().await.len(), 1);
    }

    #[tokio::test]
    async fn test_intent_only_tier_wins_without_unrestricted_query() {
        let index = Arc::new(RecordingIndex::new());
        seed(
            &index,
            &MockEmbedder::new(16),
            &[("hr-eng", "hr", "Engineering"), ("inc-ops", "incident", "Ops")],
        )
        .await;

        let result = cascade(index.clone())
            .retrieve("leave", "hr", &filters(&[("department", "Sales")]), 4)
            .await
            .unwrap();

        assert_eq!(result.tier(), Some(CascadeTier::IntentOnly));
        assert_eq!(result.citations()[0].id, "hr-eng");

        let searches = index.searches().await;
        assert_eq!(searches.len(), 2);
        assert_eq!(
            searches[1],
            Some(Predicate::Clause(Clause::equals("intent", "hr")))
        );
        assert!(searches.iter().all(|p| p.is_some()));
    }

    #[tokio::test]
    async fn test_falls_through_to_unrestricted() {
        let index = Arc::new(RecordingIndex::new());
        seed(&index, &MockEmbedder::new(16), &[("inc-ops", "incident", "Ops")]).await;

        let result = cascade(index.clone())
            .retrieve("leave", "hr", &Filter::default(), 4)
            .await
            .unwrap();

        assert_eq!(result.tier(), Some(CascadeTier::Unrestricted));
        assert_eq!(result.citations()[0].id, "inc-ops");
        // combined == intent-only here, so tier 2 is skipped
        assert_eq!(index.searches().await, vec![
            Some(Predicate::Clause(Clause::equals("intent", "hr"))),
            None,
        ]);
    }

    #[tokio::test]
    async fn test_general_intent_searches_unrestricted_once() {
        let index = Arc::new(RecordingIndex::new());

        let result = cascade(index.clone())
            .retrieve("hello", "general", &Filter::default(), 4)
            .await
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(index.searches().await, vec![None]);
    }

    #[tokio::test]
    async fn test_non_positive_limit_skips_search() {
        let index = Arc::new(RecordingIndex::new());
        seed(&index, &MockEmbedder::new(16), &[("hr-eng", "hr", "Engineering")]).await;

        for limit in [0, -3] {
            let result = cascade(index.clone())
                .retrieve("leave", "hr", &Filter::default(), limit)
                .await
                .unwrap();
            assert!(result.is_empty());
        }
        assert!(index.searches().await.is_empty());
    }

    #[tokio::test]
    async fn test_respects_limit_and_ranking() {
        let index = Arc::new(RecordingIndex::new());
        let embedder = MockEmbedder::new(16);
        seed(
            &index,
            &embedder,
            &[
                ("a", "hr", "Engineering"),
                ("b", "hr", "Sales"),
                ("c", "hr", "Ops"),
            ],
        )
        .await;

        let result = cascade(index.clone())
            .retrieve("hr policy for Sales", "hr", &Filter::default(), 2)
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result.citations()[0].id, "b");
    }
}
