//! Orchestrator - runs one conversational query end to end
//!
//! classify -> filter -> retrieve -> ground & synthesize -> remember
//!
//! Steps run strictly in sequence. A request either completes and appends
//! exactly one memory entry, or fails and appends nothing.

use super::cascade::RetrievalCascade;
use super::classifier::IntentClassifier;
use super::memory::{MemoryStore, SessionTurn};
use super::synthesizer::Synthesizer;
use super::types::QueryResponse;
use crate::config::AppConfig;
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::index::VectorIndex;
use crate::llm::LanguageModel;
use crate::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

pub struct Orchestrator {
    classifier: IntentClassifier,
    cascade: RetrievalCascade,
    synthesizer: Synthesizer,
    memory: Arc<MemoryStore>,
    request_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        config: &AppConfig,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        llm: Arc<dyn LanguageModel>,
        memory: Arc<MemoryStore>,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(llm.clone(), &config.llm),
            cascade: RetrievalCascade::new(embedder, index),
            synthesizer: Synthesizer::new(llm, &config.llm, &config.memory),
            memory,
            request_timeout: config.request_timeout(),
        }
    }

    /// Override the deadline applied to each query
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Answer `query` within `session_id`, retrieving at most `result_limit`
    /// chunks.
    ///
    /// Requests for the same session queue up and run one at a time in
    /// arrival order. The request deadline starts once the session is
    /// claimed, so queueing never counts against it. Fails with
    /// [`AppError::UpstreamTimeout`] when the pipeline overruns the deadline.
    #[instrument(skip(self, query), fields(session_id = %session_id))]
    pub async fn handle_query(
        &self,
        query: &str,
        session_id: &str,
        result_limit: i64,
    ) -> Result<QueryResponse> {
        let turn = self.memory.begin_turn(session_id).await;

        let pipeline = self.run(query, &turn, result_limit);
        match tokio::time::timeout(self.request_timeout, pipeline).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Query exceeded request deadline"
                );
                Err(AppError::UpstreamTimeout {
                    timeout_ms: self.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn run(&self, query: &str, turn: &SessionTurn, result_limit: i64) -> Result<QueryResponse> {
        let start = Instant::now();

        let classification = self.classifier.classify(query).await?;

        let retrieval = self
            .cascade
            .retrieve(
                &classification.user_query,
                &classification.intent,
                &classification.filters,
                result_limit,
            )
            .await?;
        let tier = retrieval.tier();

        let memory = self
            .memory
            .recent_in(turn, self.memory.recent_limit())
            .await;

        let synthesis = self
            .synthesizer
            .synthesize(&classification.user_query, retrieval, &memory)
            .await?;

        self.memory
            .append(
                turn,
                &classification.user_query,
                &synthesis.answer,
                synthesis.citations.clone(),
            )
            .await;

        let elapsed = start.elapsed();
        metrics::record_query(elapsed.as_secs_f64(), synthesis.grounding.as_str());
        info!(
            intent = %classification.intent,
            tier = tier.map(|t| t.as_str()).unwrap_or("none"),
            grounding = synthesis.grounding.as_str(),
            citations = synthesis.citations.len(),
            latency_ms = elapsed.as_millis() as u64,
            "Query answered"
        );

        Ok(QueryResponse {
            intent: classification.intent,
            user_query: classification.user_query,
            filters: classification.filters,
            grounding: synthesis.grounding,
            answer: synthesis.answer,
            citations: synthesis.citations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Grounding, Metadata, Scalar, REFUSAL};
    use crate::embeddings::MockEmbedder;
    use crate::index::{InMemoryIndex, IndexedChunk};
    use crate::llm::{ScriptedLanguageModel, ScriptedReply};
    use async_trait::async_trait;

    const DIM: usize = 16;

    async fn hr_index() -> Arc<InMemoryIndex> {
        let embedder = MockEmbedder::new(DIM);
        let index = Arc::new(InMemoryIndex::new());
        let docs = [
            ("hr-1", "hr", "Maternity leave is 26 weeks of paid leave."),
            ("hr-2", "hr", "Maternity leave requests go through the HR portal."),
            ("inc-1", "incident", "Incident INC-42 was a database outage."),
        ];
        let mut chunks = Vec::new();
        for (id, intent, text) in docs {
            let mut metadata = Metadata::new();
            metadata.insert("intent".into(), Scalar::from(intent));
            metadata.insert("source_filename".into(), Scalar::from("handbook.txt"));
            chunks.push(IndexedChunk {
                id: id.to_string(),
                document: text.to_string(),
                metadata,
                embedding: embedder.embed(text).await.unwrap(),
            });
        }
        index.upsert(chunks).await.unwrap();
        index
    }

    fn orchestrator(
        index: Arc<InMemoryIndex>,
        llm: Arc<dyn LanguageModel>,
        memory: Arc<MemoryStore>,
    ) -> Orchestrator {
        let mut config = AppConfig::default();
        config.embedding.dimension = DIM;
        Orchestrator::new(
            &config,
            Arc::new(MockEmbedder::new(DIM)),
            index,
            llm,
            memory,
        )
    }

    fn memory_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new(&AppConfig::default().memory))
    }

    const LEAVE_QUERY: &str = "What is the maternity leave policy?";
    const HR_CLASSIFICATION: &str =
        r#"{"user_query": "What is the maternity leave policy?", "intent": "hr", "filters": {}}"#;

    #[tokio::test]
    async fn test_grounded_in_retrieved_context() {
        let memory = memory_store();
        let llm = Arc::new(ScriptedLanguageModel::texts([
            HR_CLASSIFICATION,
            "Maternity leave is 26 weeks, requested via the HR portal.",
        ]));
        let orch = orchestrator(hr_index().await, llm, memory.clone());

        let response = orch.handle_query(LEAVE_QUERY, "s1", 4).await.unwrap();

        assert_eq!(response.grounding, Grounding::Grounded);
        assert_eq!(response.intent, "hr");
        assert_eq!(response.citations.len(), 2);
        assert!(response.citations.iter().all(|c| c.id.starts_with("hr-")));
        assert!(!response.answer.is_empty());

        // the stored entry carries exactly the citations just returned
        let stored = memory.recent("s1", 1).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].citations, response.citations);
        assert_eq!(stored[0].user_text, LEAVE_QUERY);
    }

    #[tokio::test]
    async fn test_follow_up_grounded_in_memory() {
        let memory = memory_store();
        let first = orchestrator(
            hr_index().await,
            Arc::new(ScriptedLanguageModel::texts([HR_CLASSIFICATION, "26 weeks."])),
            memory.clone(),
        );
        let earlier = first.handle_query(LEAVE_QUERY, "s1", 4).await.unwrap();

        let follow_up = orchestrator(
            Arc::new(InMemoryIndex::new()),
            Arc::new(ScriptedLanguageModel::texts([
                r#"{"user_query": "and how many weeks is it?", "intent": "hr", "filters": {}}"#,
                "It is 26 weeks.",
            ])),
            memory.clone(),
        );
        let response = follow_up
            .handle_query("and how many weeks is it?", "s1", 4)
            .await
            .unwrap();

        assert_eq!(response.grounding, Grounding::Grounded);
        assert_eq!(response.citations, earlier.citations);
        assert_eq!(memory.recent("s1", 5).await.len(), 2);
    }

    #[tokio::test]
    async fn test_fresh_session_without_evidence_is_ungrounded() {
        let memory = memory_store();
        let llm = Arc::new(ScriptedLanguageModel::texts([
            r#"{"user_query": "hello", "intent": "general", "filters": {}}"#,
        ]));
        let orch = orchestrator(Arc::new(InMemoryIndex::new()), llm.clone(), memory.clone());

        let response = orch.handle_query("hello", "fresh", 4).await.unwrap();

        assert_eq!(response.grounding, Grounding::Ungrounded);
        assert_eq!(response.answer, REFUSAL);
        assert!(response.citations.is_empty());
        assert_eq!(llm.calls().await, 1);

        let stored = memory.recent("fresh", 3).await;
        assert_eq!(stored.len(), 1);
        assert!(stored[0].citations.is_empty());
    }

    #[tokio::test]
    async fn test_classifier_garbage_still_answers() {
        let memory = memory_store();
        let llm = Arc::new(ScriptedLanguageModel::texts([
            "I think this is about HR!",
            "Maternity leave is 26 weeks.",
        ]));
        let orch = orchestrator(hr_index().await, llm, memory);

        let response = orch.handle_query(LEAVE_QUERY, "s1", 4).await.unwrap();
        assert_eq!(response.intent, "general");
        assert!(response.filters.is_empty());
        assert_eq!(response.user_query, LEAVE_QUERY);
        assert_eq!(response.grounding, Grounding::Grounded);
    }

    #[tokio::test]
    async fn test_upstream_failure_writes_no_memory() {
        let memory = memory_store();
        let llm = Arc::new(ScriptedLanguageModel::new([
            ScriptedReply::Text(HR_CLASSIFICATION.to_string()),
            ScriptedReply::Fail("service unavailable".into()),
        ]));
        let orch = orchestrator(hr_index().await, llm, memory.clone());

        let err = orch.handle_query(LEAVE_QUERY, "s1", 4).await.unwrap_err();
        assert!(err.is_upstream());
        assert!(memory.recent("s1", 3).await.is_empty());
    }

    struct StalledModel;

    #[async_trait]
    impl LanguageModel for StalledModel {
        async fn complete(&self, _prompt: &str, _t: f32, _m: u32) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(String::new())
        }

        fn model_name(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_deadline_exceeded_fails_without_memory_write() {
        let memory = memory_store();
        let orch = orchestrator(hr_index().await, Arc::new(StalledModel), memory.clone())
            .with_request_timeout(Duration::from_millis(50));

        let err = orch.handle_query(LEAVE_QUERY, "s1", 4).await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamTimeout { timeout_ms: 50 }));
        assert!(memory.recent("s1", 3).await.is_empty());

        // the session is released for the next request
        let _turn = memory.begin_turn("s1").await;
    }

    #[tokio::test]
    async fn test_deadline_starts_after_session_is_claimed() {
        let memory = memory_store();
        let orch = Arc::new(
            orchestrator(
                hr_index().await,
                Arc::new(ScriptedLanguageModel::texts([HR_CLASSIFICATION, "26 weeks."])),
                memory.clone(),
            )
            .with_request_timeout(Duration::from_millis(100)),
        );

        let held = memory.begin_turn("s1").await;
        let queued = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.handle_query(LEAVE_QUERY, "s1", 4).await })
        };

        // wait well past the deadline before letting the queued request run
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(held);

        let response = queued.await.unwrap().unwrap();
        assert_eq!(response.grounding, Grounding::Grounded);
        assert_eq!(memory.recent("s1", 3).await.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_limit_skips_retrieval() {
        let memory = memory_store();
        let llm = Arc::new(ScriptedLanguageModel::texts([HR_CLASSIFICATION]));
        let orch = orchestrator(hr_index().await, llm, memory);

        let response = orch.handle_query(LEAVE_QUERY, "s1", 0).await.unwrap();
        assert_eq!(response.grounding, Grounding::Ungrounded);
    }
}
