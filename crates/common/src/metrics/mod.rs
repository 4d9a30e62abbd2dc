//! Metrics and observability utilities
//!
//! Prometheus metrics with latency-aligned histograms and a shared
//! `askforge_` naming prefix. Recording is a no-op until a recorder is
//! installed, so library code and tests can call these freely.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all askforge metrics
pub const METRICS_PREFIX: &str = "askforge";

/// Histogram buckets for HTTP request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
];

/// Buckets for upstream model calls (embeddings and chat completions)
pub const UPSTREAM_BUCKETS: &[f64] = &[
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Conversational queries answered, by grounding"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end query pipeline latency in seconds"
    );

    describe_counter!(
        format!("{}_cascade_tier_total", METRICS_PREFIX),
        Unit::Count,
        "Retrieval cascade outcomes, by winning tier"
    );

    describe_counter!(
        format!("{}_classifier_fallback_total", METRICS_PREFIX),
        Unit::Count,
        "Classifier responses replaced by the general fallback"
    );

    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_llm_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total language model requests"
    );

    describe_histogram!(
        format!("{}_llm_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Language model completion latency in seconds"
    );

    describe_gauge!(
        format!("{}_memory_sessions", METRICS_PREFIX),
        Unit::Count,
        "Sessions currently held in conversational memory"
    );

    describe_counter!(
        format!("{}_chunks_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Total chunks written to the vector index"
    );

    describe_histogram!(
        format!("{}_ingestion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Document ingestion latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record one completed query
pub fn record_query(duration_secs: f64, grounding: &str) {
    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "grounding" => grounding.to_string()
    )
    .increment(1);

    histogram!(format!("{}_query_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Record which cascade tier produced a result; `None` means every tier came
/// back empty.
pub fn record_cascade_tier(tier: Option<&str>) {
    counter!(
        format!("{}_cascade_tier_total", METRICS_PREFIX),
        "tier" => tier.unwrap_or("none").to_string()
    )
    .increment(1);
}

pub fn record_classifier_fallback(reason: &str) {
    counter!(
        format!("{}_classifier_fallback_total", METRICS_PREFIX),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}

/// Helper to record language model metrics
pub fn record_llm(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_llm_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_llm_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}

pub fn set_memory_sessions(count: u64) {
    gauge!(format!("{}_memory_sessions", METRICS_PREFIX)).set(count as f64);
}

/// Helper to record ingestion metrics
pub fn record_ingestion(duration_secs: f64, chunks_created: usize, source_type: &str) {
    counter!(
        format!("{}_chunks_ingested_total", METRICS_PREFIX),
        "source_type" => source_type.to_string()
    )
    .increment(chunks_created as u64);

    histogram!(format!("{}_ingestion_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}
