//! Configuration management for askforge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values
//!
//! The defaults describe a fully local setup: mock embedding and language
//! model providers over an in-memory vector index.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (pgvector backend only)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Language-model service configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Vector index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Conversational memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Retrieval limits
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Deadline for one full query pipeline, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Postgres URL (the database must have the `vector` extension available)
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for OpenAI-compatible endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Provider: openai (any OpenAI-compatible chat completions API), mock
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key
    pub api_key: Option<String>,

    /// API base URL, e.g. https://api.groq.com/openai/v1
    pub api_base: Option<String>,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_classifier_temperature")]
    pub classifier_temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub classifier_max_tokens: u32,

    #[serde(default = "default_answer_temperature")]
    pub answer_temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub answer_max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Backend: memory, pgvector
    #[serde(default = "default_index_backend")]
    pub backend: String,

    /// Table holding chunks for the pgvector backend
    #[serde(default = "default_index_table")]
    pub table: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryConfig {
    /// Maximum number of sessions kept in memory
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u64,

    /// Sessions untouched for this long are evicted
    #[serde(default = "default_session_idle")]
    pub session_idle_secs: u64,

    /// Number of recent turns handed to synthesis
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,

    /// Storage-time cap on the user side of a turn, in characters
    #[serde(default = "default_user_text_cap")]
    pub user_text_cap: usize,

    /// Storage-time cap on the answer side of a turn, in characters
    #[serde(default = "default_ai_text_cap")]
    pub ai_text_cap: usize,

    /// Prompt-time budget for the user side of a condensed turn
    #[serde(default = "default_condensed_user_chars")]
    pub condensed_user_chars: usize,

    /// Prompt-time budget for the answer side of a condensed turn
    #[serde(default = "default_condensed_ai_chars")]
    pub condensed_ai_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Results requested when the caller does not say
    #[serde(default = "default_result_limit")]
    pub default_limit: i64,

    /// Upper bound on caller-requested results
    #[serde(default = "default_max_result_limit")]
    pub max_limit: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level / EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_concurrent() -> usize { 100 }
fn default_database_url() -> String { "postgres://localhost/askforge".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_embedding_provider() -> String { "mock".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 1024 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_batch_size() -> usize { 16 }
fn default_llm_provider() -> String { "mock".to_string() }
fn default_llm_model() -> String { "llama-3.1-8b-instant".to_string() }
fn default_llm_timeout() -> u64 { 30 }
fn default_classifier_temperature() -> f32 { 0.1 }
fn default_answer_temperature() -> f32 { 0.2 }
fn default_max_tokens() -> u32 { 256 }
fn default_index_backend() -> String { "memory".to_string() }
fn default_index_table() -> String { "documents".to_string() }
fn default_max_sessions() -> u64 { 10_000 }
fn default_session_idle() -> u64 { 3600 }
fn default_recent_limit() -> usize { 3 }
fn default_user_text_cap() -> usize { 200 }
fn default_ai_text_cap() -> usize { 300 }
fn default_condensed_user_chars() -> usize { 100 }
fn default_condensed_ai_chars() -> usize { 150 }
fn default_result_limit() -> i64 { 4 }
fn default_max_result_limit() -> i64 { 50 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "askforge".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Deadline for one query pipeline
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Clamp a caller-supplied result count to the configured maximum.
    /// Non-positive values pass through untouched; the retrieval cascade
    /// treats them as "no search".
    pub fn clamp_result_limit(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.retrieval.default_limit)
            .min(self.retrieval.max_limit)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: None,
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            classifier_temperature: default_classifier_temperature(),
            classifier_max_tokens: default_max_tokens(),
            answer_temperature: default_answer_temperature(),
            answer_max_tokens: default_max_tokens(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            table: default_index_table(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            session_idle_secs: default_session_idle(),
            recent_limit: default_recent_limit(),
            user_text_cap: default_user_text_cap(),
            ai_text_cap: default_ai_text_cap(),
            condensed_user_chars: default_condensed_user_chars(),
            condensed_ai_chars: default_condensed_ai_chars(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_result_limit(),
            max_limit: default_max_result_limit(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            index: IndexConfig::default(),
            memory: MemoryConfig::default(),
            retrieval: RetrievalConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.index.backend, "memory");
        assert_eq!(config.llm.provider, "mock");
        assert_eq!(config.memory.recent_limit, 3);
        assert_eq!(config.memory.user_text_cap, 200);
        assert_eq!(config.memory.ai_text_cap, 300);
    }

    #[test]
    fn test_result_limit_clamping() {
        let config = AppConfig::default();
        assert_eq!(config.clamp_result_limit(None), 4);
        assert_eq!(config.clamp_result_limit(Some(500)), 50);
        assert_eq!(config.clamp_result_limit(Some(-2)), -2);
    }

    #[test]
    fn test_partial_sections_deserialize() {
        let config: AppConfig = serde_json::from_str(
            r#"{"server": {"port": 9000}, "memory": {"recent_limit": 5}}"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(config.memory.recent_limit, 5);
        assert_eq!(config.memory.max_sessions, 10_000);
    }
}
