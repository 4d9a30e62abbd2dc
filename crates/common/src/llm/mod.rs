//! Language model service abstraction
//!
//! One stateless operation: prompt in, completion text out. Every piece of
//! context a call needs must already be inside the prompt.
//!
//! Implementations:
//! - OpenAI-compatible chat completions (OpenAI, Groq, vLLM, ...)
//! - A canned local mock so the service runs without credentials

use crate::config::LlmConfig;
use crate::context::CLASSIFIER_PREAMBLE;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(test)]
pub(crate) use scripted::{ScriptedLanguageModel, ScriptedReply};

/// Trait for text completion
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<String>;

    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAIChatModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    timeout: Duration,
}

impl OpenAIChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "llm.api_key is required for the openai provider".to_string(),
        })?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let base = config
            .api_base
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/');

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", base),
            timeout,
        })
    }

    async fn call(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::UpstreamTimeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    AppError::LanguageModelError {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::LanguageModelError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let chat_response: ChatResponse =
            response.json().await.map_err(|e| AppError::LanguageModelError {
                message: format!("Failed to parse response: {}", e),
            })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::LanguageModelError {
                message: "Empty response from model".to_string(),
            })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChatModel {
    async fn complete(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<String> {
        let start = Instant::now();
        let result = self.call(prompt, temperature, max_tokens).await;
        metrics::record_llm(start.elapsed().as_secs_f64(), &self.model, result.is_ok());
        if let Err(ref e) = result {
            tracing::error!(model = %self.model, error = %e, "Language model request failed");
        }
        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Offline stand-in used when no provider is configured.
///
/// Classification prompts get a "general" classification of the query;
/// answer prompts get a canned reply naming the question.
pub struct MockLanguageModel;

impl MockLanguageModel {
    /// The query of a classifier prompt, `None` for any other prompt
    fn classified_query(prompt: &str) -> Option<&str> {
        let rest = prompt.strip_prefix(CLASSIFIER_PREAMBLE)?;
        rest.split_once("\nUser query: ").map(|(_, query)| query.trim())
    }

    /// The question of an answer prompt; it is always the last section
    fn question(prompt: &str) -> Option<&str> {
        let (_, rest) = prompt.rsplit_once("User question:")?;
        rest.lines().map(str::trim).find(|l| !l.is_empty())
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, prompt: &str, _temperature: f32, _max_tokens: u32) -> Result<String> {
        if let Some(query) = Self::classified_query(prompt) {
            let payload = serde_json::json!({
                "user_query": query,
                "intent": "general",
                "filters": {}
            });
            return Ok(payload.to_string());
        }

        let question = Self::question(prompt).unwrap_or("your question");
        Ok(format!(
            "Based on the available material, here is what I found about \"{}\". \
             [Mock response - language model not configured]",
            question
        ))
    }

    fn model_name(&self) -> &str {
        "mock-llm"
    }
}

/// Create a language model client based on configuration
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" | "groq" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        "mock" => Ok(Arc::new(MockLanguageModel)),
        other => Err(AppError::Configuration {
            message: format!("Unknown llm provider: {}", other),
        }),
    }
}

/// Test double that replays a fixed script of replies
#[cfg(test)]
mod scripted {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Outcome a [`ScriptedLanguageModel`] hands back for one call
    #[derive(Debug, Clone)]
    pub enum ScriptedReply {
        Text(String),
        Fail(String),
    }

    /// Replays a fixed queue of replies and records every prompt it receives.
    /// Running past the end of the script is a language model failure.
    #[derive(Default)]
    pub struct ScriptedLanguageModel {
        replies: Mutex<VecDeque<ScriptedReply>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLanguageModel {
        pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        /// Script made only of successful text replies
        pub fn texts<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
            Self::new(replies.into_iter().map(|r| ScriptedReply::Text(r.into())))
        }

        /// Prompts received so far, oldest first
        pub async fn prompts(&self) -> Vec<String> {
            self.prompts.lock().await.clone()
        }

        pub async fn calls(&self) -> usize {
            self.prompts.lock().await.len()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedLanguageModel {
        async fn complete(&self, prompt: &str, _temperature: f32, _max_tokens: u32) -> Result<String> {
            self.prompts.lock().await.push(prompt.to_string());
            match self.replies.lock().await.pop_front() {
                Some(ScriptedReply::Text(text)) => Ok(text),
                Some(ScriptedReply::Fail(message)) => Err(AppError::LanguageModelError { message }),
                None => Err(AppError::LanguageModelError {
                    message: "script exhausted".to_string(),
                }),
            }
        }

        fn model_name(&self) -> &str {
            "scripted-llm"
        }
    }
}
