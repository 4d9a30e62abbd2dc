//! Intent Classifier - labels a query with an intent and metadata filters
//!
//! The language model is asked for a small JSON object. Anything that does
//! not parse into one becomes an explicit [`Classification::Fallback`], so a
//! malformed reply never fails the request.

use super::filter::{FilterPolicy, ALLOWED_FILTER_KEYS};
use super::types::{ClassificationResult, RawFilters, Scalar, GENERAL_INTENT};
use crate::config::LlmConfig;
use crate::errors::Result;
use crate::llm::LanguageModel;
use crate::metrics;
use std::sync::Arc;
use tracing::{debug, warn};

/// First line of every classifier prompt
pub const CLASSIFIER_PREAMBLE: &str = "You are a query classifier.";

/// Why a classifier reply was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    InvalidJson,
    NotAnObject,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::InvalidJson => "invalid_json",
            FallbackReason::NotAnObject => "not_an_object",
        }
    }
}

/// Outcome of parsing a classifier reply
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Parsed(ClassificationResult),
    Fallback { reason: FallbackReason },
}

impl Classification {
    /// The result to act on. A fallback becomes the general classification of
    /// the original query.
    pub fn resolve(self, query: &str) -> ClassificationResult {
        match self {
            Classification::Parsed(result) => result,
            Classification::Fallback { .. } => ClassificationResult::general(query),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Classification::Fallback { .. })
    }
}

/// Classifier backed by a language model
pub struct IntentClassifier {
    llm: Arc<dyn LanguageModel>,
    temperature: f32,
    max_tokens: u32,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LanguageModel>, config: &LlmConfig) -> Self {
        Self {
            llm,
            temperature: config.classifier_temperature,
            max_tokens: config.classifier_max_tokens,
        }
    }

    pub fn build_prompt(query: &str) -> String {
        let keys = ALLOWED_FILTER_KEYS
            .iter()
            .map(|k| format!("\"{}\"", k))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "{} Reply with ONLY a JSON object that has the keys \
             \"user_query\", \"intent\" and \"filters\". \
             \"intent\" is a short lowercase label such as hr, incident or general. \
             \"filters\" is a JSON object whose keys come ONLY from [{}], included only when relevant. \
             If unsure, return an empty filters object. Do not use markdown.\n\
             User query: {}",
            CLASSIFIER_PREAMBLE, keys, query
        )
    }

    /// Classify a query. Only a failure to reach the language model is an
    /// error; unusable replies fall back to the general classification.
    pub async fn classify(&self, query: &str) -> Result<ClassificationResult> {
        let raw = self
            .llm
            .complete(&Self::build_prompt(query), self.temperature, self.max_tokens)
            .await?;

        let classification = Self::parse_response(query, &raw);
        if let Classification::Fallback { reason } = &classification {
            warn!(reason = reason.as_str(), "Classifier reply unusable, falling back to general");
            metrics::record_classifier_fallback(reason.as_str());
        }

        let result = classification.resolve(query);
        debug!(intent = %result.intent, filters = result.filters.len(), "Query classified");
        Ok(result)
    }

    /// Interpret a raw model reply for `query`.
    pub fn parse_response(query: &str, raw: &str) -> Classification {
        let value: serde_json::Value = match serde_json::from_str(raw.trim()) {
            Ok(v) => v,
            Err(_) => {
                return Classification::Fallback {
                    reason: FallbackReason::InvalidJson,
                }
            }
        };

        let object = match value {
            serde_json::Value::Object(map) => map,
            _ => {
                return Classification::Fallback {
                    reason: FallbackReason::NotAnObject,
                }
            }
        };

        let user_query = object
            .get("user_query")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(query)
            .to_string();

        let intent = object
            .get("intent")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| GENERAL_INTENT.to_string());

        let raw_filters: RawFilters = match object.get("filters") {
            Some(serde_json::Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| Scalar::from_json(v).map(|s| (k.clone(), s)))
                .collect(),
            _ => RawFilters::new(),
        };

        Classification::Parsed(ClassificationResult {
            user_query,
            intent,
            filters: FilterPolicy::validate(&raw_filters),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedLanguageModel, ScriptedReply};

    const QUERY: &str = "What is the maternity leave policy?";

    #[test]
    fn test_invalid_json_falls_back() {
        let parsed = IntentClassifier::parse_response(QUERY, "Sure! Here is the JSON: {intent: hr}");
        assert_eq!(
            parsed,
            Classification::Fallback {
                reason: FallbackReason::InvalidJson
            }
        );
        assert_eq!(parsed.resolve(QUERY), ClassificationResult::general(QUERY));
    }

    #[test]
    fn test_json_array_falls_back() {
        let parsed = IntentClassifier::parse_response(QUERY, r#"[{"intent": "hr"}]"#);
        assert!(parsed.is_fallback());

        let result = parsed.resolve(QUERY);
        assert_eq!(result.intent, "general");
        assert!(result.filters.is_empty());
        assert_eq!(result.user_query, QUERY);
    }

    #[test]
    fn test_missing_keys_default() {
        let result = IntentClassifier::parse_response(QUERY, "{}").resolve(QUERY);
        assert_eq!(result, ClassificationResult::general(QUERY));

        let result =
            IntentClassifier::parse_response(QUERY, r#"{"intent": "HR ", "filters": "none"}"#)
                .resolve(QUERY);
        assert_eq!(result.intent, "hr");
        assert_eq!(result.user_query, QUERY);
        assert!(result.filters.is_empty());
    }

    #[test]
    fn test_non_string_fields_coerced() {
        let result = IntentClassifier::parse_response(
            QUERY,
            r#"{"user_query": 42, "intent": ["hr"], "filters": {}}"#,
        )
        .resolve(QUERY);
        assert_eq!(result.user_query, QUERY);
        assert_eq!(result.intent, GENERAL_INTENT);
    }

    #[test]
    fn test_filters_validated_and_scalar_only() {
        let reply = r#"{
            "user_query": "maternity leave policy for engineering",
            "intent": "hr",
            "filters": {
                "department": "Engineering",
                "severity": 2,
                "bogus_key": "x",
                "category": ["a", "b"],
                "policy_id": null
            }
        }"#;
        let result = IntentClassifier::parse_response(QUERY, reply).resolve(QUERY);
        assert_eq!(result.user_query, "maternity leave policy for engineering");
        assert_eq!(result.filters.len(), 2);
        assert_eq!(result.filters.get("department"), Some(&Scalar::from("Engineering")));
        assert_eq!(result.filters.get("severity"), Some(&Scalar::Integer(2)));
        assert!(result.filters.get("bogus_key").is_none());
    }

    #[test]
    fn test_prompt_lists_allowed_keys() {
        let prompt = IntentClassifier::build_prompt("hello");
        for key in ALLOWED_FILTER_KEYS {
            assert!(prompt.contains(&format!("\"{}\"", key)));
        }
        assert!(prompt.ends_with("User query: hello"));
    }

    #[tokio::test]
    async fn test_classify_uses_model_reply() {
        let llm = Arc::new(ScriptedLanguageModel::texts([
            r#"{"user_query": "leave policy", "intent": "hr", "filters": {"department": "Engineering"}}"#,
        ]));
        let classifier = IntentClassifier::new(llm.clone(), &LlmConfig::default());

        let result = classifier.classify(QUERY).await.unwrap();
        assert_eq!(result.intent, "hr");
        assert_eq!(result.user_query, "leave policy");
        assert_eq!(llm.calls().await, 1);
    }

    #[tokio::test]
    async fn test_classify_propagates_upstream_failure() {
        let llm = Arc::new(ScriptedLanguageModel::new([ScriptedReply::Fail(
            "connection refused".into(),
        )]));
        let classifier = IntentClassifier::new(llm, &LlmConfig::default());
        assert!(classifier.classify(QUERY).await.is_err());
    }
}
