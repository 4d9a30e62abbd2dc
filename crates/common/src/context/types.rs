//! Data model shared by the conversational retrieval pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Closed scalar used for metadata values and filter match values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Convert a JSON value into a scalar. Nulls, arrays and objects have no
    /// scalar form and yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Scalar::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Scalar::Integer)
                .or_else(|| n.as_f64().map(Scalar::Float)),
            serde_json::Value::String(s) => Some(Scalar::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Bool(b) => serde_json::Value::Bool(*b),
            Scalar::Integer(i) => serde_json::Value::from(*i),
            Scalar::Float(f) => serde_json::Value::from(*f),
            Scalar::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Equality as a metadata predicate sees it: integers and floats compare
    /// numerically, everything else must match exactly.
    pub fn matches(&self, other: &Scalar) -> bool {
        match (self, other) {
            (Scalar::Integer(a), Scalar::Float(b)) | (Scalar::Float(b), Scalar::Integer(a)) => {
                (*a as f64) == *b
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Integer(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// Chunk metadata as stored in the vector index.
pub type Metadata = BTreeMap<String, Scalar>;

/// Unvalidated key/value pairs, as produced by the classifier model.
pub type RawFilters = BTreeMap<String, Scalar>;

/// Metadata filter whose keys are all whitelisted.
///
/// Only [`FilterPolicy::validate`](super::FilterPolicy::validate) builds one,
/// so a `Filter` never carries a key the vector index should not see.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Filter(BTreeMap<String, Scalar>);

impl Filter {
    pub(crate) fn from_validated(entries: BTreeMap<String, Scalar>) -> Self {
        Self(entries)
    }

    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Scalar)> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a Filter {
    type Item = (&'a String, &'a Scalar);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Scalar>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A reference to one retrieved chunk. Always an owned copy: the index may be
/// rebuilt without invalidating citations held in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
}

/// One conversational turn. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub user_text: String,
    pub ai_text: String,
    pub citations: Vec<Citation>,
    pub created_at: DateTime<Utc>,
}

/// Structured retrieval intent for a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub user_query: String,
    pub intent: String,
    pub filters: Filter,
}

impl ClassificationResult {
    /// The result used whenever the model output cannot be trusted.
    pub fn general(query: &str) -> Self {
        Self {
            user_query: query.to_string(),
            intent: GENERAL_INTENT.to_string(),
            filters: Filter::default(),
        }
    }
}

/// Intent label meaning "no particular intent".
pub const GENERAL_INTENT: &str = "general";

/// Which cascade tier produced a retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeTier {
    Combined,
    IntentOnly,
    Unrestricted,
}

impl CascadeTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CascadeTier::Combined => "combined",
            CascadeTier::IntentOnly => "intent_only",
            CascadeTier::Unrestricted => "unrestricted",
        }
    }
}

/// Outcome of the retrieval cascade. Citation order is the index's relevance
/// ranking within the winning tier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    citations: Vec<Citation>,
    tier: Option<CascadeTier>,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_tier(tier: CascadeTier, citations: Vec<Citation>) -> Self {
        if citations.is_empty() {
            return Self::empty();
        }
        Self {
            citations,
            tier: Some(tier),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.citations.len()
    }

    pub fn tier(&self) -> Option<CascadeTier> {
        self.tier
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    /// Citations paired with their 1-based rank position.
    pub fn ranked(&self) -> impl Iterator<Item = (usize, &Citation)> {
        self.citations.iter().enumerate().map(|(i, c)| (i + 1, c))
    }

    pub fn into_citations(self) -> Vec<Citation> {
        self.citations
    }
}

/// Whether an answer is backed by evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grounding {
    Grounded,
    Ungrounded,
}

impl Grounding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grounding::Grounded => "grounded",
            Grounding::Ungrounded => "ungrounded",
        }
    }
}

/// Result of one `handle_query` call.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub intent: String,
    pub user_query: String,
    pub filters: Filter,
    pub grounding: Grounding,
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Truncate to at most `max_chars` Unicode scalar values.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
