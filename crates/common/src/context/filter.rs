//! Filter Policy - whitelists metadata keys and composes search predicates

use super::types::{Filter, Scalar, GENERAL_INTENT};
use crate::index::{Clause, Predicate};
use std::collections::BTreeMap;
use tracing::debug;

/// Metadata keys a filter may constrain, sorted.
pub const ALLOWED_FILTER_KEYS: &[&str] = &[
    "category",
    "department",
    "employee_id",
    "guide_id",
    "incident_id",
    "intent",
    "policy_id",
    "severity",
    "source_filename",
    "source_type",
    "type",
];

/// Stateless policy turning a classified intent and raw filters into a
/// predicate. Keys outside [`ALLOWED_FILTER_KEYS`] are dropped, never rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterPolicy;

impl FilterPolicy {
    pub fn is_allowed(key: &str) -> bool {
        ALLOWED_FILTER_KEYS.binary_search(&key).is_ok()
    }

    /// Keep only whitelisted entries.
    pub fn validate<'a, I>(raw: I) -> Filter
    where
        I: IntoIterator<Item = (&'a String, &'a Scalar)>,
    {
        let kept: BTreeMap<String, Scalar> = raw
            .into_iter()
            .filter(|(key, _)| {
                let allowed = Self::is_allowed(key);
                if !allowed {
                    debug!(key = %key, "Dropping filter key outside the allowed set");
                }
                allowed
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Filter::from_validated(kept)
    }

    /// Equality clause on the intent, unless the intent is empty or "general".
    pub fn intent_clause(intent: &str) -> Option<Clause> {
        let intent = intent.trim();
        if intent.is_empty() || intent.eq_ignore_ascii_case(GENERAL_INTENT) {
            return None;
        }
        Some(Clause::equals("intent", intent))
    }

    /// Intent clause plus one clause per allowed filter entry.
    pub fn combined<'a, I>(intent: &str, filters: I) -> Option<Predicate>
    where
        I: IntoIterator<Item = (&'a String, &'a Scalar)>,
    {
        let mut clauses: Vec<Clause> = Self::intent_clause(intent).into_iter().collect();
        for (key, value) in filters {
            if Self::is_allowed(key) {
                clauses.push(Clause::equals(key.as_str(), value.clone()));
            } else {
                debug!(key = %key, "Dropping filter key outside the allowed set");
            }
        }
        Predicate::all(clauses)
    }

    /// The relaxed predicate of the second cascade tier: intent only.
    pub fn intent_only(intent: &str) -> Option<Predicate> {
        Self::intent_clause(intent).map(Predicate::Clause)
    }
}
