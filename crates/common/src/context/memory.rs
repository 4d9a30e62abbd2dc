//! Memory Store - per-session conversational history
//!
//! Sessions live in a bounded `moka` cache with LRU eviction: once
//! `max_sessions` is reached the least-recently-used session makes room for
//! the new one, and sessions idle for longer than `session_idle_secs` are
//! dropped. Locking is per session, never global.

use super::types::{truncate_chars, Citation, MemoryEntry};
use crate::config::MemoryConfig;
use crate::metrics;
use chrono::Utc;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Default)]
struct SessionSlot {
    /// Held by one request at a time; waiters are served in arrival order.
    turn: Arc<Mutex<()>>,
    entries: RwLock<Vec<MemoryEntry>>,
}

/// Exclusive claim on a session for the duration of one request.
///
/// The turn pins the slot it locked, so reads and the final append go to
/// the same history even if the cache evicts the session meanwhile.
/// Dropping it lets the next queued request for the session proceed.
pub struct SessionTurn {
    session_id: String,
    slot: Arc<SessionSlot>,
    _guard: OwnedMutexGuard<()>,
}

impl SessionTurn {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

pub struct MemoryStore {
    sessions: Cache<String, Arc<SessionSlot>>,
    user_text_cap: usize,
    ai_text_cap: usize,
    recent_limit: usize,
}

impl MemoryStore {
    pub fn new(config: &MemoryConfig) -> Self {
        let sessions = Cache::builder()
            .max_capacity(config.max_sessions)
            .eviction_policy(EvictionPolicy::lru())
            .time_to_idle(Duration::from_secs(config.session_idle_secs))
            .build();

        Self {
            sessions,
            user_text_cap: config.user_text_cap,
            ai_text_cap: config.ai_text_cap,
            recent_limit: config.recent_limit,
        }
    }

    /// Number of entries handed to synthesis per request
    pub fn recent_limit(&self) -> usize {
        self.recent_limit
    }

    /// Wait for this session's earlier requests to finish, then claim it.
    pub async fn begin_turn(&self, session_id: &str) -> SessionTurn {
        let slot = self
            .sessions
            .get_with(session_id.to_string(), || Arc::new(SessionSlot::default()));
        let guard = slot.turn.clone().lock_owned().await;

        SessionTurn {
            session_id: session_id.to_string(),
            slot,
            _guard: guard,
        }
    }

    /// Store one turn in the claimed session, cutting both texts to their
    /// storage caps.
    pub async fn append(
        &self,
        turn: &SessionTurn,
        user_text: &str,
        ai_text: &str,
        citations: Vec<Citation>,
    ) -> MemoryEntry {
        let entry = MemoryEntry {
            user_text: truncate_chars(user_text, self.user_text_cap),
            ai_text: truncate_chars(ai_text, self.ai_text_cap),
            citations,
            created_at: Utc::now(),
        };

        turn.slot.entries.write().await.push(entry.clone());

        // evicted while the request ran: put the history back
        if !self.sessions.contains_key(turn.session_id()) {
            self.sessions
                .insert(turn.session_id.clone(), turn.slot.clone());
        }

        metrics::set_memory_sessions(self.sessions.entry_count());
        entry
    }

    /// The last `limit` entries of the claimed session, oldest first.
    pub async fn recent_in(&self, turn: &SessionTurn, limit: usize) -> Vec<MemoryEntry> {
        last_entries(&turn.slot, limit).await
    }

    /// The last `limit` entries, oldest first. Unknown sessions are empty
    /// and are not created by the lookup.
    pub async fn recent(&self, session_id: &str, limit: usize) -> Vec<MemoryEntry> {
        match self.sessions.get(session_id) {
            Some(slot) => last_entries(&slot, limit).await,
            None => Vec::new(),
        }
    }

    /// Sessions currently held
    pub fn session_count(&self) -> u64 {
        self.sessions.run_pending_tasks();
        self.sessions.entry_count()
    }
}

async fn last_entries(slot: &SessionSlot, limit: usize) -> Vec<MemoryEntry> {
    let entries = slot.entries.read().await;
    let start = entries.len().saturating_sub(limit);
    entries[start..].to_vec()
}
