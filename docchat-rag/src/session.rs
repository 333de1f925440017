//! Per-conversation turn history.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Who authored a [`Turn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

struct SessionEntry {
    turns: Mutex<Vec<Turn>>,
    /// Nanoseconds since the store's epoch at last access.
    last_active: AtomicU64,
}

/// Concurrent map of session id to turn history.
///
/// Each session has its own lock, so operations on different sessions never
/// wait on each other while appends to one session are applied in arrival
/// order. With a cap set, creating a session beyond it evicts the least
/// recently active one.
pub struct SessionStore {
    sessions: DashMap<String, Arc<SessionEntry>>,
    max_sessions: Option<usize>,
    epoch: Instant,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SessionStore {
    /// Create a store holding at most `max_sessions` sessions (`None` for no cap).
    pub fn new(max_sessions: Option<usize>) -> Self {
        Self { sessions: DashMap::new(), max_sessions, epoch: Instant::now() }
    }

    fn tick(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Return `session_id` if it names a live session, otherwise create a new
    /// session and return its id.
    ///
    /// An id the store does not know is not reused: the caller gets a fresh
    /// one and must adopt it.
    pub fn get_or_create(&self, session_id: Option<&str>) -> String {
        if let Some(id) = session_id {
            if let Some(entry) = self.sessions.get(id) {
                entry.last_active.store(self.tick(), Ordering::Relaxed);
                return id.to_string();
            }
            debug!(session.id = id, "unknown session id, starting a new session");
        }

        let id = Uuid::new_v4().to_string();
        let entry = SessionEntry { turns: Mutex::new(Vec::new()), last_active: AtomicU64::new(self.tick()) };
        self.sessions.insert(id.clone(), Arc::new(entry));
        self.evict_over_cap(&id);
        id
    }

    fn evict_over_cap(&self, keep: &str) {
        let Some(cap) = self.max_sessions else { return };
        while self.sessions.len() > cap {
            let oldest = self
                .sessions
                .iter()
                .filter(|entry| entry.key() != keep)
                .min_by_key(|entry| entry.value().last_active.load(Ordering::Relaxed))
                .map(|entry| entry.key().clone());
            let Some(oldest) = oldest else { break };
            if self.sessions.remove(&oldest).is_some() {
                warn!(session.id = %oldest, max_sessions = cap, "evicted least recently active session");
            }
        }
    }

    fn entry(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.get(session_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Append a turn. Unknown sessions are ignored.
    pub async fn append(&self, session_id: &str, role: Role, content: impl Into<String>) {
        let Some(entry) = self.entry(session_id) else {
            debug!(session.id = session_id, "append to unknown session ignored");
            return;
        };
        let turn = Turn { role, content: content.into(), timestamp: Utc::now() };
        entry.turns.lock().await.push(turn);
        entry.last_active.store(self.tick(), Ordering::Relaxed);
    }

    /// The turns of a session in order. Empty if the session is unknown.
    pub async fn history(&self, session_id: &str) -> Vec<Turn> {
        match self.entry(session_id) {
            Some(entry) => entry.turns.lock().await.clone(),
            None => Vec::new(),
        }
    }

    /// Remove a session, returning whether it existed.
    pub fn clear(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Remove sessions inactive for longer than `max_idle`, returning how
    /// many were removed.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let now = self.tick();
        let threshold = u64::try_from(max_idle.as_nanos()).unwrap_or(u64::MAX);
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| {
            now.saturating_sub(entry.last_active.load(Ordering::Relaxed)) <= threshold
        });
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!(removed, "pruned idle sessions");
        }
        removed
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_id_is_returned_unchanged() {
        let store = SessionStore::default();
        let id = store.get_or_create(None);
        assert_eq!(store.get_or_create(Some(&id)), id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_id_gets_a_fresh_session() {
        let store = SessionStore::default();
        let id = store.get_or_create(Some("made-up"));
        assert_ne!(id, "made-up");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn history_preserves_append_order() {
        let store = SessionStore::default();
        let id = store.get_or_create(None);
        store.append(&id, Role::User, "hi").await;
        store.append(&id, Role::Assistant, "hello").await;

        let history = store.history(&id).await;
        let turns: Vec<(Role, &str)> = history.iter().map(|t| (t.role, t.content.as_str())).collect();
        assert_eq!(turns, vec![(Role::User, "hi"), (Role::Assistant, "hello")]);
    }

    #[tokio::test]
    async fn unknown_session_is_tolerated() {
        let store = SessionStore::default();
        store.append("gone", Role::User, "hi").await;
        assert!(store.history("gone").await.is_empty());
        assert!(!store.clear("gone"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn clear_removes_the_session() {
        let store = SessionStore::default();
        let id = store.get_or_create(None);
        store.append(&id, Role::User, "hi").await;
        assert!(store.clear(&id));
        assert!(store.history(&id).await.is_empty());
        assert!(!store.clear(&id));
    }

    #[test]
    fn cap_evicts_least_recently_active() {
        let store = SessionStore::new(Some(2));
        let first = store.get_or_create(None);
        let second = store.get_or_create(None);
        // touch the first so the second becomes the oldest
        std::thread::sleep(Duration::from_millis(2));
        store.get_or_create(Some(&first));
        let third = store.get_or_create(None);

        assert_eq!(store.len(), 2);
        assert_eq!(store.get_or_create(Some(&first)), first);
        assert_eq!(store.get_or_create(Some(&third)), third);
        assert_ne!(store.get_or_create(Some(&second)), second);
    }

    #[test]
    fn prune_idle_removes_stale_sessions() {
        let store = SessionStore::default();
        store.get_or_create(None);
        std::thread::sleep(Duration::from_millis(20));
        let fresh = store.get_or_create(None);

        assert_eq!(store.prune_idle(Duration::from_millis(10)), 1);
        assert_eq!(store.get_or_create(Some(&fresh)), fresh);
    }
}
