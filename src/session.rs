//! Process-wide conversation histories keyed by session id.
//!
//! Histories are created lazily on first access and live until explicitly
//! cleared. Each history sits behind its own async mutex; the query engine
//! holds it for a whole turn, so turns within one session are serialized
//! while different sessions proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use crate::models::ChatMessage;

/// Shared handle to one session's ordered message list.
pub type SessionHistory = Arc<Mutex<Vec<ChatMessage>>>;

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionHistory>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// History for `session_id`, created empty if absent. Repeated calls
    /// return the same handle until the session is cleared.
    pub fn get_history(&self, session_id: &str) -> SessionHistory {
        {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            if let Some(history) = sessions.get(session_id) {
                return Arc::clone(history);
            }
        }
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(sessions.entry(session_id.to_string()).or_default())
    }

    /// Remove one session. Returns whether it existed.
    pub fn clear(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id).is_some()
    }

    pub fn clear_all(&self) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.clear();
    }

    /// Active session ids, sorted.
    pub fn session_ids(&self) -> Vec<String> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_handle_until_cleared() {
        let store = SessionStore::new();
        let a = store.get_history("s1");
        let b = store.get_history("s1");
        assert!(Arc::ptr_eq(&a, &b));

        a.lock().await.push(ChatMessage::human("hi"));
        assert_eq!(b.lock().await.len(), 1);

        assert!(store.clear("s1"));
        let c = store.get_history("s1");
        assert!(!Arc::ptr_eq(&a, &c));
        assert!(c.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = SessionStore::new();
        store.get_history("A").lock().await.push(ChatMessage::human("q"));
        assert!(store.get_history("B").lock().await.is_empty());
        assert_eq!(store.session_ids(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_clear_all_is_idempotent() {
        let store = SessionStore::new();
        store.get_history("x");
        store.clear_all();
        store.clear_all();
        assert!(store.is_empty());
        assert!(!store.clear("x"));
    }
}
