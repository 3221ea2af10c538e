//! In-memory conversation sessions.
//!
//! Each session is an append-only transcript keyed by session id. The
//! store hands out per-session handles whose internal lock serializes
//! appends, so concurrent requests against one session never interleave
//! a user turn with another exchange's assistant turn.
//!
//! The store is bounded: when `max_sessions` is reached, the least
//! recently used session is evicted. History handed to pipeline stages
//! is a window of the most recent turns (`session.history_turns`), not
//! the full transcript.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::SessionConfig;
use crate::models::Message;

struct Session {
    messages: Mutex<Vec<Message>>,
    // LRU stamp, updated on every touch.
    last_used: AtomicU64,
}

pub struct SessionStore {
    sessions: std::sync::Mutex<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
    history_turns: usize,
    clock: AtomicU64,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            sessions: std::sync::Mutex::new(HashMap::new()),
            max_sessions: config.max_sessions.max(1),
            history_turns: config.history_turns,
            clock: AtomicU64::new(0),
        }
    }

    /// Fetch the session, creating it if absent. Evicts the least
    /// recently used session when the store is full.
    fn handle(&self, session_id: &str) -> Arc<Session> {
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(session) = sessions.get(session_id) {
            session.last_used.store(stamp, Ordering::Relaxed);
            return session.clone();
        }

        if sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, s)| s.last_used.load(Ordering::Relaxed))
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                sessions.remove(&id);
            }
        }

        let session = Arc::new(Session {
            messages: Mutex::new(Vec::new()),
            last_used: AtomicU64::new(stamp),
        });
        sessions.insert(session_id.to_string(), session.clone());
        session
    }

    /// Recent turns for prompt context, oldest first.
    pub async fn history(&self, session_id: &str) -> Vec<Message> {
        let session = self.handle(session_id);
        let messages = session.messages.lock().await;
        let start = messages.len().saturating_sub(self.history_turns);
        messages[start..].to_vec()
    }

    /// Full transcript, oldest first.
    pub async fn transcript(&self, session_id: &str) -> Vec<Message> {
        let session = self.handle(session_id);
        let transcript = session.messages.lock().await.clone();
        transcript
    }

    /// Append one completed exchange. Both turns land under a single
    /// lock acquisition, so the transcript always alternates correctly
    /// even when requests race on the same session.
    pub async fn append_exchange(&self, session_id: &str, user: Message, assistant: Message) {
        let session = self.handle(session_id);
        let mut messages = session.messages.lock().await;
        messages.push(user);
        messages.push(assistant);
    }

    /// Drop a session's history. The session id stays valid; the next
    /// request on it starts from an empty transcript. Returns whether
    /// the session existed.
    pub async fn clear(&self, session_id: &str) -> bool {
        let existing = {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.get(session_id).cloned()
        };
        match existing {
            Some(session) => {
                session.messages.lock().await.clear();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn store(max_sessions: usize, history_turns: usize) -> SessionStore {
        SessionStore::new(&SessionConfig {
            max_sessions,
            history_turns,
        })
    }

    fn exchange(n: usize) -> (Message, Message) {
        let mut assistant = Message::user(format!("answer {}", n));
        assistant.role = Role::Assistant;
        (Message::user(format!("question {}", n)), assistant)
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = store(8, 10);
        for n in 0..3 {
            let (user, assistant) = exchange(n);
            store.append_exchange("s1", user, assistant).await;
        }
        let transcript = store.transcript("s1").await;
        assert_eq!(transcript.len(), 6);
        assert_eq!(transcript[0].content, "question 0");
        assert_eq!(transcript[1].content, "answer 0");
        assert_eq!(transcript[4].content, "question 2");
        assert_eq!(transcript[5].content, "answer 2");
    }

    #[tokio::test]
    async fn test_history_window() {
        let store = store(8, 4);
        for n in 0..5 {
            let (user, assistant) = exchange(n);
            store.append_exchange("s1", user, assistant).await;
        }
        let window = store.history("s1").await;
        assert_eq!(window.len(), 4);
        assert_eq!(window[0].content, "question 3");
        assert_eq!(window[3].content, "answer 4");
    }

    #[tokio::test]
    async fn test_concurrent_appends_never_interleave() {
        let store = Arc::new(store(8, 100));
        let mut handles = Vec::new();
        for n in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let (user, assistant) = exchange(n);
                store.append_exchange("shared", user, assistant).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let transcript = store.transcript("shared").await;
        assert_eq!(transcript.len(), 32);
        // Every user turn is immediately followed by its own answer.
        for pair in transcript.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            let q = pair[0].content.strip_prefix("question ").unwrap();
            let a = pair[1].content.strip_prefix("answer ").unwrap();
            assert_eq!(q, a);
        }
    }

    #[tokio::test]
    async fn test_clear_empties_but_keeps_session_usable() {
        let store = store(8, 10);
        let (user, assistant) = exchange(0);
        store.append_exchange("s1", user, assistant).await;

        assert!(store.clear("s1").await);
        assert!(store.transcript("s1").await.is_empty());

        let (user, assistant) = exchange(1);
        store.append_exchange("s1", user, assistant).await;
        assert_eq!(store.transcript("s1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_unknown_session_reports_absent() {
        let store = store(8, 10);
        assert!(!store.clear("nope").await);
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let store = store(2, 10);
        let (u, a) = exchange(0);
        store.append_exchange("a", u, a).await;
        let (u, a) = exchange(1);
        store.append_exchange("b", u, a).await;
        // Touch "a" so "b" is the eviction candidate.
        let _ = store.history("a").await;
        let (u, a) = exchange(2);
        store.append_exchange("c", u, a).await;

        assert_eq!(store.len(), 2);
        assert_eq!(store.transcript("a").await.len(), 2);
        assert!(store.transcript("b").await.is_empty());
    }
}
