use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Session used by callers that don't send a session id. All of them share one slot.
pub const DEFAULT_SESSION: &str = "default";

/// Holds the most recently generated query per session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn last_query(&self, session_id: &str) -> Option<String>;

    async fn set_last_query(&self, session_id: &str, query: String);
}

/// Sessions kept before the oldest one is dropped.
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Session ids come from clients, so the store is bounded: once
/// `max_sessions` ids are held, adding a new one evicts the oldest.
pub struct InMemorySessionStore {
    slots: RwLock<Slots>,
    max_sessions: usize,
}

#[derive(Default)]
struct Slots {
    queries: HashMap<String, String>,
    // Insertion order of the ids in `queries`
    order: VecDeque<String>,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::with_max_sessions(DEFAULT_MAX_SESSIONS)
    }
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_sessions(max_sessions: usize) -> Self {
        Self {
            slots: RwLock::new(Slots::default()),
            max_sessions: max_sessions.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.queries.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn last_query(&self, session_id: &str) -> Option<String> {
        let slots = self.slots.read().await;
        slots.queries.get(session_id).cloned()
    }

    async fn set_last_query(&self, session_id: &str, query: String) {
        let mut slots = self.slots.write().await;
        if slots.queries.insert(session_id.to_string(), query).is_some() {
            return;
        }

        slots.order.push_back(session_id.to_string());
        while slots.order.len() > self.max_sessions {
            if let Some(oldest) = slots.order.pop_front() {
                slots.queries.remove(&oldest);
                tracing::debug!("[Session] evicted {}", oldest);
            }
        }
    }
}
