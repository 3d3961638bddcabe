//! Chat → web user sessions.
//!
//! A session binds a Telegram chat identity to the web user that proved
//! ownership of an auth token. Every backend offers the same four operations
//! with the same semantics: `add` overwrites, `get` misses with `Ok(None)`,
//! `touch` and `delete` on a missing session are no-ops.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub chat_id: String,
    pub user_id: String,
    pub last_active: DateTime<Utc>,
}

impl Session {
    /// Inactive for longer than `ttl` as of `now`.
    pub fn is_stale(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(self.last_active) > ttl,
            Err(_) => false,
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create or overwrite the session for `chat_id`.
    async fn add(&self, chat_id: &str, user_id: &str) -> Result<(), StoreError>;

    async fn get(&self, chat_id: &str) -> Result<Option<Session>, StoreError>;

    /// Set `last_active` to now.
    async fn touch(&self, chat_id: &str) -> Result<(), StoreError>;

    async fn delete(&self, chat_id: &str) -> Result<(), StoreError>;
}

/// Process-local session map.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn add(&self, chat_id: &str, user_id: &str) -> Result<(), StoreError> {
        let session = Session {
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
            last_active: Utc::now(),
        };
        self.sessions
            .write()
            .await
            .insert(chat_id.to_string(), session);
        Ok(())
    }

    async fn get(&self, chat_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(chat_id).cloned())
    }

    async fn touch(&self, chat_id: &str) -> Result<(), StoreError> {
        if let Some(session) = self.sessions.write().await.get_mut(chat_id) {
            session.last_active = Utc::now();
        }
        Ok(())
    }

    async fn delete(&self, chat_id: &str) -> Result<(), StoreError> {
        self.sessions.write().await.remove(chat_id);
        Ok(())
    }
}

#[cfg(test)]
impl MemorySessionStore {
    /// Seed a session with an arbitrary activity time.
    pub(crate) async fn insert_with_last_active(
        &self,
        chat_id: &str,
        user_id: &str,
        last_active: DateTime<Utc>,
    ) {
        let session = Session {
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
            last_active,
        };
        self.sessions
            .write()
            .await
            .insert(chat_id.to_string(), session);
    }
}
