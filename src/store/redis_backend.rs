//! Redis/Valkey session backend.
//!
//! One hash per chat at `{prefix}:{tg_id}` with fields `user_uuid` and
//! `last_active` (RFC 3339). Sessions never expire on their own.

use super::session::{Session, SessionStore};
use super::sqlite::parse_timestamp;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use redis::FromRedisValue;
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const FIELD_USER: &str = "user_uuid";
const FIELD_LAST_ACTIVE: &str = "last_active";

/// Update `last_active` only when the hash still exists, so a concurrent
/// delete cannot leave a hash behind without its user.
const TOUCH_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
end
return 0
";

#[derive(Clone)]
pub struct RedisSessionStore {
    client: redis::Client,
    key_prefix: String,
    connection: Arc<Mutex<Option<MultiplexedConnection>>>,
    touch_script: redis::Script,
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisSessionStore {
    /// Create the store. The connection is opened on first use.
    pub fn new(url: &str, key_prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let key_prefix = key_prefix.trim().trim_end_matches(':');
        Ok(Self {
            client,
            key_prefix: if key_prefix.is_empty() {
                "tg-relay:session".to_string()
            } else {
                key_prefix.to_string()
            },
            connection: Arc::new(Mutex::new(None)),
            touch_script: redis::Script::new(TOUCH_SCRIPT),
        })
    }

    fn session_key(&self, chat_id: &str) -> String {
        format!("{}:{}", self.key_prefix, chat_id)
    }

    /// Shared multiplexed connection, opened on first use. The lock only
    /// guards the cached handle; commands run on a clone so they pipeline.
    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        tracing::debug!(key_prefix = %self.key_prefix, "Redis session backend connected");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// A failed command drops the cached connection so the next call starts
    /// fresh; it is not retried.
    async fn finish<T>(
        &self,
        operation: &'static str,
        result: redis::RedisResult<T>,
    ) -> Result<T, StoreError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(operation, error = %e, "Redis session command failed");
                *self.connection.lock().await = None;
                Err(e.into())
            }
        }
    }

    async fn run<T: FromRedisValue + Send>(
        &self,
        operation: &'static str,
        cmd: redis::Cmd,
    ) -> Result<T, StoreError> {
        let mut conn = self.connection().await?;
        let result = cmd.query_async(&mut conn).await;
        self.finish(operation, result).await
    }
}

fn now_text() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn add(&self, chat_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("HSET");
        cmd.arg(self.session_key(chat_id))
            .arg(FIELD_USER)
            .arg(user_id)
            .arg(FIELD_LAST_ACTIVE)
            .arg(now_text());
        self.run::<i64>("add", cmd).await?;
        Ok(())
    }

    async fn get(&self, chat_id: &str) -> Result<Option<Session>, StoreError> {
        let mut cmd = redis::cmd("HGETALL");
        cmd.arg(self.session_key(chat_id));
        let fields: HashMap<String, String> = self.run("get", cmd).await?;
        if !fields.is_empty() && !has_user(&fields) {
            tracing::warn!(chat_id, "Dropping session hash without a user");
            self.delete(chat_id).await?;
            return Ok(None);
        }
        session_from_fields(chat_id, fields)
    }

    async fn touch(&self, chat_id: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<i64> = self
            .touch_script
            .key(self.session_key(chat_id))
            .arg(FIELD_LAST_ACTIVE)
            .arg(now_text())
            .invoke_async(&mut conn)
            .await;
        self.finish("touch", result).await?;
        Ok(())
    }

    async fn delete(&self, chat_id: &str) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.session_key(chat_id));
        self.run::<i64>("delete", cmd).await?;
        Ok(())
    }
}

fn has_user(fields: &HashMap<String, String>) -> bool {
    fields.get(FIELD_USER).is_some_and(|u| !u.is_empty())
}

/// An empty hash is a miss; a hash without a user is corrupt. `get` clears
/// user-less hashes before they get here.
fn session_from_fields(
    chat_id: &str,
    mut fields: HashMap<String, String>,
) -> Result<Option<Session>, StoreError> {
    if fields.is_empty() {
        return Ok(None);
    }
    let user_id = fields
        .remove(FIELD_USER)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| StoreError::Corrupt {
            chat_id: chat_id.to_string(),
            reason: "missing user_uuid".to_string(),
        })?;
    let last_active = match fields.remove(FIELD_LAST_ACTIVE) {
        Some(raw) => parse_timestamp(chat_id, &raw)?,
        None => Utc::now(),
    };
    Ok(Some(Session {
        chat_id: chat_id.to_string(),
        user_id,
        last_active,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_layout() {
        let store = RedisSessionStore::new("redis://127.0.0.1:6379/0", "relay:sessions:")
            .expect("client");
        assert_eq!(store.session_key("42"), "relay:sessions:42");

        let store = RedisSessionStore::new("redis://127.0.0.1:6379/0", "  ").expect("client");
        assert_eq!(store.session_key("42"), "tg-relay:session:42");
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(RedisSessionStore::new("not a url", "p").is_err());
    }

    #[test]
    fn test_fields_to_session() {
        assert_eq!(session_from_fields("1", HashMap::new()).expect("miss"), None);

        let fields = HashMap::from([
            (FIELD_USER.to_string(), "user-a".to_string()),
            (
                FIELD_LAST_ACTIVE.to_string(),
                "2024-05-01T10:20:30Z".to_string(),
            ),
        ]);
        let session = session_from_fields("1", fields)
            .expect("parse")
            .expect("present");
        assert_eq!(session.user_id, "user-a");

        let broken = HashMap::from([(FIELD_LAST_ACTIVE.to_string(), "x".to_string())]);
        assert!(session_from_fields("1", broken).is_err());
    }

    #[test]
    fn test_orphaned_hash_has_no_user() {
        let orphan = HashMap::from([(
            FIELD_LAST_ACTIVE.to_string(),
            "2024-05-01T10:20:30Z".to_string(),
        )]);
        assert!(!has_user(&orphan));

        let blank = HashMap::from([(FIELD_USER.to_string(), String::new())]);
        assert!(!has_user(&blank));

        let owned = HashMap::from([(FIELD_USER.to_string(), "user-a".to_string())]);
        assert!(has_user(&owned));
    }
}
