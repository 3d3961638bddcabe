//! Persistence
//!
//! Two stores back the relay:
//! - [`UserConfigStore`]: one JSON file per web user holding the bot token,
//!   chat id and auth token. It also serves as the connection registry, so
//!   every instance sharing the directory sees the same connections.
//! - [`SessionStore`]: chat identity → web user, with SQLite, Redis and
//!   in-memory backends.

mod redis_backend;
mod session;
mod sqlite;
mod user_config;

pub use redis_backend::RedisSessionStore;
pub use session::{MemorySessionStore, Session, SessionStore};
pub use sqlite::SqliteSessionStore;
pub use user_config::{UserConfig, UserConfigStore};

pub(crate) use user_config::string_or_number;

use crate::config::{SessionBackend, SessionConfig};
use crate::error::StoreError;
use std::sync::Arc;

/// Build the session backend selected in `config`.
pub async fn open_session_store(config: &SessionConfig) -> Result<Arc<dyn SessionStore>, StoreError> {
    let store: Arc<dyn SessionStore> = match config.backend {
        SessionBackend::Sqlite => Arc::new(SqliteSessionStore::open(&config.sqlite_path).await?),
        SessionBackend::Redis => {
            tracing::info!(prefix = %config.redis_prefix, "Using Redis session backend");
            Arc::new(RedisSessionStore::new(&config.redis_url, &config.redis_prefix)?)
        }
        SessionBackend::Memory => {
            tracing::warn!("Using in-memory session backend; sessions are lost on restart");
            Arc::new(MemorySessionStore::new())
        }
    };
    Ok(store)
}
