//! SQLite session backend.
//!
//! Single table `sessions(tg_id PRIMARY KEY, user_uuid, last_active)`;
//! `last_active` is RFC 3339 text. Naive ISO timestamps written by older
//! deployments are read as UTC.

use super::session::{Session, SessionStore};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
        }

        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA busy_timeout = 3000")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA journal_mode = WAL")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await?;

        let store = Self::from_pool(pool).await?;
        tracing::info!("Session database ready at {}", path.display());
        Ok(store)
    }

    /// Wrap an existing pool and make sure the schema exists.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                tg_id       TEXT PRIMARY KEY,
                user_uuid   TEXT NOT NULL,
                last_active TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

fn now_text() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(chat_id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| StoreError::Corrupt {
            chat_id: chat_id.to_string(),
            reason: format!("bad last_active {raw:?}: {e}"),
        })
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn add(&self, chat_id: &str, user_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sessions (tg_id, user_uuid, last_active)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(tg_id) DO UPDATE SET user_uuid = ?2, last_active = ?3",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(now_text())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, chat_id: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query("SELECT user_uuid, last_active FROM sessions WHERE tg_id = ?1")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let user_id: String = row.try_get("user_uuid")?;
        let last_active: String = row.try_get("last_active")?;
        Ok(Some(Session {
            chat_id: chat_id.to_string(),
            user_id,
            last_active: parse_timestamp(chat_id, &last_active)?,
        }))
    }

    async fn touch(&self, chat_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE sessions SET last_active = ?1 WHERE tg_id = ?2")
            .bind(now_text())
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, chat_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE tg_id = ?1")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
