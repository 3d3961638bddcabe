//! Per-user Telegram connection config.
//!
//! Each web user owns one JSON file `{dir}/{user_id}.json`. Reverse lookups
//! (by bot token or auth token) scan the whole directory in file-name order;
//! that is O(users) per lookup and only meant for small deployments.

use crate::error::StoreError;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Filled from the file name when the record omits it.
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl UserConfig {
    /// Both the bot token and the chat id are present.
    pub fn is_complete(&self) -> bool {
        !self.bot_token.trim().is_empty() && !self.chat_id.trim().is_empty()
    }
}

/// Accept `"123"` and `123` alike; Telegram chat ids arrive as either.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}

/// Directory of per-user config files.
#[derive(Debug, Clone)]
pub struct UserConfigStore {
    dir: PathBuf,
}

impl UserConfigStore {
    /// Open the store, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn config_path(&self, user_id: &str) -> Result<PathBuf, StoreError> {
        validate_user_id(user_id)?;
        Ok(self.dir.join(format!("{user_id}.json")))
    }

    /// Write `config` for `user_id`, replacing any previous record.
    pub async fn save(&self, user_id: &str, config: &UserConfig) -> Result<(), StoreError> {
        let path = self.config_path(user_id)?;
        let mut record = config.clone();
        record.user_id = user_id.to_string();

        let body = serde_json::to_vec(&record).map_err(|source| StoreError::Json {
            path: path.display().to_string(),
            source,
        })?;

        // Write-then-rename so concurrent readers never see a half-written file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        tracing::info!(user_id, "Telegram config saved");
        Ok(())
    }

    /// Load the record for `user_id`; `Ok(None)` when there is none.
    pub async fn load(&self, user_id: &str) -> Result<Option<UserConfig>, StoreError> {
        let path = self.config_path(user_id)?;
        match read_config(&path).await {
            Ok(mut config) => {
                if config.user_id.is_empty() {
                    config.user_id = user_id.to_string();
                }
                Ok(Some(config))
            }
            Err(StoreError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(user_id, "No config file found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether a record exists for `user_id`.
    pub async fn exists(&self, user_id: &str) -> Result<bool, StoreError> {
        let path = self.config_path(user_id)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))
    }

    /// Remove the record. Returns `false` when there was nothing to remove.
    pub async fn delete(&self, user_id: &str) -> Result<bool, StoreError> {
        let path = self.config_path(user_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(user_id, "Telegram config removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Every readable record, in file-name order. Unreadable files are skipped.
    pub async fn list(&self) -> Result<Vec<UserConfig>, StoreError> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut configs = Vec::with_capacity(paths.len());
        for path in paths {
            match read_config(&path).await {
                Ok(mut config) => {
                    if config.user_id.is_empty() {
                        config.user_id = file_stem(&path);
                    }
                    configs.push(config);
                }
                Err(e) => tracing::warn!("Skipping unreadable config {}: {}", path.display(), e),
            }
        }
        Ok(configs)
    }

    /// First record whose bot token equals `bot_token`.
    pub async fn find_by_bot_token(&self, bot_token: &str) -> Result<Option<UserConfig>, StoreError> {
        if bot_token.is_empty() {
            return Ok(None);
        }
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|c| c.bot_token == bot_token))
    }

    /// First record whose auth token equals `auth_token`.
    pub async fn find_by_auth_token(
        &self,
        auth_token: &str,
    ) -> Result<Option<UserConfig>, StoreError> {
        if auth_token.is_empty() {
            return Ok(None);
        }
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|c| c.auth_token.as_deref() == Some(auth_token)))
    }

    /// Every non-empty bot token, in file-name order.
    pub async fn bot_tokens(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .map(|c| c.bot_token)
            .filter(|t| !t.is_empty())
            .collect())
    }
}

async fn read_config(path: &Path) -> Result<UserConfig, StoreError> {
    let body = tokio::fs::read(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    serde_json::from_slice(&body).map_err(|source| StoreError::Json {
        path: path.display().to_string(),
        source,
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// User ids become file names, so only a conservative character set passes.
fn validate_user_id(user_id: &str) -> Result<(), StoreError> {
    let ok = !user_id.is_empty()
        && user_id.len() <= 128
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !user_id.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(user_id.to_string()))
    }
}
