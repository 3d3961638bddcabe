//! Configuration
//!
//! Layered settings, lowest precedence first:
//! built-in defaults, an optional TOML file, `TG_RELAY_*` environment
//! variables (nested keys use `__`, e.g. `TG_RELAY_SESSION__BACKEND`),
//! then command-line overrides. `instance/.env` is loaded into the
//! environment beforehand when it exists.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroizing;

const ENV_PREFIX: &str = "TG_RELAY";
const DOTENV_PATH: &str = "instance/.env";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Source(#[from] config::ConfigError),
}

/// Secret string that never shows up in `Debug` output and is wiped on drop.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Which backend holds chat → web user sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    Sqlite,
    Redis,
    /// Process-local map. Sessions are lost on restart and are not shared
    /// between instances.
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub backend: SessionBackend,
    pub sqlite_path: PathBuf,
    pub redis_url: String,
    pub redis_prefix: String,
}

/// Values supplied on the command line. `None` leaves the layered value alone.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub secret_key: Option<String>,
    pub server_address: Option<String>,
    pub agent_url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub debug: Option<bool>,
}

/// Shape of the merged sources before validation.
#[derive(Debug, Deserialize)]
struct RawConfig {
    secret_key: Option<String>,
    debug: bool,
    host: String,
    port: u16,
    server_address: Option<String>,
    agent_url: Option<String>,
    telegram_api_url: String,
    config_dir: PathBuf,
    http_timeout_secs: u64,
    require_webhook_secret: bool,
    auth_reply_fallthrough: bool,
    session_ttl_secs: Option<u64>,
    templates_path: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    session: SessionConfig,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub secret_key: Secret,
    pub debug: bool,
    pub host: String,
    pub port: u16,
    /// Public base URL Telegram uses to reach this relay.
    pub server_address: String,
    pub agent_url: String,
    pub telegram_api_url: String,
    pub config_dir: PathBuf,
    pub http_timeout: Duration,
    pub require_webhook_secret: bool,
    /// Send the "authentication required" reply even after an authenticated
    /// message was answered.
    pub auth_reply_fallthrough: bool,
    pub session_ttl: Option<Duration>,
    pub templates_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub session: SessionConfig,
}

impl RelayConfig {
    /// Load `instance/.env` (if present) and build the configuration.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        if Path::new(DOTENV_PATH).exists() {
            if let Err(e) = dotenvy::from_path(DOTENV_PATH) {
                // Logging is not initialised yet.
                eprintln!("Warning: failed to read {DOTENV_PATH}: {e}");
            }
        }
        Self::from_sources(overrides)
    }

    /// Build the configuration from defaults, file, environment and overrides
    /// without touching `.env`.
    pub fn from_sources(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("debug", false)?
            .set_default("host", "127.0.0.1")?
            .set_default("port", 5001)?
            .set_default("telegram_api_url", "https://api.telegram.org")?
            .set_default("config_dir", "instance/user_configs")?
            .set_default("http_timeout_secs", 10)?
            .set_default("require_webhook_secret", false)?
            .set_default("auth_reply_fallthrough", true)?
            .set_default("session.backend", "sqlite")?
            .set_default("session.sqlite_path", "instance/sessions.db")?
            .set_default("session.redis_url", "redis://127.0.0.1:6379/0")?
            .set_default("session.redis_prefix", "tg-relay:session")?;

        if let Some(path) = &overrides.config_file {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        builder = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("secret_key", overrides.secret_key.clone())?
            .set_override_option("server_address", overrides.server_address.clone())?
            .set_override_option("agent_url", overrides.agent_url.clone())?
            .set_override_option("host", overrides.host.clone())?
            .set_override_option("port", overrides.port.map(i64::from))?
            .set_override_option("debug", overrides.debug)?;

        let raw: RawConfig = builder.build()?.try_deserialize()?;
        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> Result<Self, ConfigError> {
        let secret_key = required(raw.secret_key, "secret_key")?;
        let server_address = required(raw.server_address, "server_address")?;
        let agent_url = required(raw.agent_url, "agent_url")?;

        for (field, url) in [
            ("server_address", &server_address),
            ("agent_url", &agent_url),
            ("telegram_api_url", &raw.telegram_api_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("expected an http(s) URL, got {url:?}"),
                });
            }
        }

        if raw.http_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "http_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }

        // Telegram only accepts `A-Za-z0-9_-`, at most 256 chars, as secret_token.
        if raw.require_webhook_secret
            && (secret_key.len() > 256
                || !secret_key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        {
            return Err(ConfigError::Invalid {
                field: "secret_key",
                reason: "webhook secret may only contain A-Z, a-z, 0-9, `_` and `-` (max 256)"
                    .to_string(),
            });
        }

        Ok(Self {
            secret_key: Secret::new(secret_key),
            debug: raw.debug,
            host: raw.host,
            port: raw.port,
            server_address: server_address.trim_end_matches('/').to_string(),
            agent_url: agent_url.trim_end_matches('/').to_string(),
            telegram_api_url: raw.telegram_api_url.trim_end_matches('/').to_string(),
            config_dir: raw.config_dir,
            http_timeout: Duration::from_secs(raw.http_timeout_secs),
            require_webhook_secret: raw.require_webhook_secret,
            auth_reply_fallthrough: raw.auth_reply_fallthrough,
            session_ttl: raw.session_ttl_secs.filter(|s| *s > 0).map(Duration::from_secs),
            templates_path: raw.templates_path,
            log_dir: raw.log_dir,
            session: raw.session,
        })
    }

    /// Address the HTTP server binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::Missing(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides() -> ConfigOverrides {
        ConfigOverrides {
            secret_key: Some("s3cret".to_string()),
            server_address: Some("https://relay.example.com/".to_string()),
            agent_url: Some("http://localhost:5001/api".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_with_required_overrides() {
        let cfg = RelayConfig::from_sources(&overrides()).expect("config");
        assert_eq!(cfg.port, 5001);
        assert_eq!(cfg.session.backend, SessionBackend::Sqlite);
        assert_eq!(cfg.http_timeout, Duration::from_secs(10));
        assert!(cfg.auth_reply_fallthrough);
        assert!(cfg.session_ttl.is_none());
        assert_eq!(cfg.server_address, "https://relay.example.com");
    }

    #[test]
    fn test_missing_secret_key_is_fatal() {
        let mut o = overrides();
        // Overrides win over the environment, so a blank value is seen as-is.
        o.secret_key = Some("   ".to_string());
        let err = RelayConfig::from_sources(&o).expect_err("must fail");
        assert!(matches!(err, ConfigError::Missing("secret_key")));
    }

    #[test]
    fn test_file_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("relay.toml");
        std::fs::write(
            &path,
            "port = 8088\nsession_ttl_secs = 300\nauth_reply_fallthrough = false\n\
             [session]\nbackend = \"memory\"\n",
        )
        .expect("write");

        let mut o = overrides();
        o.config_file = Some(path);
        let cfg = RelayConfig::from_sources(&o).expect("config");
        assert_eq!(cfg.port, 8088);
        assert_eq!(cfg.session.backend, SessionBackend::Memory);
        assert_eq!(cfg.session_ttl, Some(Duration::from_secs(300)));
        assert!(!cfg.auth_reply_fallthrough);
        // Untouched nested defaults survive a partial table.
        assert_eq!(cfg.session.redis_prefix, "tg-relay:session");
    }

    #[test]
    fn test_secret_is_redacted() {
        let cfg = RelayConfig::from_sources(&overrides()).expect("config");
        assert_eq!(cfg.secret_key.expose(), "s3cret");
        assert!(!format!("{cfg:?}").contains("s3cret"));
    }

    #[test]
    fn test_webhook_secret_charset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "require_webhook_secret = true\n").expect("write");

        let mut o = overrides();
        o.config_file = Some(path);
        assert!(RelayConfig::from_sources(&o).is_ok());

        o.secret_key = Some("not allowed!".to_string());
        let err = RelayConfig::from_sources(&o).expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid { field: "secret_key", .. }));
    }

    #[test]
    fn test_rejects_non_http_agent_url() {
        let mut o = overrides();
        o.agent_url = Some("localhost:5001".to_string());
        let err = RelayConfig::from_sources(&o).expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid { field: "agent_url", .. }));
    }
}
