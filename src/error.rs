//! Error types shared across the relay.
//!
//! Each layer has its own enum; the HTTP layer maps them onto status codes
//! and localized messages so internal detail never reaches Telegram users or
//! management callers.

use thiserror::Error;

/// Errors from the Telegram Bot API client.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// The request never produced a usable response (connect, timeout, body).
    #[error("telegram transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Telegram answered with `ok: false`.
    #[error("telegram rejected {method}: {}", description.as_deref().unwrap_or("no description"))]
    Rejected {
        method: &'static str,
        description: Option<String>,
    },
}

impl TelegramError {
    /// Telegram's own description, when it gave one.
    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Rejected { description, .. } => description.as_deref(),
            Self::Transport(_) => None,
        }
    }
}

/// Errors from the command agent client.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Errors from the user config and session stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid json in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid store key {0:?}")]
    InvalidKey(String),

    #[error("corrupt session record for {chat_id}: {reason}")]
    Corrupt { chat_id: String, reason: String },
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Errors raised while handling a webhook update.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("update carries no message")]
    NoMessage,

    #[error("message has no sender")]
    NoSender,

    #[error(transparent)]
    Telegram(#[from] TelegramError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the connection manager, one variant per caller-visible outcome.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid bot token")]
    InvalidBotToken,

    #[error("test message could not be delivered to chat {chat_id}")]
    ChatUnreachable { chat_id: String },

    #[error("webhook registration rejected: {}", description.as_deref().unwrap_or("no description"))]
    WebhookRejected { description: Option<String> },

    #[error("message text is required")]
    MessageRequired,

    #[error("user {0} has no telegram connection")]
    NotConnected(String),

    #[error("incomplete telegram config for user {0}")]
    IncompleteConfig(String),

    #[error("telegram rejected the message: {}", description.as_deref().unwrap_or("no description"))]
    Telegram { description: Option<String> },

    #[error("no connection found for user {0}")]
    NotFound(String),

    #[error("upstream telegram error: {0}")]
    Upstream(#[source] TelegramError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ConnectionError {
    /// Localized text safe to hand to management callers. Telegram's own
    /// description is passed through for rejections; transport and storage
    /// detail never is.
    pub fn public_message(&self) -> String {
        match self {
            Self::MissingField(field) => format!("Поле {field} обязательно для заполнения"),
            Self::InvalidBotToken => "Неверный токен бота".to_string(),
            Self::ChatUnreachable { .. } => {
                "Не удалось отправить сообщение (проверьте Chat ID)".to_string()
            }
            Self::WebhookRejected { description } => description
                .clone()
                .unwrap_or_else(|| "Не удалось установить вебхук".to_string()),
            Self::MessageRequired => "Сообщение обязательно для заполнения".to_string(),
            Self::NotConnected(_) => "Телеграм бот не подключен".to_string(),
            Self::IncompleteConfig(_) => "Неполная конфигурация Telegram".to_string(),
            Self::Telegram { description } => description
                .clone()
                .unwrap_or_else(|| "Не удалось отправить сообщение".to_string()),
            Self::NotFound(_) => "Подключение Telegram не найдено".to_string(),
            Self::Upstream(_) => "Ошибка соединения с Telegram".to_string(),
            Self::Store(StoreError::InvalidKey(_)) => {
                "Некорректный идентификатор пользователя".to_string()
            }
            Self::Store(_) => "Внутренняя ошибка сервера".to_string(),
        }
    }
}
