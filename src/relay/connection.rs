//! Connection management for per-user bots.
//!
//! A connection is the user's stored [`UserConfig`]: it is created once the
//! bot token, the test message and the webhook registration all succeed, and
//! removed on disconnect. Because it lives in the shared config store, every
//! relay instance pointed at the same directory agrees on connection status.

use crate::config::Secret;
use crate::error::{ConnectionError, TelegramError};
use crate::store::{UserConfig, UserConfigStore};
use crate::telegram::{BotApi, ParseMode};
use crate::templates::MessageTemplates;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Outcome of checking one bot's webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookCheck {
    /// Numeric bot id (the part of the token before `:`), never the secret.
    pub bot_id: String,
    /// The webhook was (re-)registered during this check.
    pub registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ConnectionManager {
    bot: Arc<dyn BotApi>,
    configs: UserConfigStore,
    templates: Arc<MessageTemplates>,
    server_address: String,
    webhook_secret: Option<Secret>,
}

impl ConnectionManager {
    pub fn new(
        bot: Arc<dyn BotApi>,
        configs: UserConfigStore,
        templates: Arc<MessageTemplates>,
        server_address: impl Into<String>,
        webhook_secret: Option<Secret>,
    ) -> Self {
        Self {
            bot,
            configs,
            templates,
            server_address: server_address.into().trim_end_matches('/').to_string(),
            webhook_secret,
        }
    }

    fn webhook_url(&self, bot_token: &str) -> String {
        format!("{}/webhook/{}", self.server_address, bot_token)
    }

    async fn register_webhook(&self, bot_token: &str) -> Result<(), ConnectionError> {
        let url = self.webhook_url(bot_token);
        let secret = self.webhook_secret.as_ref().map(Secret::expose);
        self.bot
            .set_webhook(bot_token, &url, secret)
            .await
            .map_err(|e| match e {
                TelegramError::Rejected { description, .. } => {
                    ConnectionError::WebhookRejected { description }
                }
                other => ConnectionError::Upstream(other),
            })
    }

    /// Validate the bot token, prove the chat is reachable, register the
    /// webhook and store the connection. Stops at the first failing stage.
    pub async fn set_webhook(
        &self,
        user_id: &str,
        bot_token: &str,
        chat_id: &str,
    ) -> Result<(), ConnectionError> {
        let user_id = require(user_id, "user_id")?;
        let bot_token = require(bot_token, "bot_token")?;
        let chat_id = require(chat_id, "chat_id")?;
        // Also validates the user id before anything is sent.
        let existing = self.configs.load(user_id).await?;

        tracing::info!(user_id, "Testing Telegram connection");
        match self.bot.get_me(bot_token).await {
            Ok(me) => tracing::debug!(user_id, bot = ?me.username, "Bot token accepted"),
            Err(TelegramError::Rejected { .. }) => {
                tracing::warn!(user_id, "Invalid bot token");
                return Err(ConnectionError::InvalidBotToken);
            }
            Err(e) => return Err(ConnectionError::Upstream(e)),
        }

        let text = self.templates.telegram_connected(&self.server_address);
        match self
            .bot
            .send_message(bot_token, chat_id, &text, Some(ParseMode::Html))
            .await
        {
            Ok(_) => {}
            Err(TelegramError::Rejected { description, .. }) => {
                tracing::warn!(user_id, chat_id, ?description, "Test message rejected");
                return Err(ConnectionError::ChatUnreachable {
                    chat_id: chat_id.to_string(),
                });
            }
            Err(e) => return Err(ConnectionError::Upstream(e)),
        }

        self.register_webhook(bot_token).await?;

        let config = UserConfig {
            user_id: user_id.to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            auth_token: existing.and_then(|c| c.auth_token),
        };
        self.configs.save(user_id, &config).await?;

        tracing::info!(user_id, chat_id, "Telegram connected");
        Ok(())
    }

    /// Send `message_text` to the user's connected chat. Returns Telegram's
    /// message id.
    pub async fn send_message(
        &self,
        user_id: &str,
        message_text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<i64, ConnectionError> {
        let user_id = require(user_id, "user_id")?;
        if message_text.trim().is_empty() {
            return Err(ConnectionError::MessageRequired);
        }

        let config = self
            .configs
            .load(user_id)
            .await?
            .ok_or_else(|| ConnectionError::NotConnected(user_id.to_string()))?;
        if !config.is_complete() {
            tracing::error!(user_id, "Incomplete Telegram config");
            return Err(ConnectionError::IncompleteConfig(user_id.to_string()));
        }

        match self
            .bot
            .send_message(&config.bot_token, &config.chat_id, message_text, parse_mode)
            .await
        {
            Ok(sent) => {
                tracing::info!(user_id, message_id = sent.message_id, "Message sent");
                Ok(sent.message_id)
            }
            Err(TelegramError::Rejected { description, .. }) => {
                tracing::error!(user_id, ?description, "Telegram API error");
                Err(ConnectionError::Telegram { description })
            }
            Err(e) => Err(ConnectionError::Upstream(e)),
        }
    }

    pub async fn disconnect(&self, user_id: &str) -> Result<(), ConnectionError> {
        let user_id = require(user_id, "user_id")?;
        if self.configs.delete(user_id).await? {
            Ok(())
        } else {
            Err(ConnectionError::NotFound(user_id.to_string()))
        }
    }

    pub async fn status(&self, user_id: &str) -> Result<ConnectionStatus, ConnectionError> {
        let user_id = require(user_id, "user_id")?;
        Ok(if self.configs.exists(user_id).await? {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        })
    }

    /// Make sure Telegram delivers `bot_token`'s updates to this relay.
    /// Registers the webhook when none is set or it points elsewhere and
    /// returns whether it did.
    pub async fn check_webhook(&self, bot_token: &str) -> Result<bool, ConnectionError> {
        let info = self
            .bot
            .get_webhook_info(bot_token)
            .await
            .map_err(|e| match e {
                TelegramError::Rejected { description, .. } => {
                    ConnectionError::WebhookRejected { description }
                }
                other => ConnectionError::Upstream(other),
            })?;

        let expected = self.webhook_url(bot_token);
        if info.url == expected {
            return Ok(false);
        }

        if !info.url.is_empty() {
            tracing::warn!(bot_id = bot_id(bot_token), "Webhook points elsewhere, re-registering");
        }
        self.register_webhook(bot_token).await?;
        tracing::info!(bot_id = bot_id(bot_token), "Webhook registered");
        Ok(true)
    }

    /// Run [`check_webhook`](Self::check_webhook) for every stored bot.
    /// Individual failures are reported per bot and do not stop the batch.
    pub async fn set_webhooks(&self) -> Result<Vec<WebhookCheck>, ConnectionError> {
        let tokens = self.configs.bot_tokens().await?;
        let mut report = Vec::with_capacity(tokens.len());
        for token in tokens {
            let check = match self.check_webhook(&token).await {
                Ok(registered) => WebhookCheck {
                    bot_id: bot_id(&token).to_string(),
                    registered,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(bot_id = bot_id(&token), error = %e, "Webhook check failed");
                    WebhookCheck {
                        bot_id: bot_id(&token).to_string(),
                        registered: false,
                        error: Some(e.public_message()),
                    }
                }
            };
            report.push(check);
        }
        Ok(report)
    }

    /// Issue a fresh auth token for a connected user, replacing any previous
    /// one. The user sends it to the bot as `/auth <token>`.
    pub async fn issue_auth_token(&self, user_id: &str) -> Result<String, ConnectionError> {
        let user_id = require(user_id, "user_id")?;
        let mut config = self
            .configs
            .load(user_id)
            .await?
            .ok_or_else(|| ConnectionError::NotConnected(user_id.to_string()))?;

        let token = Uuid::new_v4().simple().to_string();
        config.auth_token = Some(token.clone());
        self.configs.save(user_id, &config).await?;

        tracing::info!(user_id, "Auth token issued");
        Ok(token)
    }
}

fn require<'a>(value: &'a str, field: &'static str) -> Result<&'a str, ConnectionError> {
    match value.trim() {
        "" => Err(ConnectionError::MissingField(field)),
        v => Ok(v),
    }
}

/// Bot id part of a token, safe to log and return.
fn bot_id(bot_token: &str) -> &str {
    bot_token.split(':').next().unwrap_or_default()
}
