//! Webhook command handling.
//!
//! Routes each inbound update by its text prefix:
//! - `/start` → greeting with the sender's first name
//! - `/auth <token>` → bind the chat to the web user owning `token`
//! - `/help` → command list
//! - anything else → forward to the agent for an authenticated chat

use crate::agent::AgentClient;
use crate::error::{RelayError, TelegramError};
use crate::store::{SessionStore, UserConfigStore};
use crate::telegram::types::{Message, User};
use crate::telegram::{BotApi, Update};
use crate::templates::MessageTemplates;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Auth,
    Help,
    /// Free text for the agent.
    Message,
}

impl Command {
    /// Classify by prefix. Text without a known command prefix, including
    /// empty text, is a plain message.
    pub fn parse(text: &str) -> Self {
        if text.starts_with("/start") {
            Self::Start
        } else if text.starts_with("/auth") {
            Self::Auth
        } else if text.starts_with("/help") {
            Self::Help
        } else {
            Self::Message
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HandlerSettings {
    /// Also send the "authentication required" reply after an authenticated
    /// message has been answered. Matches the historical behaviour.
    pub auth_reply_fallthrough: bool,
    /// Sessions idle for longer than this are dropped on the next message.
    pub session_ttl: Option<Duration>,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            auth_reply_fallthrough: true,
            session_ttl: None,
        }
    }
}

pub struct CommandHandler {
    bot: Arc<dyn BotApi>,
    agent: Arc<dyn AgentClient>,
    sessions: Arc<dyn SessionStore>,
    configs: UserConfigStore,
    templates: Arc<MessageTemplates>,
    settings: HandlerSettings,
}

/// Sender and reply target of one message.
struct Origin<'a> {
    user: &'a User,
    /// Session key: the sender's Telegram id.
    sender_id: String,
    /// Where replies go: the chat, or the sender when the chat is absent.
    reply_to: String,
}

impl<'a> Origin<'a> {
    fn of(message: &'a Message) -> Result<Self, RelayError> {
        let user = message.from.as_ref().ok_or(RelayError::NoSender)?;
        let reply_to = message
            .chat
            .as_ref()
            .map(|c| c.id)
            .unwrap_or(user.id)
            .to_string();
        Ok(Self {
            user,
            sender_id: user.id.to_string(),
            reply_to,
        })
    }
}

impl CommandHandler {
    pub fn new(
        bot: Arc<dyn BotApi>,
        agent: Arc<dyn AgentClient>,
        sessions: Arc<dyn SessionStore>,
        configs: UserConfigStore,
        templates: Arc<MessageTemplates>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            bot,
            agent,
            sessions,
            configs,
            templates,
            settings,
        }
    }

    /// Dispatch one update received on the webhook of `bot_token`.
    pub async fn handle_update(
        &self,
        update: &Update,
        bot_token: &str,
    ) -> Result<Command, RelayError> {
        let message = update.message.as_ref().ok_or(RelayError::NoMessage)?;
        let origin = Origin::of(message)?;
        let text = message.text.as_deref().unwrap_or("");
        let command = Command::parse(text);

        tracing::debug!(sender = %origin.sender_id, ?command, "Dispatching update");

        match command {
            Command::Start => self.handle_start(&origin, bot_token).await?,
            Command::Auth => self.handle_auth(&origin, text, bot_token).await?,
            Command::Help => self.reply(bot_token, &origin, self.templates.help()).await?,
            Command::Message => self.handle_message(&origin, text, bot_token).await?,
        }
        Ok(command)
    }

    async fn handle_start(&self, origin: &Origin<'_>, bot_token: &str) -> Result<(), RelayError> {
        let text = self.templates.start(&origin.user.first_name);
        self.reply(bot_token, origin, text).await
    }

    async fn handle_auth(
        &self,
        origin: &Origin<'_>,
        text: &str,
        bot_token: &str,
    ) -> Result<(), RelayError> {
        let Some(auth_token) = text.split_whitespace().nth(1) else {
            let reply = self.templates.auth_missing_token(&origin.user.first_name);
            return self.reply(bot_token, origin, reply).await;
        };

        match self.configs.find_by_auth_token(auth_token).await? {
            Some(config) => {
                self.sessions.add(&origin.sender_id, &config.user_id).await?;
                tracing::info!(
                    sender = %origin.sender_id,
                    user_id = %config.user_id,
                    "Chat authenticated"
                );
                let reply = self.templates.welcome(&origin.user.first_name);
                self.reply(bot_token, origin, reply).await
            }
            None => {
                tracing::info!(sender = %origin.sender_id, "Rejected unknown auth token");
                self.reply(bot_token, origin, self.templates.auth_invalid())
                    .await
            }
        }
    }

    async fn handle_message(
        &self,
        origin: &Origin<'_>,
        text: &str,
        bot_token: &str,
    ) -> Result<(), RelayError> {
        let mut answered = false;

        if let Some(session) = self.sessions.get(&origin.sender_id).await? {
            if let Some(ttl) = self.settings.session_ttl {
                if session.is_stale(ttl, Utc::now()) {
                    tracing::info!(sender = %origin.sender_id, "Session expired");
                    self.sessions.delete(&origin.sender_id).await?;
                    return self
                        .reply(bot_token, origin, self.templates.auth_expired())
                        .await;
                }
            }

            if !session.user_id.is_empty() {
                self.sessions.touch(&origin.sender_id).await?;
                if !text.trim().is_empty() {
                    self.forward_to_agent(origin, text, &session.user_id, bot_token)
                        .await?;
                }
                answered = true;
            }
        }

        if !answered || self.settings.auth_reply_fallthrough {
            self.reply(bot_token, origin, self.templates.auth_required())
                .await?;
        }
        Ok(())
    }

    async fn forward_to_agent(
        &self,
        origin: &Origin<'_>,
        text: &str,
        user_id: &str,
        bot_token: &str,
    ) -> Result<(), RelayError> {
        match self.agent.execute_command(text, user_id).await {
            Ok(replies) => {
                for reply in replies {
                    self.reply(bot_token, origin, reply).await?;
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "Agent call failed");
                self.reply(bot_token, origin, self.templates.agent_error())
                    .await
            }
        }
    }

    /// Send `text` back to the originating chat. Telegram refusing the
    /// message is logged and swallowed; transport failures propagate.
    async fn reply(
        &self,
        bot_token: &str,
        origin: &Origin<'_>,
        text: String,
    ) -> Result<(), RelayError> {
        match self
            .bot
            .send_message(bot_token, &origin.reply_to, &text, None)
            .await
        {
            Ok(_) => Ok(()),
            Err(e @ TelegramError::Rejected { .. }) => {
                tracing::warn!(chat = %origin.reply_to, error = %e, "Reply not delivered");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
