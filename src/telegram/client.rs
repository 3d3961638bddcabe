//! Bot API client.
//!
//! The bot token is a per-call argument: one relay process serves every
//! user's bot.

use super::types::*;
use crate::error::TelegramError;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// The Bot API methods the relay calls.
#[async_trait]
pub trait BotApi: Send + Sync {
    async fn get_me(&self, bot_token: &str) -> Result<BotUser, TelegramError>;

    async fn send_message(
        &self,
        bot_token: &str,
        chat_id: &str,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<SentMessage, TelegramError>;

    async fn set_webhook(
        &self,
        bot_token: &str,
        url: &str,
        secret_token: Option<&str>,
    ) -> Result<(), TelegramError>;

    async fn get_webhook_info(&self, bot_token: &str) -> Result<WebhookInfo, TelegramError>;
}

/// reqwest-backed [`BotApi`].
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_url: String,
}

impl TelegramClient {
    /// `api_url` is the Bot API root, e.g. `https://api.telegram.org`.
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, TelegramError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn method_url(&self, bot_token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, bot_token, method)
    }

    /// POST `body` to `method` and unwrap the `{ok, result}` envelope.
    ///
    /// Telegram answers rejections with a 4xx status and a JSON envelope, so
    /// the envelope is decoded regardless of status.
    async fn call<B, T>(
        &self,
        bot_token: &str,
        method: &'static str,
        body: Option<&B>,
    ) -> Result<T, TelegramError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let mut request = self.http.post(self.method_url(bot_token, method));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let envelope: ApiResponse<T> = response.json().await.map_err(transport)?;

        if !envelope.ok {
            tracing::debug!(
                method,
                status = %status,
                description = envelope.description.as_deref().unwrap_or(""),
                "Telegram rejected request"
            );
            return Err(TelegramError::Rejected {
                method,
                description: envelope.description,
            });
        }

        envelope.result.ok_or(TelegramError::Rejected {
            method,
            description: Some("response carried no result".to_string()),
        })
    }
}

#[async_trait]
impl BotApi for TelegramClient {
    async fn get_me(&self, bot_token: &str) -> Result<BotUser, TelegramError> {
        self.call::<(), _>(bot_token, "getMe", None).await
    }

    async fn send_message(
        &self,
        bot_token: &str,
        chat_id: &str,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<SentMessage, TelegramError> {
        let body = SendMessageRequest {
            chat_id,
            text,
            parse_mode,
        };
        self.call(bot_token, "sendMessage", Some(&body)).await
    }

    async fn set_webhook(
        &self,
        bot_token: &str,
        url: &str,
        secret_token: Option<&str>,
    ) -> Result<(), TelegramError> {
        let body = SetWebhookRequest {
            url,
            secret_token,
            allowed_updates: &["message"],
        };
        // `result` is a bare `true`.
        let _: bool = self.call(bot_token, "setWebhook", Some(&body)).await?;
        Ok(())
    }

    async fn get_webhook_info(&self, bot_token: &str) -> Result<WebhookInfo, TelegramError> {
        self.call::<(), _>(bot_token, "getWebhookInfo", None).await
    }
}

/// Request URLs embed the bot token, so it is stripped before the error
/// can reach logs or callers.
fn transport(err: reqwest::Error) -> TelegramError {
    TelegramError::Transport(err.without_url())
}
