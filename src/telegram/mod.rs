//! Telegram Bot API Integration
//!
//! Wire types for inbound updates and a thin client for the four Bot API
//! methods the relay uses: `getMe`, `sendMessage`, `setWebhook` and
//! `getWebhookInfo`.

mod client;
pub mod types;

pub use client::{BotApi, TelegramClient};
pub use types::{BotUser, ParseMode, SentMessage, Update, WebhookInfo};
