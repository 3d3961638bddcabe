//! tg-relay
//!
//! Telegram webhook relay. Binds Telegram chats to accounts on the web
//! platform through one-time auth tokens, forwards authenticated chat
//! messages to the command agent and relays its replies back to the chat.
//! A small management API registers, tests and tears down per-user bots.

pub mod agent;
pub mod config;
pub mod error;
pub mod gateway;
pub mod relay;
pub mod store;
pub mod telegram;
pub mod templates;

#[cfg(test)]
mod tests;

/// Crate version, reported by the health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
