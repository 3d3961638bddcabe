//! Relay core: webhook command handling and per-user bot connections.

mod connection;
mod handler;

pub use connection::{ConnectionManager, ConnectionStatus, WebhookCheck};
pub use handler::{Command, CommandHandler, HandlerSettings};
