//! HTTP gateway: Telegram webhooks and the management API.

mod management;
pub mod server;
pub mod types;

pub use server::{AppState, SECRET_HEADER, build_router, start_server};
