//! HTTP server powered by axum.
//!
//! Serves:
//! - `POST /webhook/{token}`             Telegram updates for one bot
//! - `POST /api/telegram/set_webhook`    connect a user's bot
//! - `POST /api/telegram/send_message`   push a message to a user's chat
//! - `POST /api/telegram/disconnect`     drop a user's connection
//! - `GET  /api/telegram/status`         connection status
//! - `POST /api/telegram/set_webhooks`   re-check every stored webhook
//! - `POST /api/telegram/auth_token`     issue an `/auth` token
//! - `GET  /health`                      health check

use super::management;
use super::types::WebhookAck;
use crate::config::Secret;
use crate::relay::{CommandHandler, ConnectionManager};
use crate::telegram::Update;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Header Telegram echoes the registered `secret_token` in.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<CommandHandler>,
    pub connections: Arc<ConnectionManager>,
    /// When set, inbound updates must carry it in [`SECRET_HEADER`].
    pub webhook_secret: Option<Secret>,
}

/// Build the axum router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/{token}", post(webhook))
        .route("/api/telegram/set_webhook", post(management::set_webhook))
        .route("/api/telegram/send_message", post(management::send_message))
        .route("/api/telegram/disconnect", post(management::disconnect))
        .route("/api/telegram/status", get(management::status))
        .route("/api/telegram/set_webhooks", post(management::set_webhooks))
        .route("/api/telegram/auth_token", post(management::auth_token))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `bind_addr` and serve until the process exits.
pub async fn start_server(state: AppState, bind_addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {bind_addr:?}: {e}"))?;

    let app = build_router(state);

    tracing::info!("Relay listening on http://{}", addr);
    tracing::info!("   Webhooks:   http://{}/webhook/<token>", addr);
    tracing::info!("   Management: http://{}/api/telegram/", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// POST /webhook/{token}: one Telegram update for the bot owning `token`.
///
/// The body is decoded by hand so malformed payloads get the same opaque
/// `{status: "error"}` answer as failed dispatches.
async fn webhook(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookAck>) {
    let bot_id = token.split(':').next().unwrap_or_default();

    if let Some(secret) = &state.webhook_secret {
        let presented = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if presented != Some(secret.expose()) {
            tracing::warn!(bot_id, "Webhook secret mismatch");
            return WebhookAck::error(StatusCode::UNAUTHORIZED);
        }
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            tracing::error!(bot_id, error = %e, "Malformed update");
            return WebhookAck::error(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    tracing::debug!(bot_id, ?update, "Update received");

    match state.handler.handle_update(&update, &token).await {
        Ok(command) => {
            tracing::debug!(bot_id, ?command, "Update handled");
            WebhookAck::ok()
        }
        Err(e) => {
            tracing::error!(bot_id, error = %e, "Failed to handle update");
            WebhookAck::error(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /health
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
    }))
}
