//! Management API used by the web platform to connect, test and tear down a
//! user's bot.

use super::server::AppState;
use super::types::{
    ApiError, ApiReply, AuthTokenReply, SendMessageRequest, SetWebhookRequest, StatusReply,
    UserRequest, WebhooksReply,
};
use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        tracing::warn!(error = %rejection, "Malformed management request");
        ApiError::bad_request("Некорректный запрос")
    })
}

/// POST /api/telegram/set_webhook
pub async fn set_webhook(
    State(state): State<AppState>,
    payload: Result<Json<SetWebhookRequest>, JsonRejection>,
) -> Result<Json<ApiReply>, ApiError> {
    let req = body(payload)?;
    state
        .connections
        .set_webhook(&req.user_id, &req.bot_token, &req.chat_id)
        .await?;
    Ok(Json(ApiReply::ok("Успешно подключено")))
}

/// POST /api/telegram/send_message
pub async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<ApiReply>, ApiError> {
    let req = body(payload)?;
    let message_id = state
        .connections
        .send_message(&req.user_id, &req.message_text, req.parse_mode)
        .await?;
    Ok(Json(ApiReply {
        message_id: Some(message_id),
        ..ApiReply::ok("Сообщение успешно отправлено")
    }))
}

/// POST /api/telegram/disconnect
pub async fn disconnect(
    State(state): State<AppState>,
    payload: Result<Json<UserRequest>, JsonRejection>,
) -> Result<Json<ApiReply>, ApiError> {
    let req = body(payload)?;
    state.connections.disconnect(&req.user_id).await?;
    Ok(Json(ApiReply::ok("Телеграм бот отключен")))
}

/// GET /api/telegram/status?user_id=
pub async fn status(
    State(state): State<AppState>,
    query: Result<Query<UserRequest>, QueryRejection>,
) -> Result<Json<StatusReply>, ApiError> {
    let Query(req) = query.map_err(|_| ApiError::bad_request("Некорректный запрос"))?;
    let status = state.connections.status(&req.user_id).await?;
    Ok(Json(StatusReply {
        success: true,
        status,
        user_id: req.user_id,
    }))
}

/// POST /api/telegram/set_webhooks
pub async fn set_webhooks(State(state): State<AppState>) -> Result<Json<WebhooksReply>, ApiError> {
    let results = state.connections.set_webhooks().await?;
    Ok(Json(WebhooksReply {
        success: true,
        results,
    }))
}

/// POST /api/telegram/auth_token
pub async fn auth_token(
    State(state): State<AppState>,
    payload: Result<Json<UserRequest>, JsonRejection>,
) -> Result<Json<AuthTokenReply>, ApiError> {
    let req = body(payload)?;
    let auth_token = state.connections.issue_auth_token(&req.user_id).await?;
    Ok(Json(AuthTokenReply {
        success: true,
        auth_token,
    }))
}
