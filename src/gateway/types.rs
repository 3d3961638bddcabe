//! Request and response bodies of the HTTP API, and the mapping from
//! connection errors onto status codes and user-facing messages.

use crate::error::{ConnectionError, StoreError};
use crate::relay::{ConnectionStatus, WebhookCheck};
use crate::store::string_or_number;
use crate::telegram::ParseMode;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// Body of every webhook response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookAck {
    pub status: AckStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    Error,
}

impl WebhookAck {
    pub fn ok() -> (StatusCode, Json<Self>) {
        (StatusCode::OK, Json(Self { status: AckStatus::Ok }))
    }

    pub fn error(code: StatusCode) -> (StatusCode, Json<Self>) {
        (code, Json(Self { status: AckStatus::Error }))
    }
}

// Missing fields deserialize as empty so the manager reports which one is
// missing instead of a generic rejection.

#[derive(Debug, Deserialize)]
pub struct SetWebhookRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub message_text: String,
    #[serde(default)]
    pub parse_mode: Option<ParseMode>,
}

/// Body of `disconnect`, `auth_token` and the `status` query.
#[derive(Debug, Deserialize)]
pub struct UserRequest {
    #[serde(default)]
    pub user_id: String,
}

/// Generic management reply.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ApiReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
}

impl ApiReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReply {
    pub success: bool,
    pub status: ConnectionStatus,
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct WebhooksReply {
    pub success: bool,
    pub results: Vec<WebhookCheck>,
}

#[derive(Debug, Serialize)]
pub struct AuthTokenReply {
    pub success: bool,
    pub auth_token: String,
}

/// A failed management call, rendered as `{success: false, error}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ConnectionError> for ApiError {
    fn from(err: ConnectionError) -> Self {
        use ConnectionError as E;

        let status = match &err {
            E::NotFound(_) => StatusCode::NOT_FOUND,
            E::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            E::Store(StoreError::InvalidKey(_)) => StatusCode::BAD_REQUEST,
            E::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };

        if status.is_server_error() {
            tracing::error!(error = %err, "Management request failed");
        } else {
            tracing::warn!(error = %err, "Management request rejected");
        }
        Self {
            status,
            message: err.public_message(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiReply::failed(self.message))).into_response()
    }
}
