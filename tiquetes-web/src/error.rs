//! Error types for tiquetes-web
//!
//! Every handler returns [`ApiResult`]. Errors render as
//! `{"error": {"code": ..., "message": ...}}` with the matching status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::roboflow_client::RoboflowError;
use crate::services::webhook_client::WebhookError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or expired session, bad credentials (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Conflict (409) - duplicate record or workflow step out of order
    #[error("Conflict: {0}")]
    Conflict(String),

    /// External service replied with an error or unusable data (502)
    #[error("Bad gateway: {0}")]
    BadGateway(String),

    /// External service did not reply in time (504)
    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// tiquetes-common error
    #[error("Common error: {0}")]
    Common(#[from] tiquetes_common::Error),

    /// Outbound webhook failure
    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    /// Roboflow inference failure
    #[error("Roboflow error: {0}")]
    Roboflow(#[from] RoboflowError),
}

impl ApiError {
    fn parts(self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "BAD_GATEWAY", msg),
            ApiError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "GATEWAY_TIMEOUT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Io(err) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", err.to_string()),
            ApiError::Other(err) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string()),
            ApiError::Common(err) => common_parts(err),
            ApiError::Webhook(err) => {
                let message = err.to_string();
                match err {
                    WebhookError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "WEBHOOK_TIMEOUT", message),
                    WebhookError::NotConfigured(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "WEBHOOK_NOT_CONFIGURED", message)
                    }
                    _ => (StatusCode::BAD_GATEWAY, "WEBHOOK_ERROR", message),
                }
            }
            ApiError::Roboflow(err) => {
                let message = err.to_string();
                match err {
                    RoboflowError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "ROBOFLOW_TIMEOUT", message),
                    RoboflowError::NotConfigured => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "ROBOFLOW_NOT_CONFIGURED", message)
                    }
                    _ => (StatusCode::BAD_GATEWAY, "ROBOFLOW_ERROR", message),
                }
            }
        }
    }
}

fn common_parts(err: tiquetes_common::Error) -> (StatusCode, &'static str, String) {
    use tiquetes_common::Error as E;
    match err {
        E::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
        E::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
        E::Duplicate(msg) => (StatusCode::CONFLICT, "DUPLICATE", msg),
        E::OutOfSequence(msg) => (StatusCode::CONFLICT, "OUT_OF_SEQUENCE", msg),
        other => (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR", other.to_string()),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = self.parts();

        if status.is_server_error() {
            tracing::error!(code = error_code, "{}", message);
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
