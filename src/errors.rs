use crate::services::vault_service::VaultError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Message returned for every 500; the cause only goes to the log.
const INTERNAL_MESSAGE: &str = "internal server error";

/// A lightweight wrapper for request errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// 500 with the generic message. `cause` is logged, not returned.
    pub fn internal(cause: impl fmt::Display) -> Self {
        tracing::error!("internal error: {}", cause);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::Validation(msg) | VaultError::Rejected(msg) => AppError::bad_request(msg),
            VaultError::NotFound => AppError::new(StatusCode::NOT_FOUND, err.to_string()),
            VaultError::Expired => AppError::new(StatusCode::GONE, err.to_string()),
            VaultError::AccessDenied => AppError::new(StatusCode::FORBIDDEN, err.to_string()),
            VaultError::Storage(cause) => AppError::internal(cause),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}
