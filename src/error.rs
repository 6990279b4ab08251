use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Referenced collection, card, user, history or object does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Caller is not allowed to touch the resource.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Malformed input, rejected before any storage call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Attachment upload would exceed the per-user byte ceiling.
    #[error("Storage quota exceeded: {used} + {requested} bytes is above the {limit} byte limit")]
    QuotaExceeded {
        /// Bytes already consumed.
        used: i64,
        /// Bytes requested by the upload.
        requested: i64,
        /// Per-user ceiling.
        limit: i64,
    },

    /// Underlying store call failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// An update matched nothing when a match was expected.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The operation deadline expired.
    #[error("Operation timed out")]
    Timeout,

    /// Missing or invalid credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether this is the "object is already gone" condition of a picture removal.
    pub fn is_missing_picture(&self) -> bool {
        matches!(self, AppError::NotFound(what) if what == "picture")
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::QuotaExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Persistence(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request error");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;
