//! Error types for CareChat
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for structured HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// Every variant except `Database`, `Config` and `Internal` reflects a
/// caller-correctable precondition and is returned to the caller verbatim.
#[derive(Debug, Error)]
pub enum AppError {
    /// Conversation, message, report or user absent (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Actor lacks the required role or is not an active participant (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Edit/delete outside the permitted time window (410)
    #[error("Expired: {0}")]
    Expired(String),

    /// Duplicate membership, reaction or unresolved report (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed content or unknown enum value (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Persistence failure (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Short machine-readable error type, also used as a metric label
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Expired(_) => "expired",
            AppError::Conflict(_) => "conflict",
            AppError::Validation(_) => "invalid_argument",
            AppError::Database(_) => "database",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        AppError::Conflict(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(anyhow::anyhow!("Migration failed: {}", err))
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Clients never see internal failure details; database, config and
    /// internal errors collapse to a generic message.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, message) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Expired(msg) => (StatusCode::GONE, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Database(error) => {
                tracing::error!(%error, "Database error while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Config(_) | AppError::Internal(_) => {
                tracing::error!(error = %self, "Internal error while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[self.error_type()]).inc();

        let body = Json(serde_json::json!({
            "success": false,
            "message": message,
            "error": self.error_type(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
