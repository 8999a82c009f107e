//! Error taxonomy for Caseline.
//!
//! Every failure surfaced to a caller carries a stable machine-readable
//! `code` and maps to one HTTP status. Errors from mandatory pipeline steps
//! propagate unmodified; best-effort steps catch and log instead (see
//! [`crate::chat::best_effort`]).

use axum::http::StatusCode;
use thiserror::Error;

/// Domain error with a stable wire code per variant.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad input shape or range.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Caller identity missing on a user-scoped operation.
    #[error("missing caller identity")]
    Unauthorized,

    /// Entity exists but belongs to another user. Never leaks entity content.
    #[error("access denied")]
    Forbidden,

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Reserved; the core does not raise this directly.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limit exceeded")]
    RateLimit,

    /// Writing to a soft-deleted session is a terminal error.
    #[error("invalid session: {0} is not active")]
    InvalidSession(String),

    /// The model's analysis response did not decode as the documented
    /// contract. Fatal; no retry, no repair.
    #[error("model output malformed: {0}")]
    ModelOutputMalformed(String),

    /// Wraps store/search/model failures with the original message.
    #[error("upstream {service} error: {message}")]
    Upstream { service: &'static str, message: String },
}

impl AppError {
    /// Stable code string used in the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::RateLimit => "RATE_LIMIT_EXCEEDED",
            AppError::InvalidSession(_) => "INVALID_SESSION",
            AppError::ModelOutputMalformed(_) => "MODEL_OUTPUT_MALFORMED",
            AppError::Upstream { .. } => "UPSTREAM_SERVICE_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidSession(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            AppError::ModelOutputMalformed(_) | AppError::Upstream { .. } => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    pub fn upstream(service: &'static str, err: impl std::fmt::Display) -> Self {
        AppError::Upstream {
            service,
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::upstream("store", err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::upstream("model", err)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
