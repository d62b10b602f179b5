use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced at the HTTP boundary.
///
/// The response code is the only signal the upstream provider sees; all
/// retry/dead-letter mechanics stay internal.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Rate limited")]
    RateLimited,

    #[error("Queue full")]
    QueueFull,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone()))
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "Rate limited", None),
            AppError::QueueFull => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Queue full, retry later",
                None,
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Classified processing failure, routed by the worker loop.
///
/// - `Validation`: malformed or unsupported payload shape. Acknowledged and
///   logged, never retried.
/// - `Transient`: timeouts, lock contention, connection resets. Retried with
///   backoff up to the attempt cap.
/// - `Permanent`: business-rule violation (e.g. reference to a nonexistent
///   local entity). Sent straight to dead-letter, bypassing the retry budget.
/// - `CircuitOpen`: the downstream dependency's breaker is open. Requeued
///   with backoff without attempting I/O.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),

    #[error("circuit open: {0}")]
    CircuitOpen(&'static str),
}

impl ProcessError {
    /// Short classification tag used in logs and error history.
    pub fn classification(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Transient(_) => "transient",
            Self::Permanent(_) => "permanent",
            Self::CircuitOpen(_) => "circuit_open",
        }
    }

    /// Whether this failure consumes a retry and gets rescheduled.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::CircuitOpen(_))
    }
}

impl From<rusqlite::Error> for ProcessError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _) => match err.code {
                // Lock contention resolves on retry
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    ProcessError::Transient(e.to_string())
                }
                // Constraint violations won't fix themselves
                rusqlite::ErrorCode::ConstraintViolation => {
                    ProcessError::Permanent(e.to_string())
                }
                _ => ProcessError::Transient(e.to_string()),
            },
            _ => ProcessError::Transient(e.to_string()),
        }
    }
}

impl From<r2d2::Error> for ProcessError {
    fn from(e: r2d2::Error) -> Self {
        ProcessError::Transient(format!("pool: {}", e))
    }
}
