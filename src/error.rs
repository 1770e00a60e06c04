//! Error types for the data-access layer and their HTTP mapping.
//!
//! [`StoreError`] is the error every store operation returns. Its variants
//! are classified by [`StoreError::class`] into permanent, terminal and
//! transient failures, which drives the retry policy. [`ApiError`] wraps it
//! at the HTTP boundary and maps each variant to a status code and a
//! structured JSON body.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// How a [`StoreError`] must be treated by the retry machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retrying cannot change the outcome (e.g. the record does not exist).
    Permanent,
    /// The caller gave up or the pool refused admission; stop immediately.
    Terminal,
    /// The failure may go away on a later attempt.
    Transient,
}

/// Error returned by every data-access operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested record does not exist or is soft-deleted.
    #[error("record not found")]
    NotFound,

    /// The operation was called with arguments it can never accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller's context was cancelled.
    #[error("context canceled")]
    Canceled,

    /// The caller's context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// No pool slot became free within the acquire timeout.
    #[error("timed out after {0:?} waiting for a pooled connection")]
    PoolTimeout(Duration),

    /// The pool has been closed.
    #[error("connection pool is closed")]
    PoolClosed,

    /// A connection-level failure (connect refused, socket closed, ...).
    #[error("connection error: {0}")]
    Connection(String),

    /// Error reported by the PostgreSQL driver.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The pool could not reach the store during construction.
    #[error("store unreachable at startup: {source}")]
    Startup {
        /// Last error observed by the startup ping.
        #[source]
        source: Box<StoreError>,
    },

    /// Schema migrations failed to apply.
    #[error("migration failed: {0}")]
    Migration(String),
}

impl StoreError {
    /// Returns the retry classification of this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound | Self::InvalidArgument(_) => ErrorClass::Permanent,
            Self::Canceled
            | Self::DeadlineExceeded
            | Self::PoolTimeout(_)
            | Self::PoolClosed
            | Self::Startup { .. }
            | Self::Migration(_) => ErrorClass::Terminal,
            Self::Connection(_) | Self::Database(_) => ErrorClass::Transient,
        }
    }

    /// Returns `true` when a later attempt may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    /// Returns `true` for the not-found sentinel.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns `true` when the connection that produced this error should
    /// not go back to the pool.
    #[must_use]
    pub const fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Database(
                    sqlx::Error::Io(_)
                        | sqlx::Error::Protocol(_)
                        | sqlx::Error::Tls(_)
                        | sqlx::Error::WorkerCrashed
                )
        )
    }
}

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "record not found",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// HTTP-facing error with status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                 |
/// |-----------|-----------------|-----------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request             |
/// | 2000–2999 | Not Found       | 404 Not Found               |
/// | 3000–3999 | Server          | 500 / 503 / 504             |
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request validation failed before reaching the store.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Error propagated from the data-access layer.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    /// Returns the numeric error code for this error.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::Store(err) => match err {
                StoreError::InvalidArgument(_) => 1002,
                StoreError::NotFound => 2001,
                StoreError::PoolTimeout(_) | StoreError::PoolClosed => 3002,
                StoreError::Canceled | StoreError::DeadlineExceeded => 3003,
                StoreError::Connection(_) | StoreError::Database(_) => 3001,
                StoreError::Startup { .. } | StoreError::Migration(_) => 3000,
            },
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Store(err) => match err {
                StoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                StoreError::NotFound => StatusCode::NOT_FOUND,
                StoreError::PoolTimeout(_) | StoreError::PoolClosed => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                StoreError::Canceled | StoreError::DeadlineExceeded => {
                    StatusCode::GATEWAY_TIMEOUT
                }
                StoreError::Connection(_)
                | StoreError::Database(_)
                | StoreError::Startup { .. }
                | StoreError::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
