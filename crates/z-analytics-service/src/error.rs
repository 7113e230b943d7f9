//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use z_analytics_core::PrivacyError;
use z_analytics_store::StoreError;

use crate::materialize::MaterializeError;
use crate::query::QueryError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Query range rejected. The configured maximum is safe to disclose.
    #[error("invalid range: {message}")]
    InvalidRange {
        /// Validation message.
        message: String,
        /// Configured maximum range.
        max_query_days: u32,
    },

    /// Conflict - the operation is not valid in the current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// The generic rejection for malformed ingest batches. Never carries the
    /// offending value.
    #[must_use]
    pub fn invalid_batch() -> Self {
        Self::BadRequest("invalid batch".into())
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::InvalidRange {
                message,
                max_query_days,
            } => (
                StatusCode::BAD_REQUEST,
                "invalid_range",
                message.clone(),
                Some(serde_json::json!({ "max_query_days": max_query_days })),
            ),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<MaterializeError> for ApiError {
    fn from(err: MaterializeError) -> Self {
        match err {
            MaterializeError::DayNotClosed(date) => {
                Self::Conflict(format!("day {date} has not closed"))
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl ApiError {
    /// Map a query error, disclosing only the configured maximum range.
    #[must_use]
    pub fn from_query(err: QueryError, max_query_days: u32) -> Self {
        match err {
            QueryError::Invalid(PrivacyError::InvalidRange(message)) => Self::InvalidRange {
                message,
                max_query_days,
            },
            QueryError::Invalid(other) => Self::BadRequest(other.to_string()),
            QueryError::Store(e) => e.into(),
        }
    }
}
