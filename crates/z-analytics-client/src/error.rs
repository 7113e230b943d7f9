//! Client error types.

use z_analytics_core::{DimensionError, PrivacyError};

/// Errors that can occur when using the z-analytics client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// Query range rejected by the server.
    #[error("invalid range: {message}")]
    InvalidRange {
        /// Server message.
        message: String,
        /// Maximum range the server accepts.
        max_query_days: Option<u32>,
    },

    /// A dimension failed sanitization. Nothing was queued.
    #[error(transparent)]
    Dimension(#[from] DimensionError),

    /// A privacy mechanism failed (e.g. no secure randomness).
    #[error(transparent)]
    Privacy(#[from] PrivacyError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}
