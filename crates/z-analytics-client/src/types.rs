//! Request and response types for the z-analytics client.

use serde::{Deserialize, Serialize};

pub use z_analytics_core::{
    CoarsenedRow, Coverage, DimensionField, Dimensions, Increment, IngestBatch, Metric,
    PrivacyMetadata, QueryResult, QuerySpec,
};

/// Ingest response. The server answers identically whether or not its
/// contribution cap dropped anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    /// Always `true` on success.
    pub accepted: bool,
}

/// API error response from the server.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
