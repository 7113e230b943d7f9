//! Error types for z-analytics.

use crate::ids::IdError;

/// Result type for z-analytics privacy operations.
pub type Result<T> = std::result::Result<T, PrivacyError>;

/// Errors raised by the privacy mechanisms and their configuration.
///
/// None of the variants carry caller-supplied values: error messages may be
/// returned to clients or logged, and must not become a side channel.
#[derive(Debug, thiserror::Error)]
pub enum PrivacyError {
    /// The cryptographically secure generator could not produce bytes.
    ///
    /// This is fatal for the current call. There is no fallback generator.
    #[error("secure randomness unavailable")]
    EntropyUnavailable,

    /// An epsilon value was not finite and strictly positive.
    #[error("invalid epsilon for {0}")]
    InvalidEpsilon(&'static str),

    /// A sensitivity value was not finite and strictly positive.
    #[error("invalid noise sensitivity")]
    InvalidSensitivity,

    /// A configured bound (threshold, cap, range) was out of range.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The requested date range is invalid or too long.
    #[error("invalid date range: {0}")]
    InvalidRange(String),

    /// Charging a tier would push a day's epsilon past its limit.
    #[error("privacy budget exhausted")]
    BudgetExceeded,

    /// The noise secret is too short to key HMAC-SHA256 safely.
    #[error("noise secret must be at least {min} bytes")]
    WeakNoiseSecret {
        /// Minimum accepted length in bytes.
        min: usize,
    },

    /// A dimension or identifier failed validation.
    #[error(transparent)]
    Dimension(#[from] DimensionError),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

/// Validation failures for dimension values.
///
/// Variants name the field only. The rejected value is never included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DimensionError {
    /// The template identifier is not a valid slug.
    #[error("invalid template_id")]
    InvalidTemplateId,

    /// The jurisdiction code is not a known geographic unit.
    #[error("invalid jurisdiction")]
    InvalidJurisdiction,

    /// A value is outside the enumeration of the named field.
    #[error("invalid value for {0}")]
    InvalidValue(&'static str),

    /// A key is not one of the whitelisted dimension fields.
    #[error("unknown dimension field")]
    UnknownField,

    /// The same dimension field was supplied twice.
    #[error("duplicate dimension field")]
    DuplicateField,

    /// A canonical bucket key could not be decoded.
    #[error("malformed dimension key")]
    MalformedKey,
}
