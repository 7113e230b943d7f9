//! Identifier types for z-analytics.
//!
//! This module provides strongly-typed identifiers for templates, reporting
//! clients, and materialization runs.
//!
//! # Macro-based ID Types
//!
//! The `slug_id_type!` macro reduces boilerplate for validated string identifiers,
//! ensuring consistent implementation of serialization, parsing, and display traits.
//! Validation happens at deserialization time, so an invalid value never reaches
//! the aggregation pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Macro to define a validated string identifier type with standard trait implementations.
///
/// This macro generates a newtype wrapper around `String` with implementations for:
/// - `Clone`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - `Serialize`, `Deserialize` (as string, validated)
/// - `FromStr`, `Display`, `Debug`
/// - `TryFrom<String>`, `Into<String>`
///
/// # Example
///
/// ```ignore
/// slug_id_type!(MyId, 32, IdError::InvalidMyId, "A custom identifier type.");
/// let id: MyId = "abc_1".parse().unwrap();
/// ```
macro_rules! slug_id_type {
    ($name:ident, $max_len:expr, $is_valid:path, $err:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Maximum length in bytes.
            pub const MAX_LEN: usize = $max_len;

            /// Return the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.is_empty() || s.len() > Self::MAX_LEN || !$is_valid(s) {
                    return Err($err);
                }
                Ok(Self(s.to_string()))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

/// Lowercase slug: `[a-z0-9][a-z0-9_-]*`.
fn is_slug(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Opaque client token: ASCII alphanumerics and `-`, at least 16 characters.
fn is_client_token(s: &str) -> bool {
    s.len() >= 16 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

slug_id_type!(
    TemplateId,
    64,
    is_slug,
    IdError::InvalidTemplateId,
    "A template identifier (lowercase slug, e.g. `tpl_1`).\n\nTemplates are a bounded, operator-managed set, so this stays a low-cardinality dimension."
);
slug_id_type!(
    ClientId,
    64,
    is_client_token,
    IdError::InvalidClientId,
    "A per-installation client token.\n\nThe service never stores or logs this value; it is hashed with a keyed HMAC before use as a contribution-limiter key."
);

/// A materialization run identifier (UUID v4), used to correlate log lines.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(uuid::Uuid);

impl RunId {
    /// Generate a new random run identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl FromStr for RunId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
        Ok(Self(uuid))
    }
}

impl fmt::Debug for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RunId({})", self.0)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RunId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0.to_string()
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid template slug.
    #[error("invalid template identifier")]
    InvalidTemplateId,

    /// The input is not a valid client token.
    #[error("invalid client identifier")]
    InvalidClientId,

    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,
}
