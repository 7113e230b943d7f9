//! Error types for z-analytics storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Another process holds the database open.
    #[error("database at {path} is locked by another process")]
    Locked {
        /// Data directory.
        path: String,
    },

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored key or counter could not be decoded.
    #[error("corrupt record in {cf}")]
    Corrupt {
        /// Column family holding the record.
        cf: &'static str,
    },

    /// A ledger write would decrease spent epsilon, exceed the limit, or
    /// un-materialize a day.
    #[error("ledger update rejected for {date}")]
    LedgerRegression {
        /// Day of the rejected entry.
        date: chrono::NaiveDate,
    },
}
