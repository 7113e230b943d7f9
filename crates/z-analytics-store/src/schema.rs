//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Debiased bucket counters, keyed by `date|metric|dims`.
    /// Value is a little-endian `u64` combined with the add merge operator.
    pub const BUCKETS: &str = "buckets";

    /// Perturbed report tallies of open days, keyed by `date|metric|dims`.
    /// Same counter encoding and merge operator as `BUCKETS`. Cleared when
    /// the day is folded.
    pub const REPORTS: &str = "reports";

    /// Days whose reports have been debiased into `BUCKETS`, keyed by date.
    /// Write-once.
    pub const FOLDS: &str = "folds";

    /// Immutable snapshot rows, keyed by `date|tier|metric|dims`.
    pub const SNAPSHOTS: &str = "snapshots";

    /// Privacy budget ledger, keyed by date.
    pub const LEDGER: &str = "ledger";

    /// Generated per-day noise keys, keyed by date. Write-once.
    pub const NOISE_KEYS: &str = "noise_keys";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::BUCKETS,
        cf::REPORTS,
        cf::FOLDS,
        cf::SNAPSHOTS,
        cf::LEDGER,
        cf::NOISE_KEYS,
    ]
}
