//! `RocksDB` storage layer for z-analytics.
//!
//! This crate persists perturbed report tallies, debiased day buckets,
//! immutable snapshots, the privacy budget ledger and generated noise keys
//! using `RocksDB` column families.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `reports`: perturbed report tallies of open days, keyed by
//!   `date|metric|dims`, merged with an associative add operator so
//!   concurrent ingests never lose updates
//! - `folds`: days whose tallies were debiased into `buckets`, write-once
//! - `buckets`: debiased counters, same keys and merge operator
//! - `snapshots`: noisy rows, keyed by `date|tier|metric|dims`, write-once
//! - `ledger`: per-day budget entries, monotonic
//! - `noise_keys`: per-day generated noise keys, write-once
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use chrono::Utc;
//! use z_analytics_core::{Dimensions, Metric};
//! use z_analytics_store::{RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/z-analytics-db").unwrap();
//! let today = Utc::now().date_naive();
//!
//! let deltas = BTreeMap::from([((Metric::TemplateView, Dimensions::default()), 3)]);
//! store.add_to_buckets(today, &deltas).unwrap();
//! let buckets = store.buckets_for_day(today).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

use std::collections::BTreeMap;

use chrono::NaiveDate;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use z_analytics_core::{
    AggregateBucket, BucketKey, DayKey, Dimensions, LedgerEntry, Metric, Snapshot, Tier,
};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Bucket Operations
    // =========================================================================

    /// Add per-bucket deltas for a day in one atomic write.
    ///
    /// The addition happens inside the storage engine (merge operator), never
    /// as a read-modify-write. Zero deltas are skipped. Returns the number of
    /// buckets touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails. Nothing is applied
    /// in that case.
    fn add_to_buckets(
        &self,
        date: NaiveDate,
        deltas: &BTreeMap<(Metric, Dimensions), u64>,
    ) -> Result<usize>;

    /// All buckets of a day, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a record is corrupt.
    fn buckets_for_day(&self, date: NaiveDate) -> Result<Vec<AggregateBucket>>;

    // =========================================================================
    // Report Operations
    // =========================================================================

    /// Add perturbed report tallies for a day in one atomic write.
    ///
    /// Same semantics as [`Store::add_to_buckets`], on the report column
    /// family.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails. Nothing is applied
    /// in that case.
    fn add_reports(
        &self,
        date: NaiveDate,
        tallies: &BTreeMap<(Metric, Dimensions), u64>,
    ) -> Result<usize>;

    /// Every report tally of a day.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a record is corrupt.
    fn report_tallies(&self, date: NaiveDate) -> Result<BTreeMap<(Metric, Dimensions), u64>>;

    /// Whether a day's reports have been folded into buckets.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn is_folded(&self, date: NaiveDate) -> Result<bool>;

    /// Fold a day once: add `estimates` to its buckets, clear its report
    /// tallies and mark it folded, all in one atomic write.
    ///
    /// Returns `false` without writing if the day is already folded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails. Nothing is applied
    /// in that case.
    fn fold_reports(
        &self,
        date: NaiveDate,
        estimates: &BTreeMap<(Metric, Dimensions), u64>,
    ) -> Result<bool>;

    // =========================================================================
    // Snapshot Operations
    // =========================================================================

    /// Check whether a snapshot row exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn has_snapshot(&self, tier: Tier, key: &BucketKey) -> Result<bool>;

    /// Write snapshot rows that do not exist yet, in one atomic write.
    ///
    /// Existing rows are left untouched. Returns the number written.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_snapshots(&self, rows: &[Snapshot]) -> Result<usize>;

    /// Snapshot rows of one metric in one tier of a day.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn snapshots(&self, date: NaiveDate, tier: Tier, metric: Metric) -> Result<Vec<Snapshot>>;

    /// Number of snapshot rows in one tier of a day.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_snapshots(&self, date: NaiveDate, tier: Tier) -> Result<usize>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Get the ledger entry of a day.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_ledger(&self, date: NaiveDate) -> Result<Option<LedgerEntry>>;

    /// Insert or advance a ledger entry.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LedgerRegression` if the entry is not a legal
    /// successor of the stored one (see `LedgerEntry::admits_successor`) or
    /// spends past its limit.
    fn put_ledger(&self, entry: &LedgerEntry) -> Result<()>;

    // =========================================================================
    // Noise Key Operations
    // =========================================================================

    /// Get the stored noise key of a day.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_day_key(&self, date: NaiveDate) -> Result<Option<DayKey>>;

    /// Store `candidate` as the day's key unless one exists; return the key
    /// that is stored afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_or_insert_day_key(&self, date: NaiveDate, candidate: &DayKey) -> Result<DayKey>;
}
