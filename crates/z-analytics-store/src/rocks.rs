//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, ErrorKind, IteratorMode,
    MergeOperands, MultiThreaded, Options, WriteBatch,
};

use z_analytics_core::noise::DAY_KEY_LEN;
use z_analytics_core::{
    AggregateBucket, BucketKey, DayKey, Dimensions, LedgerEntry, Metric, Snapshot, Tier,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

/// Associative `u64` addition over little-endian counters.
fn add_merge(
    _key: &[u8],
    existing: Option<&[u8]>,
    operands: &MergeOperands,
) -> Option<Vec<u8>> {
    let mut total = existing.map_or(Some(0), decode_counter)?;
    for operand in operands.iter() {
        total = total.saturating_add(decode_counter(operand)?);
    }
    Some(total.to_le_bytes().to_vec())
}

fn decode_counter(raw: &[u8]) -> Option<u64> {
    raw.try_into().ok().map(u64::from_le_bytes)
}

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    /// Serializes check-then-write sequences on write-once and monotonic records.
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                if name == cf::BUCKETS || name == cf::REPORTS {
                    cf_opts.set_merge_operator_associative("u64_add", add_merge);
                }
                ColumnFamilyDescriptor::new(name, cf_opts)
            })
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, &path, cf_descriptors).map_err(|e| {
            let message = e.to_string();
            // RocksDB allows one open handle per directory.
            if e.kind() == ErrorKind::IOError && message.contains("LOCK:") {
                StoreError::Locked {
                    path: path.as_ref().display().to_string(),
                }
            } else {
                StoreError::Database(message)
            }
        })?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Database("write lock poisoned".into()))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Merge per-key counter deltas for a day into a counter column family.
    fn merge_counters(
        &self,
        name: &str,
        date: NaiveDate,
        deltas: &BTreeMap<(Metric, Dimensions), u64>,
    ) -> Result<usize> {
        let handle = self.cf(name)?;
        let mut batch = WriteBatch::default();
        let touched = Self::stage_counters(&mut batch, &handle, date, deltas);

        if touched > 0 {
            self.db
                .write(batch)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        Ok(touched)
    }

    /// Queue counter merges into `batch`. Zero deltas are skipped.
    fn stage_counters(
        batch: &mut WriteBatch,
        handle: &Arc<BoundColumnFamily<'_>>,
        date: NaiveDate,
        deltas: &BTreeMap<(Metric, Dimensions), u64>,
    ) -> usize {
        let mut touched = 0;
        for ((metric, dimensions), delta) in deltas {
            if *delta == 0 {
                continue;
            }
            let key = keys::bucket_key(&BucketKey::new(date, *metric, dimensions.clone()));
            batch.merge_cf(handle, key, delta.to_le_bytes());
            touched += 1;
        }
        touched
    }

    /// Read every counter of a day from a counter column family.
    fn day_counters(&self, name: &'static str, date: NaiveDate) -> Result<Vec<AggregateBucket>> {
        let mut counters = Vec::new();
        self.scan_prefix(name, &keys::day_prefix(date), |key, value| {
            let key = keys::parse_bucket_key(key).ok_or(StoreError::Corrupt { cf: name })?;
            let count = decode_counter(value).ok_or(StoreError::Corrupt { cf: name })?;
            counters.push(AggregateBucket { key, count });
            Ok(())
        })?;
        Ok(counters)
    }

    /// Visit every `(key, value)` under `prefix` in a column family.
    fn scan_prefix<F>(&self, name: &str, prefix: &[u8], mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        let handle = self.cf(name)?;
        let iter = self
            .db
            .iterator_cf(&handle, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            visit(&key, &value)?;
        }
        Ok(())
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Bucket Operations
    // =========================================================================

    fn add_to_buckets(
        &self,
        date: NaiveDate,
        deltas: &BTreeMap<(Metric, Dimensions), u64>,
    ) -> Result<usize> {
        self.merge_counters(cf::BUCKETS, date, deltas)
    }

    fn buckets_for_day(&self, date: NaiveDate) -> Result<Vec<AggregateBucket>> {
        self.day_counters(cf::BUCKETS, date)
    }

    // =========================================================================
    // Report Operations
    // =========================================================================

    fn add_reports(
        &self,
        date: NaiveDate,
        tallies: &BTreeMap<(Metric, Dimensions), u64>,
    ) -> Result<usize> {
        self.merge_counters(cf::REPORTS, date, tallies)
    }

    fn report_tallies(&self, date: NaiveDate) -> Result<BTreeMap<(Metric, Dimensions), u64>> {
        Ok(self
            .day_counters(cf::REPORTS, date)?
            .into_iter()
            .map(|tally| ((tally.key.metric, tally.key.dimensions), tally.count))
            .collect())
    }

    fn is_folded(&self, date: NaiveDate) -> Result<bool> {
        let handle = self.cf(cf::FOLDS)?;
        let folded = self
            .db
            .get_pinned_cf(&handle, keys::date_key(date))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        Ok(folded)
    }

    fn fold_reports(
        &self,
        date: NaiveDate,
        estimates: &BTreeMap<(Metric, Dimensions), u64>,
    ) -> Result<bool> {
        let buckets = self.cf(cf::BUCKETS)?;
        let reports = self.cf(cf::REPORTS)?;
        let folds = self.cf(cf::FOLDS)?;
        let _guard = self.lock()?;

        if self.is_folded(date)? {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        Self::stage_counters(&mut batch, &buckets, date, estimates);
        let start = keys::day_prefix(date);
        let end = keys::prefix_end(&start);
        batch.delete_range_cf(&reports, start, end);
        batch.put_cf(&folds, keys::date_key(date), b"");

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(true)
    }

    // =========================================================================
    // Snapshot Operations
    // =========================================================================

    fn has_snapshot(&self, tier: Tier, key: &BucketKey) -> Result<bool> {
        let handle = self.cf(cf::SNAPSHOTS)?;
        let exists = self
            .db
            .get_pinned_cf(&handle, keys::snapshot_key(tier, key))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        Ok(exists)
    }

    fn put_snapshots(&self, rows: &[Snapshot]) -> Result<usize> {
        let handle = self.cf(cf::SNAPSHOTS)?;
        let _guard = self.lock()?;

        let mut batch = WriteBatch::default();
        let mut written = 0;
        for row in rows {
            if self.has_snapshot(row.tier, &row.key)? {
                continue;
            }
            let key = keys::snapshot_key(row.tier, &row.key);
            batch.put_cf(&handle, key, Self::serialize(row)?);
            written += 1;
        }

        if written > 0 {
            self.db
                .write(batch)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        Ok(written)
    }

    fn snapshots(&self, date: NaiveDate, tier: Tier, metric: Metric) -> Result<Vec<Snapshot>> {
        let mut rows = Vec::new();
        let prefix = keys::snapshot_metric_prefix(date, tier, metric);
        self.scan_prefix(cf::SNAPSHOTS, &prefix, |_, value| {
            rows.push(Self::deserialize(value)?);
            Ok(())
        })?;
        Ok(rows)
    }

    fn count_snapshots(&self, date: NaiveDate, tier: Tier) -> Result<usize> {
        let mut count = 0;
        let prefix = keys::snapshot_tier_prefix(date, tier);
        self.scan_prefix(cf::SNAPSHOTS, &prefix, |_, _| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    fn get_ledger(&self, date: NaiveDate) -> Result<Option<LedgerEntry>> {
        let handle = self.cf(cf::LEDGER)?;
        self.db
            .get_cf(&handle, keys::date_key(date))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put_ledger(&self, entry: &LedgerEntry) -> Result<()> {
        let handle = self.cf(cf::LEDGER)?;
        let _guard = self.lock()?;

        let baseline = match self.get_ledger(entry.date)? {
            Some(current) => current,
            None => LedgerEntry::pending(entry.date, entry.epsilon_limit),
        };
        if !baseline.admits_successor(entry) {
            return Err(StoreError::LedgerRegression { date: entry.date });
        }

        self.db
            .put_cf(&handle, keys::date_key(entry.date), Self::serialize(entry)?)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    // =========================================================================
    // Noise Key Operations
    // =========================================================================

    fn get_day_key(&self, date: NaiveDate) -> Result<Option<DayKey>> {
        let handle = self.cf(cf::NOISE_KEYS)?;
        let Some(raw) = self
            .db
            .get_cf(&handle, keys::date_key(date))
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };
        let bytes: [u8; DAY_KEY_LEN] = raw
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Corrupt { cf: cf::NOISE_KEYS })?;
        Ok(Some(DayKey::from_bytes(bytes)))
    }

    fn get_or_insert_day_key(&self, date: NaiveDate, candidate: &DayKey) -> Result<DayKey> {
        let handle = self.cf(cf::NOISE_KEYS)?;
        let _guard = self.lock()?;

        if let Some(existing) = self.get_day_key(date)? {
            return Ok(existing);
        }

        self.db
            .put_cf(&handle, keys::date_key(date), candidate.as_bytes())
            .map_err(|e| StoreError::Database(e.to_string()))?;
        tracing::info!(%date, fingerprint = %candidate.fingerprint(), "Stored generated noise key");

        Ok(candidate.clone())
    }
}
