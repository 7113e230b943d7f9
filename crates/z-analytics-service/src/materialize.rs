//! Snapshot materialization and the privacy budget ledger.
//!
//! Once per closed UTC day, the day's perturbed report tallies are first
//! debiased as one group and folded into buckets. The buckets are then noised
//! exactly once per tier and written as immutable snapshots:
//!
//! 1. `native`: every bucket as stored
//! 2. `metro`, `state`, `region`, `national`: sums over every bucket whose
//!    jurisdiction lies at or under each unit of that level
//!
//! Each tier costs `server_epsilon`. The budget is checked before each tier;
//! once the next tier would pass the daily limit, it and all later tiers are
//! skipped and the day is recorded as partially materialized.
//!
//! A run is resumable. The fold is atomic and happens once per day, noise is
//! deterministic per day key, existing snapshot rows are skipped, and the
//! ledger is written last, so a crashed run can be
//! retried without double-spending or double-writing.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use rand::{CryptoRng, RngCore};
use serde::Serialize;

use z_analytics_core::{
    debias_tallies, AggregateBucket, BucketKey, DayKey, DayStatus, GeoHierarchy, GeoLevel, GeoUnit, LedgerEntry,
    NoiseSecret, PrivacyConfig, PrivacyError, RunId, Snapshot, Tier,
};
use z_analytics_store::{RocksStore, Store, StoreError};

/// Snapshot rows written per atomic chunk.
const CHECKPOINT_CHUNK: usize = 256;

/// Materialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    /// The day has not closed yet.
    #[error("day {0} has not closed")]
    DayNotClosed(NaiveDate),

    /// A privacy mechanism failed (e.g. no secure randomness for a day key).
    #[error(transparent)]
    Privacy(#[from] PrivacyError),

    /// Storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Another run panicked while holding the materialization lock.
    #[error("materialization lock poisoned")]
    LockPoisoned,
}

/// Where per-day noise keys come from.
#[derive(Debug, Clone)]
pub enum NoiseKeys {
    /// Derived from a configured master secret.
    Derived(NoiseSecret),
    /// Generated from the OS CSPRNG on first use and stored write-once.
    Generated,
}

impl NoiseKeys {
    /// Resolve the key for `date`, generating and storing one if needed.
    ///
    /// # Errors
    ///
    /// Returns `PrivacyError::EntropyUnavailable` if a key must be generated
    /// and `rng` fails, or a store error.
    pub fn day_key<S, R>(
        &self,
        store: &S,
        date: NaiveDate,
        rng: &mut R,
    ) -> Result<DayKey, MaterializeError>
    where
        S: Store + ?Sized,
        R: RngCore + CryptoRng + ?Sized,
    {
        match self {
            Self::Derived(secret) => Ok(secret.day_key(date)),
            Self::Generated => {
                if let Some(existing) = store.get_day_key(date)? {
                    return Ok(existing);
                }
                let candidate = DayKey::generate(rng)?;
                Ok(store.get_or_insert_day_key(date, &candidate)?)
            }
        }
    }
}

/// Outcome of one materialization run.
#[derive(Debug, Clone, Serialize)]
pub struct MaterializeReport {
    /// Day materialized.
    pub date: NaiveDate,
    /// Run identifier.
    pub run_id: RunId,
    /// The day was already materialized; nothing was done.
    pub already_materialized: bool,
    /// Buckets produced by folding the day's reports in this run.
    pub buckets_folded: usize,
    /// Tiers materialized in this run or before.
    pub tiers_materialized: Vec<Tier>,
    /// Tiers skipped for lack of budget.
    pub tiers_skipped: Vec<Tier>,
    /// Snapshot rows written by this run.
    pub rows_written: usize,
    /// Snapshot rows that already existed.
    pub rows_existing: usize,
    /// Epsilon spent for the day after the run.
    pub epsilon_spent: f64,
    /// Daily limit.
    pub epsilon_limit: f64,
    /// Some tiers were skipped.
    pub partial: bool,
    /// Fingerprint of the day key.
    pub noise_seed: String,
}

/// Runs materialization passes. One pass at a time per process.
#[derive(Clone)]
pub struct Materializer {
    store: Arc<RocksStore>,
    privacy: PrivacyConfig,
    hierarchy: Arc<GeoHierarchy>,
    noise: NoiseKeys,
    lock: Arc<Mutex<()>>,
}

impl Materializer {
    /// Create a materializer.
    #[must_use]
    pub fn new(
        store: Arc<RocksStore>,
        privacy: PrivacyConfig,
        hierarchy: Arc<GeoHierarchy>,
        noise: NoiseKeys,
    ) -> Self {
        Self {
            store,
            privacy,
            hierarchy,
            noise,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Materialize `date` using the OS CSPRNG for any key generation.
    ///
    /// # Errors
    ///
    /// See [`Materializer::run_with_rng`].
    pub fn run(&self, date: NaiveDate) -> Result<MaterializeReport, MaterializeError> {
        self.run_with_rng(date, Utc::now().date_naive(), &mut rand::rngs::OsRng)
    }

    /// Materialize `date`, which must be before `today`.
    ///
    /// Re-running a completed day is a no-op.
    ///
    /// # Errors
    ///
    /// - `MaterializeError::DayNotClosed` if `date >= today`
    /// - `MaterializeError::Privacy` if a day key cannot be generated
    /// - `MaterializeError::Store` on storage failures
    pub fn run_with_rng<R>(
        &self,
        date: NaiveDate,
        today: NaiveDate,
        rng: &mut R,
    ) -> Result<MaterializeReport, MaterializeError>
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        if date >= today {
            return Err(MaterializeError::DayNotClosed(date));
        }
        let _guard = self.lock.lock().map_err(|_| MaterializeError::LockPoisoned)?;

        let run_id = RunId::generate();
        let mut entry = self
            .store
            .get_ledger(date)?
            .unwrap_or_else(|| LedgerEntry::pending(date, self.privacy.max_daily_epsilon));

        let day_key = self.noise.day_key(self.store.as_ref(), date, rng)?;
        let noise_seed = day_key.fingerprint();

        if let DayStatus::Materialized { partial } = entry.status {
            tracing::info!(%date, %run_id, "Day already materialized");
            return Ok(MaterializeReport {
                date,
                run_id,
                already_materialized: true,
                buckets_folded: 0,
                tiers_materialized: entry.charged_tiers.iter().copied().collect(),
                tiers_skipped: Tier::ALL
                    .into_iter()
                    .filter(|t| !entry.charged_tiers.contains(t))
                    .collect(),
                rows_written: 0,
                rows_existing: 0,
                epsilon_spent: entry.epsilon_spent,
                epsilon_limit: entry.epsilon_limit,
                partial,
                noise_seed,
            });
        }

        tracing::info!(%date, %run_id, noise_seed = %noise_seed, "Starting materialization");

        let buckets_folded = self.fold(date)?;

        let mechanism = self.privacy.mechanism()?;
        let tier_epsilon = mechanism.epsilon();
        let buckets = self.store.buckets_for_day(date)?;

        let mut tiers_materialized = Vec::new();
        let mut tiers_skipped = Vec::new();
        let mut rows_written = 0;
        let mut rows_existing = 0;

        for tier in Tier::ALL {
            if !tiers_skipped.is_empty() || !entry.can_charge(tier, tier_epsilon) {
                if tiers_skipped.is_empty() {
                    tracing::error!(
                        %date,
                        %run_id,
                        tier = %tier,
                        epsilon_spent = entry.epsilon_spent,
                        epsilon_limit = entry.epsilon_limit,
                        "Privacy budget exhausted; skipping remaining tiers"
                    );
                }
                tiers_skipped.push(tier);
                continue;
            }

            let rows: Vec<Snapshot> = self
                .tier_counts(tier, &buckets)
                .into_iter()
                .map(|(key, raw)| Snapshot {
                    noisy_count: mechanism.release(&day_key, &key.noise_label(tier), raw),
                    key,
                    tier,
                    epsilon_spent: tier_epsilon,
                    noise_seed: noise_seed.clone(),
                    run_id,
                    created_at: Utc::now(),
                })
                .collect();

            for chunk in rows.chunks(CHECKPOINT_CHUNK) {
                let written = self.store.put_snapshots(chunk)?;
                rows_written += written;
                rows_existing += chunk.len() - written;
            }

            entry.charge(tier, tier_epsilon)?;
            tiers_materialized.push(tier);
            tracing::debug!(%date, tier = %tier, rows = rows.len(), "Tier materialized");
        }

        let partial = !tiers_skipped.is_empty();
        entry.status = DayStatus::Materialized { partial };
        entry.updated_at = Utc::now();
        self.store.put_ledger(&entry)?;

        tracing::info!(
            %date,
            %run_id,
            rows_written,
            rows_existing,
            epsilon_spent = entry.epsilon_spent,
            partial,
            "Materialization complete"
        );

        Ok(MaterializeReport {
            date,
            run_id,
            already_materialized: false,
            buckets_folded,
            tiers_materialized,
            tiers_skipped,
            rows_written,
            rows_existing,
            epsilon_spent: entry.epsilon_spent,
            epsilon_limit: entry.epsilon_limit,
            partial,
            noise_seed,
        })
    }

    /// Debias the whole day's report tallies into buckets, once.
    ///
    /// Returns the number of buckets produced, zero if the day was folded by
    /// an earlier run.
    fn fold(&self, date: NaiveDate) -> Result<usize, MaterializeError> {
        if self.store.is_folded(date)? {
            return Ok(0);
        }
        let params = self.privacy.rr_params()?;
        let tallies = self.store.report_tallies(date)?;
        let estimates = debias_tallies(&params, &tallies);
        if !self.store.fold_reports(date, &estimates)? {
            return Ok(0);
        }
        tracing::info!(
            %date,
            tallies = tallies.len(),
            buckets = estimates.len(),
            "Reports folded into buckets"
        );
        Ok(estimates.len())
    }

    /// Raw counts of one tier, keyed by bucket identity.
    ///
    /// Rollup tiers replace the jurisdiction with the enclosing unit of the
    /// tier's level and sum. Buckets without a jurisdiction, or without an
    /// enclosing unit at that level, do not contribute to the tier.
    fn tier_counts(&self, tier: Tier, buckets: &[AggregateBucket]) -> BTreeMap<BucketKey, u64> {
        let mut counts = BTreeMap::new();
        let Some(level) = tier.rollup_level() else {
            for bucket in buckets {
                counts.insert(bucket.key.clone(), bucket.count);
            }
            return counts;
        };

        for bucket in buckets {
            let Some(unit) = bucket.key.dimensions.jurisdiction.as_ref() else {
                continue;
            };
            let Some(enclosing) = self.enclosing_unit(unit, level) else {
                continue;
            };
            let key = BucketKey::new(
                bucket.key.date,
                bucket.key.metric,
                bucket.key.dimensions.with_jurisdiction(enclosing),
            );
            *counts.entry(key).or_insert(0) += bucket.count;
        }
        counts
    }

    fn enclosing_unit(&self, unit: &GeoUnit, level: GeoLevel) -> Option<GeoUnit> {
        if unit.level() == level {
            return Some(unit.clone());
        }
        self.hierarchy
            .ancestors(unit)
            .into_iter()
            .find(|ancestor| ancestor.level() == level)
    }
}
