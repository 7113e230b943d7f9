//! Persisted records: buckets, snapshots and the privacy budget ledger.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::dimensions::{Dimensions, KEY_SEPARATOR};
use crate::error::{PrivacyError, Result};
use crate::geo::GeoLevel;
use crate::ids::RunId;
use crate::metric::Metric;
use crate::privacy::EPSILON_TOLERANCE;

/// One level of snapshot rows for a day.
///
/// `Native` holds every raw bucket as stored. Each rollup tier holds sums
/// over all buckets whose jurisdiction lies at or under a unit of that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Buckets as ingested.
    Native,
    /// Rollup to metro areas.
    Metro,
    /// Rollup to states.
    State,
    /// Rollup to Census regions.
    Region,
    /// Rollup to the whole country.
    National,
}

impl Tier {
    /// Materialization order.
    pub const ALL: [Self; 5] = [
        Self::Native,
        Self::Metro,
        Self::State,
        Self::Region,
        Self::National,
    ];

    /// Wire and key name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Metro => "metro",
            Self::State => "state",
            Self::Region => "region",
            Self::National => "national",
        }
    }

    /// Rollup tier holding units of `level`. Districts have no rollup tier.
    #[must_use]
    pub const fn for_level(level: GeoLevel) -> Option<Self> {
        match level {
            GeoLevel::District => None,
            GeoLevel::Metro => Some(Self::Metro),
            GeoLevel::State => Some(Self::State),
            GeoLevel::Region => Some(Self::Region),
            GeoLevel::National => Some(Self::National),
        }
    }

    /// Level of the units in a rollup tier.
    #[must_use]
    pub const fn rollup_level(self) -> Option<GeoLevel> {
        match self {
            Self::Native => None,
            Self::Metro => Some(GeoLevel::Metro),
            Self::State => Some(GeoLevel::State),
            Self::Region => Some(GeoLevel::Region),
            Self::National => Some(GeoLevel::National),
        }
    }

    /// Parse a key name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a bucket: `(utc_date, metric, dimension tuple)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    /// UTC day of ingestion.
    pub date: NaiveDate,
    /// Reported metric.
    pub metric: Metric,
    /// Dimension tuple.
    pub dimensions: Dimensions,
}

impl BucketKey {
    /// Create a key.
    #[must_use]
    pub fn new(date: NaiveDate, metric: Metric, dimensions: Dimensions) -> Self {
        Self {
            date,
            metric,
            dimensions,
        }
    }

    /// `metric|dims` label, the part of the key shared across days.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.metric, self.dimensions.canonical())
    }

    /// Label a tier's noise draw: `tier|metric|dims`.
    #[must_use]
    pub fn noise_label(&self, tier: Tier) -> String {
        format!("{tier}{KEY_SEPARATOR}{}", self.label())
    }
}

/// A raw count. Never read by queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateBucket {
    /// Bucket identity.
    pub key: BucketKey,
    /// Raw debiased count.
    pub count: u64,
}

/// An immutable, noisy, published count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Bucket identity (jurisdiction replaced by the rollup unit for rollup tiers).
    pub key: BucketKey,
    /// Tier the row belongs to.
    pub tier: Tier,
    /// `max(0, round(raw + noise))`.
    pub noisy_count: u64,
    /// Epsilon charged for the tier that produced this row.
    pub epsilon_spent: f64,
    /// Fingerprint of the day key used for the noise.
    pub noise_seed: String,
    /// Materialization run that wrote the row.
    pub run_id: RunId,
    /// Write time.
    pub created_at: DateTime<Utc>,
}

/// Materialization state of a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DayStatus {
    /// Not materialized; queries treat the day as unavailable.
    Pending,
    /// Snapshots written. `partial` when the budget stopped some tiers.
    Materialized {
        /// Some tiers were not materialized.
        partial: bool,
    },
}

impl DayStatus {
    /// `true` once snapshots exist.
    #[must_use]
    pub const fn is_materialized(self) -> bool {
        matches!(self, Self::Materialized { .. })
    }
}

/// Per-day privacy budget record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// UTC day.
    pub date: NaiveDate,
    /// Epsilon consumed so far.
    pub epsilon_spent: f64,
    /// Ceiling for the day.
    pub epsilon_limit: f64,
    /// Tiers already charged.
    pub charged_tiers: BTreeSet<Tier>,
    /// Materialization state.
    pub status: DayStatus,
    /// Last update.
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// A fresh pending entry.
    #[must_use]
    pub fn pending(date: NaiveDate, epsilon_limit: f64) -> Self {
        Self {
            date,
            epsilon_spent: 0.0,
            epsilon_limit,
            charged_tiers: BTreeSet::new(),
            status: DayStatus::Pending,
            updated_at: Utc::now(),
        }
    }

    /// `true` if `tier` is charged or `epsilon` more still fits.
    #[must_use]
    pub fn can_charge(&self, tier: Tier, epsilon: f64) -> bool {
        self.charged_tiers.contains(&tier)
            || self.epsilon_spent + epsilon <= self.epsilon_limit + EPSILON_TOLERANCE
    }

    /// Charge `epsilon` for `tier`. Charging a tier twice costs nothing.
    ///
    /// Returns `true` if budget was consumed.
    ///
    /// # Errors
    ///
    /// Returns `PrivacyError::BudgetExceeded` if the charge would pass the
    /// limit. The entry is unchanged in that case.
    pub fn charge(&mut self, tier: Tier, epsilon: f64) -> Result<bool> {
        if self.charged_tiers.contains(&tier) {
            return Ok(false);
        }
        if !self.can_charge(tier, epsilon) {
            return Err(PrivacyError::BudgetExceeded);
        }
        self.epsilon_spent += epsilon;
        self.charged_tiers.insert(tier);
        self.updated_at = Utc::now();
        Ok(true)
    }

    /// `true` if `next` is a legal successor: epsilon never decreases, never
    /// passes the limit, and charged tiers are never forgotten.
    #[must_use]
    pub fn admits_successor(&self, next: &Self) -> bool {
        next.date == self.date
            && next.epsilon_spent + EPSILON_TOLERANCE >= self.epsilon_spent
            && next.epsilon_spent <= next.epsilon_limit + EPSILON_TOLERANCE
            && self.charged_tiers.is_subset(&next.charged_tiers)
            && !(self.status.is_materialized() && !next.status.is_materialized())
    }
}
