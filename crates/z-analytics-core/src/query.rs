//! Query requests, responses and privacy metadata.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::coarsen::CoarsenedRow;
use crate::dimensions::{DimensionField, Dimensions};
use crate::error::{PrivacyError, Result};
use crate::metric::Metric;

/// A read against materialized snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuerySpec {
    /// Metric to read.
    pub metric: Metric,
    /// First day, inclusive.
    pub start_date: NaiveDate,
    /// Last day, inclusive.
    pub end_date: NaiveDate,
    /// Fields to group by.
    #[serde(default)]
    pub group_by: Vec<DimensionField>,
    /// Fields that must match.
    #[serde(default)]
    pub filters: Dimensions,
}

impl QuerySpec {
    /// Number of days in the inclusive range, or `None` if `start > end`.
    #[must_use]
    pub fn day_count(&self) -> Option<u32> {
        let span = self.end_date.signed_duration_since(self.start_date).num_days();
        u32::try_from(span).ok().and_then(|d| d.checked_add(1))
    }

    /// Reject reversed or oversized ranges. Ranges are never clipped.
    ///
    /// # Errors
    ///
    /// Returns `PrivacyError::InvalidRange`. The message only names the
    /// configured maximum.
    pub fn validate(&self, max_query_days: u32) -> Result<()> {
        match self.day_count() {
            None => Err(PrivacyError::InvalidRange(
                "start_date must not be after end_date".into(),
            )),
            Some(days) if days > max_query_days => Err(PrivacyError::InvalidRange(format!(
                "range exceeds the maximum of {max_query_days} days"
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Every day in the range, in order.
    #[must_use]
    pub fn days(&self) -> Vec<NaiveDate> {
        let mut out = Vec::new();
        let mut day = self.start_date;
        while day <= self.end_date {
            out.push(day);
            match day.checked_add_days(Days::new(1)) {
                Some(next) => day = next,
                None => break,
            }
        }
        out
    }

    /// Deduplicated group-by fields in canonical order.
    #[must_use]
    pub fn group_fields(&self) -> Vec<DimensionField> {
        DimensionField::ALL
            .iter()
            .copied()
            .filter(|f| self.group_by.contains(f))
            .collect()
    }
}

/// How much of the requested range is backed by snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    /// Every day fully materialized.
    Complete,
    /// Some days missing or partially materialized.
    Partial,
    /// No day available.
    Unavailable,
}

/// Privacy facts returned with every result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacyMetadata {
    /// Sum of ledger epsilon over the covered days.
    pub epsilon_spent: f64,
    /// Epsilon of the releases this query read.
    pub query_epsilon: f64,
    /// Always `true`.
    pub counts_are_noisy: bool,
    /// Always `true`.
    pub non_negative_integers: bool,
    /// Coverage of the range.
    pub coverage: Coverage,
    /// Days with no snapshots.
    pub unavailable_days: Vec<NaiveDate>,
    /// Days whose budget stopped some tiers.
    pub partial_days: Vec<NaiveDate>,
    /// Coarsening threshold.
    pub threshold: u64,
    /// Maximum range.
    pub max_query_days: u32,
}

/// Rows plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Metric read.
    pub metric: Metric,
    /// Result rows.
    pub rows: Vec<CoarsenedRow>,
    /// Privacy metadata.
    pub privacy: PrivacyMetadata,
}
