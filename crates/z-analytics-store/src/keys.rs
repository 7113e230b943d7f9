//! Key encoding utilities for `RocksDB`.
//!
//! All keys are UTF-8 and start with the ISO date, so one day's records are
//! contiguous and prefix-iterable:
//!
//! - bucket / report tally: `date|metric|dims`
//! - snapshot: `date|tier|metric|dims`
//! - ledger / noise key: `date`

use chrono::NaiveDate;
use z_analytics_core::{BucketKey, Dimensions, Metric, Tier};

const SEP: char = '|';

/// Key of a raw bucket counter.
#[must_use]
pub fn bucket_key(key: &BucketKey) -> Vec<u8> {
    format!("{}{SEP}{}", key.date, key.label()).into_bytes()
}

/// Prefix of every bucket of a day.
#[must_use]
pub fn day_prefix(date: NaiveDate) -> Vec<u8> {
    format!("{date}{SEP}").into_bytes()
}

/// Exclusive upper bound of every key starting with `prefix`.
///
/// Prefixes here end in the ASCII separator, so bumping the last byte never
/// overflows.
#[must_use]
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    if let Some(last) = end.last_mut() {
        *last = last.saturating_add(1);
    }
    end
}

/// Decode a bucket key.
#[must_use]
pub fn parse_bucket_key(raw: &[u8]) -> Option<BucketKey> {
    let text = std::str::from_utf8(raw).ok()?;
    let mut parts = text.splitn(3, SEP);
    let date = parts.next()?.parse().ok()?;
    let metric = Metric::parse(parts.next()?)?;
    let dimensions = Dimensions::from_canonical(parts.next()?).ok()?;
    Some(BucketKey::new(date, metric, dimensions))
}

/// Key of a snapshot row.
#[must_use]
pub fn snapshot_key(tier: Tier, key: &BucketKey) -> Vec<u8> {
    format!("{}{SEP}{tier}{SEP}{}", key.date, key.label()).into_bytes()
}

/// Prefix of one tier of a day's snapshots.
#[must_use]
pub fn snapshot_tier_prefix(date: NaiveDate, tier: Tier) -> Vec<u8> {
    format!("{date}{SEP}{tier}{SEP}").into_bytes()
}

/// Prefix of one metric within one tier of a day's snapshots.
#[must_use]
pub fn snapshot_metric_prefix(date: NaiveDate, tier: Tier, metric: Metric) -> Vec<u8> {
    format!("{date}{SEP}{tier}{SEP}{metric}{SEP}").into_bytes()
}

/// Key of a per-day record (ledger entry, noise key).
#[must_use]
pub fn date_key(date: NaiveDate) -> Vec<u8> {
    date.to_string().into_bytes()
}
