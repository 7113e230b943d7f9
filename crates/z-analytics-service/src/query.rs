//! Query execution against materialized snapshots.
//!
//! Only snapshot rows are read; raw buckets are never consulted. Native rows
//! are filtered, projected onto the group-by fields and summed across the
//! covered days, then handed to the coarsening engine together with the
//! matching rollup tiers.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use z_analytics_core::{
    CoarseningEngine, Coverage, DayStatus, DimensionField, Dimensions, GeoHierarchy, LedgerEntry,
    PrivacyConfig, PrivacyError, PrivacyMetadata, QueryResult, QuerySpec, Tier,
};
use z_analytics_store::{Store, StoreError};

/// Query errors.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The request is invalid (e.g. the range is too long).
    #[error(transparent)]
    Invalid(#[from] PrivacyError),

    /// Storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Noisy rollup counts for one query, summed over the days on which the tier
/// was materialized.
struct RollupIndex {
    counts: BTreeMap<(Tier, Dimensions), u64>,
    available: BTreeSet<Tier>,
}

impl RollupIndex {
    fn lookup(&self, tier: Tier, group: &Dimensions) -> Option<u64> {
        if !self.available.contains(&tier) {
            return None;
        }
        Some(self.counts.get(&(tier, group.clone())).copied().unwrap_or(0))
    }
}

/// Execute `spec` against `store`.
///
/// # Errors
///
/// - `QueryError::Invalid` if the range is reversed or longer than
///   `max_query_days`
/// - `QueryError::Store` on storage failures
pub fn execute<S>(
    store: &S,
    privacy: &PrivacyConfig,
    hierarchy: &GeoHierarchy,
    spec: &QuerySpec,
) -> Result<QueryResult, QueryError>
where
    S: Store + ?Sized,
{
    spec.validate(privacy.max_query_days)?;

    let mut available: Vec<LedgerEntry> = Vec::new();
    let mut unavailable_days: Vec<NaiveDate> = Vec::new();
    let mut partial_days: Vec<NaiveDate> = Vec::new();

    for day in spec.days() {
        match store.get_ledger(day)? {
            Some(entry) if entry.status.is_materialized() => {
                if matches!(entry.status, DayStatus::Materialized { partial: true }) {
                    partial_days.push(day);
                }
                available.push(entry);
            }
            _ => unavailable_days.push(day),
        }
    }

    let fields = spec.group_fields();
    let mut groups: BTreeMap<Dimensions, u64> = BTreeMap::new();
    for entry in &available {
        if !entry.charged_tiers.contains(&Tier::Native) {
            continue;
        }
        for row in store.snapshots(entry.date, Tier::Native, spec.metric)? {
            if row.key.dimensions.matches(&spec.filters, hierarchy) {
                *groups.entry(row.key.dimensions.project(&fields)).or_insert(0) += row.noisy_count;
            }
        }
    }

    let rollups = if fields.contains(&DimensionField::Jurisdiction) {
        load_rollups(store, spec, &fields, &available)?
    } else {
        RollupIndex {
            counts: BTreeMap::new(),
            available: BTreeSet::new(),
        }
    };

    let engine = CoarseningEngine::new(hierarchy, privacy.coarsen_threshold);
    let coarsened = engine.coarsen(&groups, &|tier: Tier, group: &Dimensions| {
        rollups.lookup(tier, group)
    });

    let tiers = coarsened.tiers_consulted.len().max(1);
    #[allow(clippy::cast_precision_loss)]
    let query_epsilon = privacy.server_epsilon * tiers as f64 * available.len() as f64;
    let epsilon_spent = available.iter().map(|e| e.epsilon_spent).sum();

    let coverage = if available.is_empty() {
        Coverage::Unavailable
    } else if unavailable_days.is_empty() && partial_days.is_empty() {
        Coverage::Complete
    } else {
        Coverage::Partial
    };

    tracing::debug!(
        metric = %spec.metric,
        days = available.len(),
        rows = coarsened.rows.len(),
        ?coverage,
        "Query served"
    );

    Ok(QueryResult {
        metric: spec.metric,
        rows: coarsened.rows,
        privacy: PrivacyMetadata {
            epsilon_spent,
            query_epsilon,
            counts_are_noisy: true,
            non_negative_integers: true,
            coverage,
            unavailable_days,
            partial_days,
            threshold: privacy.coarsen_threshold,
            max_query_days: privacy.max_query_days,
        },
    })
}

/// Rollup rows matching the non-geographic filters. A tier counts as
/// available only if it was charged on every covered day, so rollup sums
/// span the same days as the native sums.
fn load_rollups<S>(
    store: &S,
    spec: &QuerySpec,
    fields: &[DimensionField],
    available: &[LedgerEntry],
) -> Result<RollupIndex, StoreError>
where
    S: Store + ?Sized,
{
    let mut counts = BTreeMap::new();
    let mut tiers = BTreeSet::new();

    for tier in Tier::ALL.into_iter().filter(|t| *t != Tier::Native) {
        if available.is_empty() || !available.iter().all(|e| e.charged_tiers.contains(&tier)) {
            continue;
        }
        tiers.insert(tier);
        for entry in available {
            for row in store.snapshots(entry.date, tier, spec.metric)? {
                if row.key.dimensions.matches_except_jurisdiction(&spec.filters) {
                    *counts
                        .entry((tier, row.key.dimensions.project(fields)))
                        .or_insert(0) += row.noisy_count;
                }
            }
        }
    }

    Ok(RollupIndex {
        counts,
        available: tiers,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use tempfile::TempDir;

    use z_analytics_core::{BucketKey, GeoLevel, Metric, RunId, Snapshot};
    use z_analytics_store::RocksStore;

    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, d).unwrap()
    }

    fn dims(jurisdiction: &str) -> Dimensions {
        Dimensions::sanitize([("jurisdiction", jurisdiction)]).unwrap()
    }

    fn snapshot(date: NaiveDate, tier: Tier, jurisdiction: &str, noisy_count: u64) -> Snapshot {
        Snapshot {
            key: BucketKey::new(date, Metric::MessageSent, dims(jurisdiction)),
            tier,
            noisy_count,
            epsilon_spent: 0.5,
            noise_seed: "00".into(),
            run_id: RunId::generate(),
            created_at: Utc::now(),
        }
    }

    fn materialized(store: &RocksStore, date: NaiveDate, tiers: &[Tier]) {
        let mut entry = LedgerEntry::pending(date, 2.5);
        for tier in tiers {
            entry.charge(*tier, 0.5).unwrap();
        }
        entry.status = DayStatus::Materialized {
            partial: tiers.len() < Tier::ALL.len(),
        };
        store.put_ledger(&entry).unwrap();
    }

    fn spec(start: NaiveDate, end: NaiveDate, group_by: Vec<DimensionField>) -> QuerySpec {
        QuerySpec {
            metric: Metric::MessageSent,
            start_date: start,
            end_date: end,
            group_by,
            filters: Dimensions::default(),
        }
    }

    fn open() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (RocksStore::open(dir.path()).unwrap(), dir)
    }

    #[test]
    fn sparse_district_is_reported_at_state() {
        let (store, _dir) = open();
        store
            .put_snapshots(&[
                snapshot(day(1), Tier::Native, "CA-12", 3),
                snapshot(day(1), Tier::Native, "CA-07", 10),
                snapshot(day(1), Tier::State, "CA", 13),
                snapshot(day(1), Tier::Region, "R-WEST", 13),
                snapshot(day(1), Tier::National, "US", 13),
            ])
            .unwrap();
        materialized(&store, day(1), &Tier::ALL);

        let result = execute(
            &store,
            &PrivacyConfig::default(),
            &GeoHierarchy::new(),
            &spec(day(1), day(1), vec![DimensionField::Jurisdiction]),
        )
        .unwrap();

        assert_eq!(result.rows.len(), 2);
        let native = &result.rows[0];
        assert_eq!(native.dimensions, dims("CA-07"));
        assert!(!native.coarsened);

        let rolled = &result.rows[1];
        assert_eq!(rolled.dimensions, dims("CA"));
        assert!(rolled.coarsened);
        assert_eq!(rolled.coarsen_level, Some(GeoLevel::State));
        assert_eq!(rolled.original_level, Some(GeoLevel::District));
        assert_eq!(rolled.noisy_count, 13);

        assert_eq!(result.privacy.coverage, Coverage::Complete);
        // Native plus the state tier; without a metro mapping the walk skips metro.
        let expected = 0.5 * 2.0;
        assert!((result.privacy.query_epsilon - expected).abs() < 1e-9);
        assert!((result.privacy.epsilon_spent - 2.5).abs() < 1e-9);
    }

    #[test]
    fn pending_days_are_unavailable() {
        let (store, _dir) = open();
        store
            .put_snapshots(&[snapshot(day(1), Tier::Native, "NY", 20)])
            .unwrap();
        materialized(&store, day(1), &Tier::ALL);

        let result = execute(
            &store,
            &PrivacyConfig::default(),
            &GeoHierarchy::new(),
            &spec(day(1), day(3), vec![]),
        )
        .unwrap();

        assert_eq!(result.privacy.coverage, Coverage::Partial);
        assert_eq!(result.privacy.unavailable_days, vec![day(2), day(3)]);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].dimensions, Dimensions::default());
        assert_eq!(result.rows[0].noisy_count, 20);
    }

    #[test]
    fn nothing_materialized_is_unavailable() {
        let (store, _dir) = open();
        let result = execute(
            &store,
            &PrivacyConfig::default(),
            &GeoHierarchy::new(),
            &spec(day(1), day(2), vec![DimensionField::Jurisdiction]),
        )
        .unwrap();
        assert_eq!(result.privacy.coverage, Coverage::Unavailable);
        assert!(result.rows.is_empty());
        assert!(result.privacy.query_epsilon.abs() < 1e-12);
    }

    #[test]
    fn partial_day_limits_rollups() {
        let (store, _dir) = open();
        store
            .put_snapshots(&[
                snapshot(day(1), Tier::Native, "CA-12", 2),
                snapshot(day(1), Tier::Metro, "MSA-41860", 9),
            ])
            .unwrap();
        materialized(&store, day(1), &[Tier::Native, Tier::Metro]);

        let result = execute(
            &store,
            &PrivacyConfig::default(),
            &GeoHierarchy::new(),
            &spec(day(1), day(1), vec![DimensionField::Jurisdiction]),
        )
        .unwrap();

        assert_eq!(result.privacy.partial_days, vec![day(1)]);
        assert_eq!(result.privacy.coverage, Coverage::Partial);
        // No metro mapping, and the state tier was never charged.
        assert_eq!(result.rows.len(), 1);
        assert!(!result.rows[0].coarsened);
        assert_eq!(result.rows[0].noisy_count, 2);
    }

    #[test]
    fn filters_match_descendants() {
        let (store, _dir) = open();
        store
            .put_snapshots(&[
                snapshot(day(1), Tier::Native, "CA-12", 30),
                snapshot(day(1), Tier::Native, "CA-07", 10),
                snapshot(day(1), Tier::Native, "NY", 40),
            ])
            .unwrap();
        materialized(&store, day(1), &Tier::ALL);

        let mut query = spec(day(1), day(1), vec![]);
        query.filters = dims("CA");
        let result = execute(
            &store,
            &PrivacyConfig::default(),
            &GeoHierarchy::new(),
            &query,
        )
        .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].noisy_count, 40);
    }

    #[test]
    fn oversized_range_is_rejected() {
        let (store, _dir) = open();
        let privacy = PrivacyConfig::default();
        let end = day(1)
            .checked_add_days(chrono::Days::new(u64::from(privacy.max_query_days)))
            .unwrap();
        let err = execute(&store, &privacy, &GeoHierarchy::new(), &spec(day(1), end, vec![]))
            .unwrap_err();
        assert!(matches!(err, QueryError::Invalid(PrivacyError::InvalidRange(_))));
    }

    #[test]
    fn repeated_queries_are_identical() {
        let (store, _dir) = open();
        store
            .put_snapshots(&[
                snapshot(day(1), Tier::Native, "TX-07", 1),
                snapshot(day(1), Tier::Native, "OR", 8),
                snapshot(day(1), Tier::State, "TX", 4),
                snapshot(day(1), Tier::Region, "R-SOUTH", 6),
            ])
            .unwrap();
        materialized(&store, day(1), &Tier::ALL);

        let query = spec(day(1), day(1), vec![DimensionField::Jurisdiction]);
        let hierarchy = GeoHierarchy::new();
        let first = execute(&store, &PrivacyConfig::default(), &hierarchy, &query).unwrap();
        let second = execute(&store, &PrivacyConfig::default(), &hierarchy, &query).unwrap();
        assert_eq!(first, second);

        let levels: BTreeSet<_> = first.rows.iter().filter_map(|r| r.coarsen_level).collect();
        assert_eq!(levels, BTreeSet::from([GeoLevel::Region]));
    }
}
