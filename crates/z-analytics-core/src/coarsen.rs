//! Noise-first geographic coarsening.
//!
//! The engine only ever sees noisy counts: the native group counts it is
//! handed and whatever its [`NoisyLookup`] returns for rollup tiers. A group
//! whose noisy count is below the threshold is replaced by the first coarser
//! unit whose own (independently noised) count meets it. Small groups are
//! folded into a coarser row rather than dropped.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::dimensions::Dimensions;
use crate::geo::{GeoHierarchy, GeoLevel, GeoUnit};
use crate::records::Tier;

/// Source of noisy rollup counts.
pub trait NoisyLookup {
    /// Noisy count for `group` in `tier`, `None` if the tier was not
    /// materialized for the data in scope.
    fn noisy_count(&self, tier: Tier, group: &Dimensions) -> Option<u64>;
}

impl<F> NoisyLookup for F
where
    F: Fn(Tier, &Dimensions) -> Option<u64>,
{
    fn noisy_count(&self, tier: Tier, group: &Dimensions) -> Option<u64> {
        self(tier, group)
    }
}

/// A reported group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoarsenedRow {
    /// Group tuple at the reported level.
    pub dimensions: Dimensions,
    /// Noisy count at the reported level.
    pub noisy_count: u64,
    /// The group was replaced by a coarser unit.
    pub coarsened: bool,
    /// Level reported, when coarsened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coarsen_level: Option<GeoLevel>,
    /// Finest level folded into this row, when coarsened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_level: Option<GeoLevel>,
    /// Levels consulted to produce the row.
    pub levels_consumed: u32,
    /// The reported count is still below the threshold: no coarser level
    /// existed or the coarsest one reached was also sparse.
    #[serde(default)]
    pub below_threshold: bool,
}

/// Outcome of coarsening a set of groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coarsened {
    /// Rows sorted by group tuple, coarsened rows after native ones on ties.
    pub rows: Vec<CoarsenedRow>,
    /// Every tier read, including `Native`.
    pub tiers_consulted: BTreeSet<Tier>,
}

/// Walks groups up the geographic hierarchy until they meet the threshold.
#[derive(Debug, Clone, Copy)]
pub struct CoarseningEngine<'a> {
    hierarchy: &'a GeoHierarchy,
    threshold: u64,
}

impl<'a> CoarseningEngine<'a> {
    /// Create an engine.
    #[must_use]
    pub const fn new(hierarchy: &'a GeoHierarchy, threshold: u64) -> Self {
        Self {
            hierarchy,
            threshold,
        }
    }

    /// Minimum noisy count.
    #[must_use]
    pub const fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Coarsen native groups.
    ///
    /// `groups` maps each projected group tuple to its noisy native count.
    /// Groups without a jurisdiction cannot move up the hierarchy and are
    /// reported as they are. Fine groups that roll into the same coarse unit
    /// yield one row.
    pub fn coarsen<L>(&self, groups: &BTreeMap<Dimensions, u64>, lookup: &L) -> Coarsened
    where
        L: NoisyLookup + ?Sized,
    {
        let mut tiers_consulted = BTreeSet::new();
        if !groups.is_empty() {
            tiers_consulted.insert(Tier::Native);
        }

        // Keyed by (tuple, coarsened) so a native row and a rollup row for the
        // same unit stay distinct.
        let mut rows: BTreeMap<(Dimensions, bool), CoarsenedRow> = BTreeMap::new();

        for (group, &count) in groups {
            let row = match group.jurisdiction.as_ref() {
                Some(unit) if count < self.threshold => {
                    self.walk(group, unit, count, lookup, &mut tiers_consulted)
                }
                _ => CoarsenedRow {
                    dimensions: group.clone(),
                    noisy_count: count,
                    coarsened: false,
                    coarsen_level: None,
                    original_level: None,
                    levels_consumed: 1,
                    below_threshold: count < self.threshold,
                },
            };

            rows.entry((row.dimensions.clone(), row.coarsened))
                .and_modify(|existing| {
                    existing.levels_consumed = existing.levels_consumed.max(row.levels_consumed);
                    existing.original_level = existing.original_level.min(row.original_level);
                })
                .or_insert(row);
        }

        Coarsened {
            rows: rows.into_values().collect(),
            tiers_consulted,
        }
    }

    fn walk<L>(
        &self,
        group: &Dimensions,
        unit: &GeoUnit,
        native_count: u64,
        lookup: &L,
        tiers_consulted: &mut BTreeSet<Tier>,
    ) -> CoarsenedRow
    where
        L: NoisyLookup + ?Sized,
    {
        let mut levels_consumed = 1;
        let mut reached: Option<(GeoUnit, u64)> = None;

        for ancestor in self.hierarchy.ancestors(unit) {
            let Some(tier) = Tier::for_level(ancestor.level()) else {
                continue;
            };
            levels_consumed += 1;
            tiers_consulted.insert(tier);
            let candidate = group.with_jurisdiction(ancestor.clone());
            if let Some(count) = lookup.noisy_count(tier, &candidate) {
                let done = count >= self.threshold;
                reached = Some((ancestor, count));
                if done {
                    break;
                }
            }
        }

        match reached {
            Some((coarse, count)) => CoarsenedRow {
                coarsen_level: Some(coarse.level()),
                original_level: Some(unit.level()),
                dimensions: group.with_jurisdiction(coarse),
                noisy_count: count,
                coarsened: true,
                levels_consumed,
                below_threshold: count < self.threshold,
            },
            // No coarser tier exists for this data: the native level is the
            // coarsest available one.
            None => CoarsenedRow {
                dimensions: group.clone(),
                noisy_count: native_count,
                coarsened: false,
                coarsen_level: None,
                original_level: None,
                levels_consumed,
                below_threshold: native_count < self.threshold,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn group(jurisdiction: &str) -> Dimensions {
        Dimensions {
            jurisdiction: Some(jurisdiction.parse().unwrap()),
            ..Dimensions::default()
        }
    }

    fn table(entries: &[(Tier, &str, u64)]) -> HashMap<(Tier, Dimensions), u64> {
        entries
            .iter()
            .map(|(tier, code, count)| ((*tier, group(code)), *count))
            .collect()
    }

    #[test]
    fn groups_at_threshold_are_not_coarsened() {
        let hierarchy = GeoHierarchy::new();
        let engine = CoarseningEngine::new(&hierarchy, 5);
        let groups = BTreeMap::from([(group("CA-07"), 5)]);
        let lookup = |_: Tier, _: &Dimensions| -> Option<u64> { panic!("no rollup needed") };

        let out = engine.coarsen(&groups, &lookup);
        assert_eq!(out.rows.len(), 1);
        assert!(!out.rows[0].coarsened);
        assert_eq!(out.rows[0].levels_consumed, 1);
        assert_eq!(out.tiers_consulted, BTreeSet::from([Tier::Native]));
    }

    #[test]
    fn sparse_district_rolls_up_to_state() {
        let hierarchy = GeoHierarchy::new();
        let engine = CoarseningEngine::new(&hierarchy, 5);
        let groups = BTreeMap::from([(group("CA-12"), 3), (group("CA-07"), 10)]);
        let rollups = table(&[(Tier::State, "CA", 13)]);
        let lookup = |tier: Tier, dims: &Dimensions| rollups.get(&(tier, dims.clone())).copied();

        let out = engine.coarsen(&groups, &lookup);
        let codes: Vec<_> = out
            .rows
            .iter()
            .map(|r| (r.dimensions.canonical(), r.coarsened))
            .collect();
        assert_eq!(
            codes,
            vec![
                ("~|CA-07|~|~|~".to_string(), false),
                ("~|CA|~|~|~".to_string(), true),
            ]
        );
        let state = &out.rows[1];
        assert_eq!(state.coarsen_level, Some(GeoLevel::State));
        assert_eq!(state.original_level, Some(GeoLevel::District));
        assert_eq!(state.noisy_count, 13);
        assert_eq!(state.levels_consumed, 2);
    }

    #[test]
    fn decision_uses_noisy_counts_only() {
        // The true district count may be 6, but the engine only sees the noisy
        // value 4 and must coarsen on it.
        let hierarchy = GeoHierarchy::new();
        let engine = CoarseningEngine::new(&hierarchy, 5);
        let groups = BTreeMap::from([(group("NY-10"), 4)]);
        let rollups = table(&[(Tier::State, "NY", 9)]);
        let lookup = |tier: Tier, dims: &Dimensions| rollups.get(&(tier, dims.clone())).copied();

        let out = engine.coarsen(&groups, &lookup);
        assert_eq!(out.rows.len(), 1);
        assert!(out.rows[0].coarsened);
        assert_eq!(out.rows[0].dimensions, group("NY"));
    }

    #[test]
    fn walk_continues_until_threshold_and_stops_at_national() {
        let hierarchy = GeoHierarchy::new();
        let engine = CoarseningEngine::new(&hierarchy, 50);
        let groups = BTreeMap::from([(group("VT-AL"), 1)]);
        let rollups = table(&[
            (Tier::State, "VT", 2),
            (Tier::Region, "R-NORTHEAST", 20),
            (Tier::National, "US", 40),
        ]);
        let lookup = |tier: Tier, dims: &Dimensions| rollups.get(&(tier, dims.clone())).copied();

        let out = engine.coarsen(&groups, &lookup);
        let row = &out.rows[0];
        assert_eq!(row.dimensions, group("US"));
        assert_eq!(row.noisy_count, 40);
        assert_eq!(row.coarsen_level, Some(GeoLevel::National));
        assert_eq!(row.levels_consumed, 4);
        assert_eq!(
            out.tiers_consulted,
            BTreeSet::from([Tier::Native, Tier::State, Tier::Region, Tier::National])
        );
    }

    #[test]
    fn district_without_metro_skips_metro_level() {
        let map = crate::geo::MetroMap {
            districts: BTreeMap::from([("TX-07".into(), "MSA-26420".into())]),
            metros: BTreeMap::from([("MSA-26420".into(), "TX".into())]),
        };
        let hierarchy = GeoHierarchy::from_metro_map(&map).unwrap();
        let engine = CoarseningEngine::new(&hierarchy, 5);
        let groups = BTreeMap::from([(group("TX-07"), 1), (group("TX-30"), 1)]);
        let rollups = table(&[(Tier::Metro, "MSA-26420", 2), (Tier::State, "TX", 8)]);
        let lookup = |tier: Tier, dims: &Dimensions| rollups.get(&(tier, dims.clone())).copied();

        let out = engine.coarsen(&groups, &lookup);
        assert_eq!(out.rows.len(), 1);
        // TX-07 passes through the metro (3 levels); TX-30 goes straight to state (2).
        assert_eq!(out.rows[0].dimensions, group("TX"));
        assert_eq!(out.rows[0].levels_consumed, 3);
    }

    #[test]
    fn missing_rollups_keep_native_row() {
        let hierarchy = GeoHierarchy::new();
        let engine = CoarseningEngine::new(&hierarchy, 5);
        let groups = BTreeMap::from([(group("CA-12"), 2)]);
        let lookup = |_: Tier, _: &Dimensions| -> Option<u64> { None };

        let out = engine.coarsen(&groups, &lookup);
        assert_eq!(out.rows[0].dimensions, group("CA-12"));
        assert!(!out.rows[0].coarsened);
        assert!(out.rows[0].below_threshold);
    }

    #[test]
    fn stops_at_coarsest_available_level() {
        let hierarchy = GeoHierarchy::new();
        let engine = CoarseningEngine::new(&hierarchy, 100);
        let groups = BTreeMap::from([(group("CA-12"), 2)]);
        let rollups = table(&[(Tier::State, "CA", 10), (Tier::Region, "R-WEST", 30)]);
        let lookup = |tier: Tier, dims: &Dimensions| rollups.get(&(tier, dims.clone())).copied();

        let out = engine.coarsen(&groups, &lookup);
        assert_eq!(out.rows[0].dimensions, group("R-WEST"));
        assert_eq!(out.rows[0].noisy_count, 30);
        assert!(out.rows[0].coarsened);
        assert!(out.rows[0].below_threshold);
    }

    #[test]
    fn rows_meeting_the_threshold_are_not_flagged() {
        let hierarchy = GeoHierarchy::new();
        let engine = CoarseningEngine::new(&hierarchy, 5);
        let groups = BTreeMap::from([(group("CA-12"), 2), (group("NY-03"), 9)]);
        let rollups = table(&[(Tier::State, "CA", 40)]);
        let lookup = |tier: Tier, dims: &Dimensions| rollups.get(&(tier, dims.clone())).copied();

        let out = engine.coarsen(&groups, &lookup);
        assert_eq!(out.rows.len(), 2);
        assert!(out.rows.iter().all(|r| !r.below_threshold));
    }

    #[test]
    fn sparse_group_without_jurisdiction_is_flagged() {
        let hierarchy = GeoHierarchy::new();
        let engine = CoarseningEngine::new(&hierarchy, 5);
        let groups = BTreeMap::from([(Dimensions::default(), 3)]);
        let lookup = |_: Tier, _: &Dimensions| -> Option<u64> { None };

        let out = engine.coarsen(&groups, &lookup);
        assert_eq!(out.rows[0].noisy_count, 3);
        assert!(!out.rows[0].coarsened);
        assert!(out.rows[0].below_threshold);
    }
}
