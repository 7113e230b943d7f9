//! Local contribution bounding.

use std::collections::HashMap;

use chrono::NaiveDate;

use z_analytics_core::Metric;

/// Caps how many increments this client emits per (UTC day, metric).
///
/// Keyed on the true metric, before perturbation. Counters reset when the
/// day changes. Increments past the cap are dropped with no error.
#[derive(Debug)]
pub struct ContributionTracker {
    cap: u32,
    day: Option<NaiveDate>,
    counts: HashMap<Metric, u32>,
}

impl ContributionTracker {
    /// Tracker allowing `cap` increments per metric per day.
    #[must_use]
    pub fn new(cap: u32) -> Self {
        Self {
            cap,
            day: None,
            counts: HashMap::new(),
        }
    }

    /// Record one increment of `metric` on `today`. Returns `false` if the
    /// cap is already reached and the increment must be dropped.
    pub fn try_admit(&mut self, today: NaiveDate, metric: Metric) -> bool {
        if self.day != Some(today) {
            self.day = Some(today);
            self.counts.clear();
        }
        let used = self.counts.entry(metric).or_insert(0);
        if *used >= self.cap {
            return false;
        }
        *used += 1;
        true
    }

    /// Increments still allowed for `metric` on `today`.
    #[must_use]
    pub fn remaining(&self, today: NaiveDate, metric: Metric) -> u32 {
        if self.day != Some(today) {
            return self.cap;
        }
        self.cap
            .saturating_sub(self.counts.get(&metric).copied().unwrap_or(0))
    }
}
