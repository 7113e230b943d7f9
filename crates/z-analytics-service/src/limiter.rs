//! Server-side contribution limiter.
//!
//! Bounds how many increments one client can contribute per (UTC day,
//! reported metric). Overflow is dropped silently. The limiter is the only
//! producer of [`CappedBatch`], and ingestion only accepts a `CappedBatch`, so
//! every ingestion path passes through the cap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::task::JoinHandle;

use z_analytics_core::{Increment, Metric};

type CounterKey = (NaiveDate, String, Metric);

/// Increments that passed the contribution cap for one day.
#[derive(Debug)]
pub struct CappedBatch {
    date: NaiveDate,
    increments: Vec<Increment>,
}

impl CappedBatch {
    /// UTC day the batch is bucketed into.
    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        self.date
    }

    /// Admitted increments.
    #[must_use]
    pub fn increments(&self) -> &[Increment] {
        &self.increments
    }

    /// Number of admitted increments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.increments.len()
    }

    /// `true` if everything was dropped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.increments.is_empty()
    }
}

/// Per-client daily counters, injected into the application state.
#[derive(Debug)]
pub struct ContributionLimiter {
    cap: u32,
    counters: Mutex<HashMap<CounterKey, u32>>,
}

impl ContributionLimiter {
    /// Limiter allowing `cap` increments per client per (day, metric).
    #[must_use]
    pub fn new(cap: u32) -> Self {
        Self {
            cap,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Admit increments from `client_hash` on `date`, dropping those past the cap.
    ///
    /// Admission is atomic per call: concurrent batches from the same client
    /// cannot jointly exceed the cap.
    pub fn admit(
        &self,
        date: NaiveDate,
        client_hash: &str,
        increments: Vec<Increment>,
    ) -> CappedBatch {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let admitted = increments
            .into_iter()
            .filter(|increment| {
                let used = counters
                    .entry((date, client_hash.to_string(), increment.metric))
                    .or_insert(0);
                if *used >= self.cap {
                    return false;
                }
                *used += 1;
                true
            })
            .collect();

        CappedBatch {
            date,
            increments: admitted,
        }
    }

    /// Drop counters for days before `today`. Returns how many were removed.
    pub fn prune_before(&self, today: NaiveDate) -> usize {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let before = counters.len();
        counters.retain(|(date, _, _), _| *date >= today);
        before - counters.len()
    }

    /// Number of live counters.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Spawn the background task that prunes past days every `interval`.
    #[must_use]
    pub fn spawn_pruner(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = self.prune_before(Utc::now().date_naive());
                if removed > 0 {
                    tracing::debug!(removed, "Pruned contribution counters");
                }
            }
        })
    }
}
