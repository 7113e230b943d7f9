//! Ingestion pipeline: tally a capped batch into the day's report counters.
//!
//! Nothing is debiased here. A request carries a handful of reports, often
//! one, and correcting such a small group inflates every reported metric.
//! The day's tallies are debiased together when the day is materialized.

use z_analytics_core::tally_reports;
use z_analytics_store::{Store, StoreError};

use crate::limiter::CappedBatch;

/// Tally `batch` and add it to the store in one atomic write.
///
/// Returns the number of counters touched.
///
/// # Errors
///
/// Returns `StoreError` if the write fails. Nothing is applied in that case.
pub fn ingest_batch<S>(store: &S, batch: &CappedBatch) -> Result<usize, StoreError>
where
    S: Store + ?Sized,
{
    if batch.is_empty() {
        return Ok(0);
    }
    let tallies = tally_reports(batch.increments());
    store.add_reports(batch.date(), &tallies)
}
