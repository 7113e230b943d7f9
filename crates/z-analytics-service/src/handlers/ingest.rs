//! Ingest handler.
//!
//! A batch is either accepted whole or rejected whole with a generic message.
//! Rejected values are never echoed or logged. The response does not reveal
//! whether the contribution cap dropped anything.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use z_analytics_core::IngestBatch;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::ingest::ingest_batch;
use crate::state::AppState;

/// Ingest response. Identical for every accepted batch.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// Always `true`.
    pub accepted: bool,
}

/// Ingest a batch of perturbed increments.
///
/// The body is parsed by hand so schema failures map to the generic
/// `invalid batch` rejection instead of the extractor's detailed message.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    body: Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    let batch: IngestBatch =
        serde_json::from_slice(&body).map_err(|_| ApiError::invalid_batch())?;

    if batch.increments.is_empty() || batch.increments.len() > state.config.max_batch_size {
        return Err(ApiError::invalid_batch());
    }

    let date = Utc::now().date_naive();
    let client_hash = state.hasher.hash(&batch.client_id);
    let received = batch.increments.len();
    let capped = state.limiter.admit(date, &client_hash, batch.increments);

    let counters = ingest_batch(state.store.as_ref(), &capped)?;

    tracing::debug!(
        service = %auth.service_name,
        %date,
        received,
        counters,
        "Batch ingested"
    );

    Ok(Json(IngestResponse { accepted: true }))
}
