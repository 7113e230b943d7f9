//! Query handler.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;

use z_analytics_core::{QueryResult, QuerySpec};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::query::execute;
use crate::state::AppState;

/// Run a query against materialized snapshots.
///
/// Snapshot scans hit RocksDB, so the query runs on the blocking pool.
pub async fn query(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    body: Bytes,
) -> Result<Json<QueryResult>, ApiError> {
    let spec: QuerySpec = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid query: {e}")))?;

    let max_query_days = state.config.privacy.max_query_days;
    let result = tokio::task::spawn_blocking(move || {
        execute(
            state.store.as_ref(),
            &state.config.privacy,
            &state.hierarchy,
            &spec,
        )
    })
    .await
    .map_err(|e| ApiError::Internal(format!("query task failed: {e}")))?
    .map_err(|e| ApiError::from_query(e, max_query_days))?;

    Ok(Json(result))
}
