//! Admin handlers: materialization and the privacy budget ledger.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{Days, NaiveDate, Utc};
use serde::Deserialize;

use z_analytics_core::LedgerEntry;
use z_analytics_store::Store;

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::materialize::MaterializeReport;
use crate::state::AppState;

/// Materialization request.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MaterializeRequest {
    /// Day to materialize. Defaults to yesterday (UTC).
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// Yesterday in UTC.
#[must_use]
pub fn yesterday() -> NaiveDate {
    let today = Utc::now().date_naive();
    today.checked_sub_days(Days::new(1)).unwrap_or(today)
}

/// Run one materialization pass. An empty body materializes yesterday.
pub async fn materialize(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    body: Bytes,
) -> Result<Json<MaterializeReport>, ApiError> {
    let request: MaterializeRequest = if body.is_empty() {
        MaterializeRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid request: {e}")))?
    };
    let date = request.date.unwrap_or_else(yesterday);
    tracing::info!(admin_id = %auth.admin_id, %date, "Materialization requested");

    let materializer = state.materializer.clone();
    let report = tokio::task::spawn_blocking(move || materializer.run(date))
        .await
        .map_err(|e| ApiError::Internal(format!("materialization task failed: {e}")))??;

    Ok(Json(report))
}

/// Ledger entry for one day.
pub async fn ledger(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Path(date): Path<NaiveDate>,
) -> Result<Json<LedgerEntry>, ApiError> {
    let entry = state
        .store
        .get_ledger(date)?
        .ok_or_else(|| ApiError::NotFound(format!("no ledger entry for {date}")))?;

    Ok(Json(entry))
}
