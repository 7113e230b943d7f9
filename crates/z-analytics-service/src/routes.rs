//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, health, ingest, query};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for the ingest endpoint.
/// Ingest carries high-volume client traffic.
const INGEST_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for query endpoints.
const QUERY_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Maximum concurrent requests for admin endpoints. Materialization is
/// serialized internally; this only bounds queued callers.
const ADMIN_MAX_CONCURRENT_REQUESTS: usize = 4;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Service API Key auth
/// - `POST /v1/ingest` - Ingest a batch of perturbed increments
/// - `POST /v1/query` - Query materialized snapshots
///
/// ## Admin key auth
/// - `POST /v1/admin/materialize` - Materialize a closed day
/// - `GET /v1/admin/ledger/:date` - Privacy budget ledger entry
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let ingest_routes = Router::new()
        .route("/", post(ingest::ingest))
        .layer(ConcurrencyLimitLayer::new(INGEST_MAX_CONCURRENT_REQUESTS));

    let query_routes = Router::new()
        .route("/", post(query::query))
        .layer(ConcurrencyLimitLayer::new(QUERY_MAX_CONCURRENT_REQUESTS));

    let admin_routes = Router::new()
        .route("/materialize", post(admin::materialize))
        .route("/ledger/:date", get(admin::ledger))
        .layer(ConcurrencyLimitLayer::new(ADMIN_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        .nest("/ingest", ingest_routes)
        .nest("/query", query_routes)
        .nest("/admin", admin_routes);

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
