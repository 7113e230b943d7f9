//! Z-Analytics Service - HTTP API for privacy-preserving aggregate analytics
//!
//! `z-analytics-service` serves HTTP. `z-analytics-service materialize
//! [YYYY-MM-DD]` runs one materialization pass (default: yesterday UTC) and
//! exits.
//!
//! The subcommand needs exclusive access to `DATA_DIR`: RocksDB admits one
//! open handle per directory, so it fails with a locked-store error while the
//! server is running. A scheduler running alongside the server must call
//! `POST /v1/admin/materialize` instead.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use z_analytics_service::handlers::admin::yesterday;
use z_analytics_service::{create_router, AppState, ServiceConfig};
use z_analytics_store::{RocksStore, StoreError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,z_analytics=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Load configuration from environment
    let config = ServiceConfig::from_env()?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        client_epsilon = config.privacy.client_epsilon,
        server_epsilon = config.privacy.server_epsilon,
        max_daily_epsilon = config.privacy.max_daily_epsilon,
        coarsen_threshold = config.privacy.coarsen_threshold,
        noise_secret_configured = %config.noise_secret.is_some(),
        metro_map_configured = %config.metro_map_path.is_some(),
        "Service configuration loaded"
    );

    // Initialize RocksDB store
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    let store = match RocksStore::open(&config.data_dir) {
        Ok(store) => Arc::new(store),
        Err(e @ StoreError::Locked { .. })
            if args.first().map(String::as_str) == Some("materialize") =>
        {
            tracing::error!(error = %e, "Store is held by a running server");
            return Err(format!("{e}; use POST /v1/admin/materialize on the running server").into());
        }
        Err(e) => return Err(e.into()),
    };

    let state = AppState::new(store, config.clone())?;

    match args.first().map(String::as_str) {
        Some("materialize") => {
            let date = match args.get(1) {
                Some(raw) => raw.parse::<NaiveDate>()?,
                None => yesterday(),
            };
            let materializer = state.materializer.clone();
            let report = tokio::task::spawn_blocking(move || materializer.run(date)).await??;
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
        Some(other) => {
            return Err(format!("unknown command: {other}").into());
        }
        None => {}
    }

    tracing::info!("Starting Z-Analytics Service");

    let _pruner = Arc::clone(&state.limiter).spawn_pruner(Duration::from_secs(
        config.limiter_prune_interval_seconds,
    ));

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
