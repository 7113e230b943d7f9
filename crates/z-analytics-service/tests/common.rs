//! Common test utilities for z-analytics integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use chrono::NaiveDate;
use tempfile::TempDir;

use z_analytics_core::{debias_tallies, Dimensions, Metric, PrivacyConfig};
use z_analytics_service::{create_router, AppState, ServiceConfig};
use z_analytics_store::{RocksStore, Store};

/// Noise secret the harness configures.
pub const TEST_NOISE_SECRET: &str = "test-noise-secret-0123456789abcdef";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Direct store handle for seeding and inspecting state.
    pub store: Arc<RocksStore>,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// The service API key for ingest and query.
    pub service_api_key: String,
    /// The admin API key for materialization and the ledger.
    pub admin_api_key: String,
    /// Privacy parameters the service was built with.
    pub privacy: PrivacyConfig,
}

/// Privacy parameters for tests: weak enough that single-digit counts are
/// recovered reliably, strict enough to exercise every mechanism.
pub fn test_privacy() -> PrivacyConfig {
    PrivacyConfig {
        client_epsilon: 10.0,
        server_epsilon: 5.0,
        max_daily_epsilon: 25.0,
        ..PrivacyConfig::default()
    }
}

impl TestHarness {
    /// Create a new test harness with a fresh database.
    pub fn new() -> Self {
        Self::with_privacy(test_privacy())
    }

    /// Create a harness with specific privacy parameters.
    pub fn with_privacy(privacy: PrivacyConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(RocksStore::open(temp_dir.path()).expect("Failed to open store"));

        let service_api_key = "test-service-key".to_string();
        let admin_api_key = "test-admin-key".to_string();

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            service_api_key: Some(service_api_key.clone()),
            admin_api_key: Some(admin_api_key.clone()),
            noise_secret: Some(TEST_NOISE_SECRET.into()),
            client_hash_key: Some("test-client-hash-key".into()),
            privacy,
            ..ServiceConfig::default()
        };

        let state = AppState::new(Arc::clone(&store), config).expect("Failed to build state");
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            _temp_dir: temp_dir,
            service_api_key,
            admin_api_key,
            privacy,
        }
    }

    /// Seed raw bucket counts for a day, bypassing ingest.
    pub fn seed(&self, date: NaiveDate, buckets: &[(Metric, &str, u64)]) {
        let deltas: BTreeMap<_, _> = buckets
            .iter()
            .map(|(metric, jurisdiction, count)| {
                let dims = Dimensions::sanitize([("jurisdiction", *jurisdiction)])
                    .expect("valid jurisdiction");
                ((*metric, dims), *count)
            })
            .collect();
        self.store
            .add_to_buckets(date, &deltas)
            .expect("Failed to seed buckets");
    }

    /// Perturbed reports tallied for one jurisdiction-only tuple, not yet debiased.
    pub fn reported(&self, date: NaiveDate, metric: Metric, jurisdiction: &str) -> u64 {
        let dims = Dimensions::sanitize([("jurisdiction", jurisdiction)]).expect("valid");
        self.store
            .report_tallies(date)
            .expect("Failed to read report tallies")
            .get(&(metric, dims))
            .copied()
            .unwrap_or(0)
    }

    /// Total perturbed reports tallied for a day, across every metric and tuple.
    pub fn reported_total(&self, date: NaiveDate) -> u64 {
        self.store
            .report_tallies(date)
            .expect("Failed to read report tallies")
            .values()
            .sum()
    }

    /// Debiased estimate for one jurisdiction-only tuple over the whole day.
    pub fn estimate(&self, date: NaiveDate, metric: Metric, jurisdiction: &str) -> u64 {
        let dims = Dimensions::sanitize([("jurisdiction", jurisdiction)]).expect("valid");
        let params = self.privacy.rr_params().expect("valid client epsilon");
        let tallies = self
            .store
            .report_tallies(date)
            .expect("Failed to read report tallies");
        debias_tallies(&params, &tallies)
            .get(&(metric, dims))
            .copied()
            .unwrap_or(0)
    }

    /// Materialize a day through the admin API.
    pub async fn materialize(&self, date: NaiveDate) -> serde_json::Value {
        let response = self
            .server
            .post("/v1/admin/materialize")
            .add_header("x-admin-key", &self.admin_api_key)
            .json(&serde_json::json!({ "date": date }))
            .await;
        response.assert_status_ok();
        response.json()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A fixed past day.
pub fn past_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).expect("valid date")
}

/// A client identifier.
pub fn client_id(n: u32) -> String {
    format!("client-{n:016}")
}
