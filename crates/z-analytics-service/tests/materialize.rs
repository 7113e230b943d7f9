//! Materialization and ledger integration tests.

mod common;

use axum::http::StatusCode;
use chrono::{Days, Utc};
use common::{past_day, test_privacy, TestHarness};
use serde_json::json;

use z_analytics_core::{Metric, PrivacyConfig, Tier};
use z_analytics_store::Store;

#[tokio::test]
async fn materializes_every_tier() {
    let harness = TestHarness::new();
    harness.seed(
        past_day(),
        &[
            (Metric::TemplateUse, "CA-12", 1),
            (Metric::TemplateUse, "CA-07", 200),
            (Metric::TemplateUse, "NY", 80),
        ],
    );

    let report = harness.materialize(past_day()).await;

    assert_eq!(report["already_materialized"], false);
    assert_eq!(report["partial"], false);
    assert_eq!(
        report["tiers_materialized"],
        json!(["native", "metro", "state", "region", "national"])
    );
    assert_eq!(report["epsilon_spent"], 25.0);
    assert_eq!(report["noise_seed"].as_str().unwrap().len(), 16);

    assert_eq!(harness.store.count_snapshots(past_day(), Tier::Native).unwrap(), 3);
    assert_eq!(harness.store.count_snapshots(past_day(), Tier::State).unwrap(), 2);
    assert_eq!(harness.store.count_snapshots(past_day(), Tier::National).unwrap(), 1);
}

#[tokio::test]
async fn rerun_is_idempotent() {
    let harness = TestHarness::new();
    harness.seed(past_day(), &[(Metric::MessageSent, "OR", 12)]);

    harness.materialize(past_day()).await;
    let snapshots = harness
        .store
        .snapshots(past_day(), Tier::Native, Metric::MessageSent)
        .unwrap();
    let ledger = harness.store.get_ledger(past_day()).unwrap();

    // Late data for a closed day is never re-noised into snapshots.
    harness.seed(past_day(), &[(Metric::MessageSent, "OR", 500)]);
    let report = harness.materialize(past_day()).await;

    assert_eq!(report["already_materialized"], true);
    assert_eq!(report["rows_written"], 0);
    assert_eq!(
        harness
            .store
            .snapshots(past_day(), Tier::Native, Metric::MessageSent)
            .unwrap(),
        snapshots
    );
    assert_eq!(harness.store.get_ledger(past_day()).unwrap(), ledger);
}

#[tokio::test]
async fn budget_exhaustion_records_partial_day() {
    let harness = TestHarness::with_privacy(PrivacyConfig {
        max_daily_epsilon: 12.0,
        ..test_privacy()
    });
    harness.seed(past_day(), &[(Metric::MessageSent, "OR", 12)]);

    let report = harness.materialize(past_day()).await;
    assert_eq!(report["partial"], true);
    assert_eq!(report["tiers_materialized"], json!(["native", "metro"]));
    assert_eq!(report["tiers_skipped"], json!(["state", "region", "national"]));

    let response = harness
        .server
        .get(&format!("/v1/admin/ledger/{}", past_day()))
        .add_header("x-admin-key", &harness.admin_api_key)
        .await;
    response.assert_status_ok();
    let ledger: serde_json::Value = response.json();
    assert_eq!(ledger["epsilon_spent"], 10.0);
    assert_eq!(ledger["epsilon_limit"], 12.0);
    assert_eq!(ledger["status"], json!({ "state": "materialized", "partial": true }));
}

#[tokio::test]
async fn open_day_is_refused() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/admin/materialize")
        .add_header("x-admin-key", &harness.admin_api_key)
        .json(&json!({ "date": Utc::now().date_naive() }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    assert!(harness
        .store
        .get_ledger(Utc::now().date_naive())
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn empty_body_materializes_yesterday() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/admin/materialize")
        .add_header("x-admin-key", &harness.admin_api_key)
        .await;

    response.assert_status_ok();
    let report: serde_json::Value = response.json();
    let yesterday = Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(1))
        .unwrap();
    assert_eq!(report["date"], json!(yesterday));
}

#[tokio::test]
async fn ledger_for_unknown_day_is_not_found() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/admin/ledger/2020-01-01")
        .add_header("x-admin-key", &harness.admin_api_key)
        .await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn admin_routes_require_admin_key() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/admin/materialize")
        .add_header("x-api-key", &harness.service_api_key)
        .json(&json!({ "date": past_day() }))
        .await;
    response.assert_status_unauthorized();

    let response = harness
        .server
        .get(&format!("/v1/admin/ledger/{}", past_day()))
        .add_header("x-admin-key", &harness.service_api_key)
        .await;
    response.assert_status_unauthorized();
}
