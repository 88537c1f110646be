//! Statistics endpoint integration tests.

mod common;

use common::TestHarness;
use serde_json::json;

async fn seed_usage(harness: &TestHarness) {
    // Credit 1.00, then a mixed tts deduct (10 free + 5 paid = 10 cents) and
    // a pure free asr deduct.
    let response = harness
        .server
        .post("/v1/recharge")
        .json(&json!({ "user_id": "u1", "amount_cents": 100, "currency": "CNY" }))
        .await;
    let order_id = response.json::<serde_json::Value>()["order_id"]
        .as_str()
        .unwrap()
        .to_owned();
    harness
        .server
        .post("/internal/v1/recharge/callback")
        .json(&json!({
            "order_id": order_id,
            "payment_id": "pay_1",
            "amount_cents": 100,
            "status": "SUCCESS"
        }))
        .await
        .assert_status_ok();

    for (service, count) in [("tts", 15), ("asr", 30)] {
        harness
            .server
            .post("/internal/v1/quota/deduct")
            .json(&json!({ "user_id": "u1", "service_name": service, "count": count }))
            .await
            .assert_status_ok();
    }
    harness.settle_bus().await;
}

#[tokio::test]
async fn today_covers_fresh_usage() {
    let harness = TestHarness::new();
    seed_usage(&harness).await;

    let response = harness.server.get("/v1/stats/today/u1").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["total_count"], 45);
    assert_eq!(body["free_count"], 40);
    assert_eq!(body["paid_count"], 5);
    assert_eq!(body["total_cost_cents"], 10);
    assert_eq!(body["total_cost_formatted"], "0.10");
    assert_eq!(body["period"], "today");
}

#[tokio::test]
async fn month_filters_by_service() {
    let harness = TestHarness::new();
    seed_usage(&harness).await;

    let response = harness
        .server
        .get("/v1/stats/month/u1?service_name=tts")
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["service_name"], "tts");
    assert_eq!(body["total_count"], 15);
    assert_eq!(body["total_cost_cents"], 10);
    assert_eq!(body["period"], "month");
}

#[tokio::test]
async fn summary_groups_by_service() {
    let harness = TestHarness::new();
    seed_usage(&harness).await;

    let response = harness.server.get("/v1/stats/summary/u1").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["total_count"], 45);
    assert_eq!(body["total_cost_cents"], 10);

    let services = body["services"].as_array().unwrap();
    assert_eq!(services.len(), 2);
    assert_eq!(services[0]["service_name"], "asr");
    assert_eq!(services[0]["free_count"], 30);
    assert_eq!(services[1]["service_name"], "tts");
    assert_eq!(services[1]["paid_count"], 5);
}

#[tokio::test]
async fn empty_stats_are_zeroed() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/stats/today/nobody").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["total_count"], 0);
    assert_eq!(body["total_cost_cents"], 0);

    let response = harness.server.get("/v1/stats/summary/nobody").await;
    let body: serde_json::Value = response.json();
    assert!(body["services"].as_array().unwrap().is_empty());
}
