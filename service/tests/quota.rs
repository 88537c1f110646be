//! Internal quota surface integration tests.

mod common;

use common::TestHarness;
use serde_json::json;

use tally_core::{BillingMonth, LedgerKind, UserId};
use tally_store::Store;

fn check_body(user: &str, service: &str, count: i64) -> serde_json::Value {
    json!({ "user_id": user, "service_name": service, "count": count })
}

#[tokio::test]
async fn check_allows_free_and_creates_row() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/internal/v1/quota/check")
        .json(&check_body("u1", "asr", 1))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["allowed"], true);
    assert_eq!(body["reason"], "free");

    let row = harness
        .store
        .get_quota(
            &UserId::new("u1").unwrap(),
            "asr",
            &BillingMonth::current(),
        )
        .unwrap()
        .unwrap();
    assert_eq!(row.total_quota, 100);
    assert_eq!(row.used_quota, 0);
}

#[tokio::test]
async fn check_unknown_service_is_denied() {
    let harness = TestHarness::new();

    // Absent from both maps, and priced without a free quota: both unknown.
    for service in ["video", "ocr"] {
        let response = harness
            .server
            .post("/internal/v1/quota/check")
            .json(&check_body("u1", service, 1))
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["allowed"], false);
        assert_eq!(body["reason"], "unknown service");
    }
}

#[tokio::test]
async fn deduct_mixed_returns_balance_record_id() {
    let harness = TestHarness::new();

    // Credit 1.00 via the callback path.
    let response = harness
        .server
        .post("/v1/recharge")
        .json(&json!({ "user_id": "u1", "amount_cents": 100, "currency": "CNY" }))
        .await;
    response.assert_status_ok();
    let recharge: serde_json::Value = response.json();
    let order_id = recharge["order_id"].as_str().unwrap().to_owned();

    // No balance row until the callback lands.
    assert!(harness.store.distinct_user_ids().unwrap().is_empty());
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

    // 15 tts units: 10 free + 5 paid at 2 cents = 10 cents.
    let response = harness
        .server
        .post("/internal/v1/quota/deduct")
        .json(&check_body("u1", "tts", 15))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    let record_id = body["record_id"].as_str().unwrap().to_owned();

    harness.settle_bus().await;

    let user = UserId::new("u1").unwrap();
    let (entries, total) = harness.store.list_ledger(&user, 1, 10).unwrap();
    assert_eq!(total, 2);
    let balance_entry = entries
        .iter()
        .find(|e| e.kind == LedgerKind::Balance)
        .unwrap();
    assert_eq!(balance_entry.entry_id.to_string(), record_id);
    assert_eq!(balance_entry.amount_cents, 10);

    let balance = harness.store.get_balance(&user).unwrap().unwrap();
    assert_eq!(balance.balance_cents, 90);
}

#[tokio::test]
async fn deduct_insufficient_balance_is_402_with_code() {
    let harness = TestHarness::new();

    // Exhaust the tts quota, then ask for more with no balance.
    harness
        .server
        .post("/internal/v1/quota/deduct")
        .json(&check_body("u2", "tts", 10))
        .await
        .assert_status_ok();
    harness.settle_bus().await;

    let response = harness
        .server
        .post("/internal/v1/quota/deduct")
        .json(&check_body("u2", "tts", 5))
        .await;
    response.assert_status(axum::http::StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], 190_102);

    // No ledger entry was written for the failed deduct.
    let (_, total) = harness
        .store
        .list_ledger(&UserId::new("u2").unwrap(), 1, 10)
        .unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn zero_count_is_rejected() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/internal/v1/quota/deduct")
        .json(&check_body("u1", "asr", 0))
        .await;
    response.assert_status_bad_request();

    // Check reports the validation failure as a denial.
    let response = harness
        .server
        .post("/internal/v1/quota/check")
        .json(&check_body("u1", "asr", 0))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["allowed"], false);
}

#[tokio::test]
async fn records_list_pages_newest_first() {
    let harness = TestHarness::new();

    for _ in 0..3 {
        harness
            .server
            .post("/internal/v1/quota/deduct")
            .json(&check_body("u1", "asr", 5))
            .await
            .assert_status_ok();
    }
    harness.settle_bus().await;

    let response = harness.server.get("/v1/records/u1?page=1&page_size=2").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["total"], 3);
    assert_eq!(body["records"].as_array().unwrap().len(), 2);
    assert_eq!(body["records"][0]["kind"], "free");
    assert_eq!(body["records"][0]["count"], 5);
}
