//! Recharge and callback integration tests.

mod common;

use common::TestHarness;
use serde_json::json;

use tally_core::{OrderStatus, UserId};
use tally_store::Store;

async fn create_order(harness: &TestHarness, user: &str, cents: i64) -> String {
    let response = harness
        .server
        .post("/v1/recharge")
        .json(&json!({ "user_id": user, "amount_cents": cents, "currency": "CNY" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["payment_url"], "https://pay.example/checkout");
    body["order_id"].as_str().unwrap().to_owned()
}

fn callback_body(order_id: &str, payment_id: &str, cents: i64, status: &str) -> serde_json::Value {
    json!({
        "order_id": order_id,
        "payment_id": payment_id,
        "amount_cents": cents,
        "status": status
    })
}

#[tokio::test]
async fn recharge_creates_pending_order() {
    let harness = TestHarness::new();
    let order_id = create_order(&harness, "u3", 5_000).await;

    assert!(order_id.starts_with("recharge_u3_"));
    let order = harness.store.get_order(&order_id).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.amount_cents, 5_000);
}

#[tokio::test]
async fn recharge_requires_currency() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/recharge")
        .json(&json!({ "user_id": "u3", "amount_cents": 5_000, "currency": "" }))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], 190_503);
}

#[tokio::test]
async fn duplicate_callbacks_credit_once() {
    let harness = TestHarness::new();
    let order_id = create_order(&harness, "u3", 5_000).await;

    for _ in 0..2 {
        let response = harness
            .server
            .post("/internal/v1/recharge/callback")
            .json(&callback_body(&order_id, "pay_P", 5_000, "SUCCESS"))
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["success"], true);
    }

    let balance = harness
        .store
        .get_balance(&UserId::new("u3").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(balance.balance_cents, 5_000);

    let order = harness.store.get_order(&order_id).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Success);
    assert_eq!(order.payment_id.as_deref(), Some("pay_P"));
}

#[tokio::test]
async fn non_success_status_is_a_terminal_noop() {
    let harness = TestHarness::new();
    let order_id = create_order(&harness, "u3", 5_000).await;

    // Lowercase "success" must not settle either; the literal is exact.
    for status in ["FAILED", "PENDING", "success"] {
        let response = harness
            .server
            .post("/internal/v1/recharge/callback")
            .json(&callback_body(&order_id, "pay_P", 5_000, status))
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["success"], false);
    }

    assert!(harness
        .store
        .get_balance(&UserId::new("u3").unwrap())
        .unwrap()
        .is_none());
    let order = harness.store.get_order(&order_id).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn callback_for_unknown_order_is_404() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/internal/v1/recharge/callback")
        .json(&callback_body("recharge_ghost_1", "pay_G", 100, "SUCCESS"))
        .await;
    response.assert_status_not_found();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], 190_301);
}

#[tokio::test]
async fn credited_balance_is_spendable() {
    let harness = TestHarness::new();
    let order_id = create_order(&harness, "u3", 20).await;
    harness
        .server
        .post("/internal/v1/recharge/callback")
        .json(&callback_body(&order_id, "pay_P", 20, "SUCCESS"))
        .await
        .assert_status_ok();

    // Burn the tts quota, then spend exactly the credited 20 cents.
    harness
        .server
        .post("/internal/v1/quota/deduct")
        .json(&json!({ "user_id": "u3", "service_name": "tts", "count": 10 }))
        .await
        .assert_status_ok();
    let response = harness
        .server
        .post("/internal/v1/quota/deduct")
        .json(&json!({ "user_id": "u3", "service_name": "tts", "count": 10 }))
        .await;
    response.assert_status_ok();

    harness.settle_bus().await;
    let balance = harness
        .store
        .get_balance(&UserId::new("u3").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(balance.balance_cents, 0);
}
