//! Account endpoint integration tests.

mod common;

use common::TestHarness;

#[tokio::test]
async fn fresh_user_has_zero_balance_and_default_quotas() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/account/u1").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["user_id"], "u1");
    assert_eq!(body["balance_cents"], 0);
    assert_eq!(body["balance_formatted"], "0.00");

    let quotas = body["quotas"].as_array().unwrap();
    assert_eq!(quotas.len(), 2);
    assert_eq!(quotas[0]["service_name"], "asr");
    assert_eq!(quotas[0]["total_quota"], 100);
    assert_eq!(quotas[0]["used_quota"], 0);
    assert_eq!(quotas[1]["service_name"], "tts");
    assert_eq!(quotas[1]["total_quota"], 10);
}

#[tokio::test]
async fn account_reflects_usage() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/internal/v1/quota/deduct")
        .json(&serde_json::json!({
            "user_id": "u1",
            "service_name": "asr",
            "count": 30
        }))
        .await
        .assert_status_ok();
    harness.settle_bus().await;

    let response = harness.server.get("/v1/account/u1").await;
    let body: serde_json::Value = response.json();
    let asr = &body["quotas"][0];
    assert_eq!(asr["used_quota"], 30);
    assert_eq!(asr["remaining"], 70);
}

#[tokio::test]
async fn invalid_user_id_is_rejected() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/account/%20").await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], 190_709);
}

#[tokio::test]
async fn health_is_public() {
    let harness = TestHarness::new();
    let response = harness.server.get("/health").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
}
