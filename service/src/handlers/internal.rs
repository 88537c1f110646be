//! Infra-facing handlers: quota check/deduct and the payment callback.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::handlers::accounts::parse_user;
use crate::state::AppState;

/// The payment provider's status literal that triggers settlement.
const PAYMENT_STATUS_SUCCESS: &str = "SUCCESS";

/// Quota check request.
#[derive(Debug, Deserialize)]
pub struct CheckQuotaRequest {
    /// The user asking to spend.
    pub user_id: String,
    /// The billed service.
    pub service_name: String,
    /// Units requested.
    pub count: i64,
}

/// Quota check response.
#[derive(Debug, Serialize)]
pub struct CheckQuotaResponse {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Which pool covers it, or why it was denied.
    pub reason: String,
}

/// May this user perform N units of service S?
///
/// Engine failures are reported as a denial with the error message, so the
/// gateway always gets a usable yes/no.
pub async fn check_quota(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CheckQuotaRequest>,
) -> Json<CheckQuotaResponse> {
    let user_id = match parse_user(&body.user_id) {
        Ok(user_id) => user_id,
        Err(err) => {
            return Json(CheckQuotaResponse {
                allowed: false,
                reason: err.to_string(),
            })
        }
    };

    match state.engine.check(&user_id, &body.service_name, body.count) {
        Ok(decision) => Json(CheckQuotaResponse {
            allowed: decision.allowed,
            reason: decision.reason.to_owned(),
        }),
        Err(err) => {
            tracing::error!(user_id = %user_id, service = %body.service_name, error = %err, "check failed");
            Json(CheckQuotaResponse {
                allowed: false,
                reason: err.to_string(),
            })
        }
    }
}

/// Deduct request.
#[derive(Debug, Deserialize)]
pub struct DeductQuotaRequest {
    /// The charged user.
    pub user_id: String,
    /// The billed service.
    pub service_name: String,
    /// Units to deduct.
    pub count: i64,
}

/// Deduct response.
#[derive(Debug, Serialize)]
pub struct DeductQuotaResponse {
    /// Whether the deduction committed.
    pub success: bool,
    /// The deduction record id.
    pub record_id: String,
}

/// Deduct N units from user U for service S.
pub async fn deduct_quota(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeductQuotaRequest>,
) -> Result<Json<DeductQuotaResponse>, ApiError> {
    let user_id = parse_user(&body.user_id)?;

    let entry_id = state
        .engine
        .deduct(&user_id, &body.service_name, body.count)
        .await?;

    Ok(Json(DeductQuotaResponse {
        success: true,
        record_id: entry_id.to_string(),
    }))
}

/// Recharge callback request from the payment provider (relayed over the
/// internal surface).
#[derive(Debug, Deserialize)]
pub struct RechargeCallbackRequest {
    /// The internal order id.
    pub order_id: String,
    /// The provider's payment id.
    pub payment_id: String,
    /// Paid amount in cents.
    pub amount_cents: i64,
    /// Provider status; only the literal `"SUCCESS"` settles.
    pub status: String,
}

/// Recharge callback response.
#[derive(Debug, Serialize)]
pub struct RechargeCallbackResponse {
    /// Whether the callback settled a credit.
    pub success: bool,
}

/// Settle a payment callback, idempotently.
pub async fn recharge_callback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RechargeCallbackRequest>,
) -> Result<Json<RechargeCallbackResponse>, ApiError> {
    if body.status != PAYMENT_STATUS_SUCCESS {
        // Terminal no-op for anything but a success status.
        tracing::warn!(
            order_id = %body.order_id,
            status = %body.status,
            "recharge callback with non-success status"
        );
        return Ok(Json(RechargeCallbackResponse { success: false }));
    }

    state
        .recharge
        .settle_callback(&body.order_id, &body.payment_id, body.amount_cents)
        .await?;

    Ok(Json(RechargeCallbackResponse { success: true }))
}
