//! Recharge handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use tally_engine::recharge::RechargeParams;
use tally_engine::PaymentMethod;

use crate::error::ApiError;
use crate::handlers::accounts::parse_user;
use crate::state::AppState;

/// Recharge request.
#[derive(Debug, Deserialize)]
pub struct RechargeRequest {
    /// The recharging user.
    pub user_id: String,
    /// Amount in cents.
    pub amount_cents: i64,
    /// Payment method wire code; 0/absent defaults to Alipay.
    #[serde(default)]
    pub payment_method: i32,
    /// ISO currency code.
    pub currency: String,
    /// Where the provider redirects the payer afterwards.
    #[serde(default)]
    pub return_url: String,
    /// Where the provider posts the settlement callback.
    #[serde(default)]
    pub notify_url: String,
}

/// Recharge response.
#[derive(Debug, Serialize)]
pub struct RechargeResponse {
    /// The internal order id.
    pub order_id: String,
    /// Where to send the payer.
    pub payment_url: String,
}

/// Create a recharge order with the payment provider.
pub async fn recharge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RechargeRequest>,
) -> Result<Json<RechargeResponse>, ApiError> {
    let user_id = parse_user(&body.user_id)?;

    tracing::info!(
        user_id = %user_id,
        amount_cents = body.amount_cents,
        currency = %body.currency,
        "recharge requested"
    );

    let created = state
        .recharge
        .create_recharge(RechargeParams {
            user_id,
            amount_cents: body.amount_cents,
            method: (body.payment_method != 0)
                .then(|| PaymentMethod::from_code(body.payment_method)),
            currency: body.currency,
            return_url: body.return_url,
            notify_url: body.notify_url,
            client_ip: client_ip(&headers),
        })
        .await?;

    Ok(Json(RechargeResponse {
        order_id: created.order_id,
        payment_url: created.pay_url,
    }))
}

/// Best-effort client IP from proxy headers.
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .unwrap_or_default()
        .trim()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_takes_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "203.0.113.9");
        assert_eq!(client_ip(&HeaderMap::new()), "");
    }
}
