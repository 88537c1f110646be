//! The payment-provider seam.
//!
//! The engine holds no payment state; it hands an order to the provider and
//! later settles the callback. Amounts cross this boundary in integer cents.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Supported payment methods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Alipay (the default when the caller leaves the method unset).
    #[default]
    Alipay,
    /// WeChat Pay.
    Wechatpay,
}

impl PaymentMethod {
    /// Wire code used by the payment provider.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Alipay => 1,
            Self::Wechatpay => 2,
        }
    }

    /// Decode the wire code; `0` (unset) defaults to Alipay.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            2 => Self::Wechatpay,
            _ => Self::Alipay,
        }
    }
}

/// Request to create a payment with the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    /// Our order id, used by the provider as the business order number.
    pub order_id: String,
    /// The paying user.
    pub user_id: String,
    /// Platform recharges are not tied to an application; always empty here.
    pub app_id: String,
    /// Amount in integer cents.
    pub amount_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Payment method wire code.
    pub method: i32,
    /// Human-readable order subject.
    pub subject: String,
    /// Where the provider redirects the payer afterwards.
    pub return_url: String,
    /// Where the provider posts the settlement callback.
    pub notify_url: String,
    /// The payer's IP, forwarded for risk checks.
    pub client_ip: String,
}

/// Provider response to a create call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentReply {
    /// Provider-issued payment id.
    pub payment_id: String,
    /// Provider status code.
    pub status: i32,
    /// URL the payer is sent to.
    pub pay_url: String,
    /// QR-code payload, when applicable.
    #[serde(default)]
    pub pay_code: String,
    /// Extra client parameters, when applicable.
    #[serde(default)]
    pub pay_params: String,
}

/// The single call the engine makes against the payment provider.
#[async_trait]
pub trait PaymentClient: Send + Sync {
    /// Create a payment for a recharge order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PaymentCreateFailed`] when the provider call
    /// fails; the PENDING order row is left behind (it has no credit effect).
    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<CreatePaymentReply, EngineError>;
}
