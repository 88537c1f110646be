//! Recharge orders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Lifecycle of a recharge order.
///
/// `Pending` is initial; `Success` and `Failed` are terminal. The transition
/// to `Success` happens atomically with the balance credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Awaiting the payment provider's callback.
    Pending,

    /// Settled; the balance was credited. Terminal.
    Success,

    /// The provider reported failure. Terminal.
    Failed,
}

impl OrderStatus {
    /// Whether the order can still change state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Stable label used in responses and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// One row per recharge attempt.
///
/// `order_id` is minted by this service and passed to the payment provider as
/// the business order number; `payment_id` is the provider's identifier, set
/// exactly once on the settlement callback and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RechargeOrder {
    /// Internal order id (`recharge_<user>_<unix_seconds>`).
    pub order_id: String,

    /// The recharging user.
    pub user_id: UserId,

    /// Amount to credit, in cents.
    pub amount_cents: i64,

    /// Provider-issued payment id; unique when set.
    pub payment_id: Option<String>,

    /// Current lifecycle state.
    pub status: OrderStatus,

    /// When the order was created.
    pub created_at: DateTime<Utc>,

    /// When the order was last updated.
    pub updated_at: DateTime<Utc>,
}

impl RechargeOrder {
    /// A fresh pending order.
    #[must_use]
    pub fn pending(order_id: String, user_id: UserId, amount_cents: i64) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            user_id,
            amount_cents,
            payment_id: None,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_is_initial_and_open() {
        let o = RechargeOrder::pending(
            "recharge_u1_1700000000".into(),
            UserId::new("u1").unwrap(),
            5000,
        );
        assert_eq!(o.status, OrderStatus::Pending);
        assert!(!o.status.is_terminal());
        assert!(o.payment_id.is_none());
    }

    #[test]
    fn settled_states_are_terminal() {
        assert!(OrderStatus::Success.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
    }
}
