//! User balance rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// A user's prepaid monetary wallet, one row per user.
///
/// The balance is never negative at a committed transaction boundary; any
/// deduction that would take it below zero aborts. Rows are created lazily on
/// first recharge, or at zero when a deduction first touches the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    /// The owning user.
    pub user_id: UserId,

    /// Current balance in cents. Invariant: `>= 0`.
    pub balance_cents: i64,

    /// When the row was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Create a zero balance for a user.
    #[must_use]
    pub fn zero(user_id: UserId) -> Self {
        Self {
            user_id,
            balance_cents: 0,
            updated_at: Utc::now(),
        }
    }

    /// Whether the balance covers a cost.
    #[must_use]
    pub const fn covers(&self, cost_cents: i64) -> bool {
        self.balance_cents >= cost_cents
    }
}
