//! Monthly free quota rows.

use serde::{Deserialize, Serialize};

use crate::{BillingMonth, UserId};

/// A monthly free allowance for one `(user, service, month)` tuple.
///
/// Invariant: `0 <= used_quota <= total_quota`. Rows are created by the
/// monthly reset job or lazily on first check for a configured service, and
/// are only ever mutated by the deduct path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreeQuota {
    /// The owning user.
    pub user_id: UserId,

    /// The billed service this allowance applies to.
    pub service_name: String,

    /// Total units granted for the month.
    pub total_quota: i64,

    /// Units consumed so far.
    pub used_quota: i64,

    /// The month this row belongs to.
    pub reset_month: BillingMonth,
}

impl FreeQuota {
    /// A fresh, unused allowance.
    #[must_use]
    pub fn fresh(
        user_id: UserId,
        service_name: impl Into<String>,
        total_quota: i64,
        reset_month: BillingMonth,
    ) -> Self {
        Self {
            user_id,
            service_name: service_name.into(),
            total_quota,
            used_quota: 0,
            reset_month,
        }
    }

    /// Units still available this month.
    #[must_use]
    pub const fn remaining(&self) -> i64 {
        self.total_quota - self.used_quota
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_quota_has_full_remaining() {
        let q = FreeQuota::fresh(
            UserId::new("u1").unwrap(),
            "asr",
            100,
            "2025-01".parse().unwrap(),
        );
        assert_eq!(q.remaining(), 100);
        assert_eq!(q.used_quota, 0);
    }

    #[test]
    fn remaining_shrinks_with_use() {
        let mut q = FreeQuota::fresh(
            UserId::new("u1").unwrap(),
            "asr",
            100,
            "2025-01".parse().unwrap(),
        );
        q.used_quota = 70;
        assert_eq!(q.remaining(), 30);
    }
}
