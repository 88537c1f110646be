//! Append-only deduction ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EntryId, UserId};

/// Which pool a deduction drew from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    /// Drawn from the monthly free quota; carries no monetary amount.
    Free,

    /// Drawn from the prepaid balance.
    Balance,
}

impl LedgerKind {
    /// Stable label used in responses and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Balance => "balance",
        }
    }
}

/// One immutable record of one deduction's one source.
///
/// A mixed deduction writes two entries, one per kind. Entries are never
/// updated or deleted after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique, time-ordered entry id.
    pub entry_id: EntryId,

    /// The charged user.
    pub user_id: UserId,

    /// The billed service.
    pub service_name: String,

    /// Source pool. Invariant: `kind == Free` implies `amount_cents == 0`.
    pub kind: LedgerKind,

    /// Monetary amount deducted, in cents. Zero for free entries.
    pub amount_cents: i64,

    /// Units consumed by this entry.
    pub count: i64,

    /// When the deduction happened.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// A free-quota entry (amount is always zero).
    #[must_use]
    pub fn free(
        entry_id: EntryId,
        user_id: UserId,
        service_name: impl Into<String>,
        count: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id,
            user_id,
            service_name: service_name.into(),
            kind: LedgerKind::Free,
            amount_cents: 0,
            count,
            created_at,
        }
    }

    /// A balance entry.
    #[must_use]
    pub fn balance(
        entry_id: EntryId,
        user_id: UserId,
        service_name: impl Into<String>,
        amount_cents: i64,
        count: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id,
            user_id,
            service_name: service_name.into(),
            kind: LedgerKind::Balance,
            amount_cents,
            count,
            created_at,
        }
    }
}
