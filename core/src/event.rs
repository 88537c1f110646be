//! Async settlement events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BillingMonth, EntryId, UserId};

/// Message-bus topic for deduction events.
pub const DEDUCT_TOPIC: &str = "billing_deduct_queue";

/// The message published after a successful fast-path deduction.
///
/// The consumer replays it against the database: additive quota/balance
/// updates plus the ledger append. Immutable once published; the split
/// (`free_count` / `paid_count` / `balance_deducted_cents`) was already
/// decided atomically by the cache script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeductEvent {
    /// The record id returned to the caller; lands on the BALANCE ledger
    /// entry when one exists, else on the FREE entry.
    pub entry_id: EntryId,

    /// The charged user.
    pub user_id: UserId,

    /// The billed service.
    pub service_name: String,

    /// Total units requested.
    pub count: i64,

    /// Full price of the request in cents (`unit_price * count`).
    pub cost_cents: i64,

    /// Units drawn from free quota.
    pub free_count: i64,

    /// Units drawn from balance.
    pub paid_count: i64,

    /// Cents actually deducted from the balance.
    pub balance_deducted_cents: i64,

    /// When the deduction happened.
    pub deduct_time: DateTime<Utc>,

    /// Which month's quota row this belongs to.
    pub month: BillingMonth,
}
