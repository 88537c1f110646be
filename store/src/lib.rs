//! `RocksDB` storage layer for tally.
//!
//! This crate provides persistent storage for the four billing tables
//! (balances, free quotas, the deduction ledger and recharge orders) using
//! `RocksDB` with column families for secondary indexes.
//!
//! The [`Store`] trait carries the compound accounting operations as single
//! methods (`deduct`, `apply_deduct_events`, `settle_recharge`) so that each
//! implementation can make them atomic its own way. `RocksStore` combines a
//! per-row lock table (the pessimistic equivalent of `SELECT … FOR UPDATE`)
//! with an atomic `WriteBatch` as the transaction scope.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};

use tally_core::{
    Balance, BillingMonth, DeductEvent, EntryId, FreeQuota, LedgerEntry, RechargeOrder, UserId,
};

/// A half-open `[start, end)` window over ledger timestamps.
#[derive(Debug, Clone, Copy)]
pub struct TimeRange {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Whether an instant falls inside the window.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Parameters of a slow-path deduction.
#[derive(Debug, Clone)]
pub struct DeductRequest {
    /// The charged user.
    pub user_id: UserId,
    /// The billed service.
    pub service_name: String,
    /// Units requested.
    pub count: i64,
    /// Full price in cents (`unit_price * count`).
    pub cost_cents: i64,
    /// The quota month the request falls in.
    pub month: BillingMonth,
}

/// The committed result of a deduction transaction.
#[derive(Debug, Clone)]
pub struct DeductOutcome {
    /// The record id returned to the caller (BALANCE entry's id when one
    /// exists, else the FREE entry's).
    pub entry_id: EntryId,
    /// Units drawn from free quota.
    pub free_count: i64,
    /// Units drawn from balance.
    pub paid_count: i64,
    /// Cents deducted from the balance.
    pub balance_deducted_cents: i64,
    /// Post-commit quota remaining, when the quota row was touched.
    pub quota_remaining: Option<i64>,
    /// Post-commit balance, when the balance row was touched.
    pub balance_cents: Option<i64>,
}

/// The committed result of a recharge settlement.
#[derive(Debug, Clone)]
pub struct RechargeSettlement {
    /// The credited user.
    pub user_id: UserId,
    /// Post-commit balance in cents.
    pub balance_cents: i64,
    /// True when the order had already been settled and nothing changed.
    pub already_settled: bool,
}

/// Aggregates over a user's ledger window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    /// Total units across all entries.
    pub total_count: i64,
    /// Cents across BALANCE entries only.
    pub total_cost_cents: i64,
    /// Units drawn from free quota.
    pub free_count: i64,
    /// Units drawn from balance.
    pub paid_count: i64,
}

/// The storage trait behind the accounting engine.
///
/// Abstracts the durable layer so tests can substitute implementations.
pub trait Store: Send + Sync {
    // =========================================================================
    // Balance
    // =========================================================================

    /// Get a user's balance row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_balance(&self, user_id: &UserId) -> Result<Option<Balance>>;

    // =========================================================================
    // Free quota
    // =========================================================================

    /// Get a quota row for `(user, service, month)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_quota(
        &self,
        user_id: &UserId,
        service_name: &str,
        month: &BillingMonth,
    ) -> Result<Option<FreeQuota>>;

    /// Insert a quota row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Duplicate` when the `(user, service, month)` key
    /// already exists; callers racing on lazy creation swallow it and re-read.
    fn create_quota(&self, quota: &FreeQuota) -> Result<()>;

    // =========================================================================
    // Compound accounting operations
    // =========================================================================

    /// The slow-path deduction: split `count` across remaining free quota and
    /// balance, mutate both rows and append the ledger entries in one atomic
    /// commit, serialized per user.
    ///
    /// # Errors
    ///
    /// - `StoreError::InsufficientBalance` when the balance portion cannot be
    ///   covered (a missing balance row is created at zero first).
    /// - `StoreError::Database` on storage failure.
    fn deduct(&self, request: &DeductRequest) -> Result<DeductOutcome>;

    /// Apply a batch of fast-path deduction events in one atomic commit:
    /// additive quota/balance updates plus the ledger append.
    ///
    /// The batch is order-insensitive; updates are additive per
    /// `(user, service, month)`.
    ///
    /// # Errors
    ///
    /// Any error leaves the batch unapplied so the bus can redeliver it.
    fn apply_deduct_events(&self, events: &[DeductEvent]) -> Result<()>;

    /// List a user's ledger entries, newest first, with the total count.
    /// `page` is 1-based.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_ledger(
        &self,
        user_id: &UserId,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<LedgerEntry>, u64)>;

    // =========================================================================
    // Recharge orders
    // =========================================================================

    /// Insert a pending recharge order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Duplicate` if the order id already exists.
    fn create_order(&self, order: &RechargeOrder) -> Result<()>;

    /// Get an order by its internal id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_order(&self, order_id: &str) -> Result<Option<RechargeOrder>>;

    /// Get an order by the provider-issued payment id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_order_by_payment(&self, payment_id: &str) -> Result<Option<RechargeOrder>>;

    /// Idempotently settle a recharge: re-check the order status under the
    /// row lock, mark it SUCCESS with the payment id, and credit the balance
    /// (creating the row at `amount_cents` when absent), all in one commit.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` when the order does not exist.
    fn settle_recharge(
        &self,
        order_id: &str,
        payment_id: &str,
        amount_cents: i64,
    ) -> Result<RechargeSettlement>;

    // =========================================================================
    // Statistics & reset support
    // =========================================================================

    /// Aggregate a user's ledger inside a time window, optionally filtered to
    /// one service.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn ledger_stats(
        &self,
        user_id: &UserId,
        service_name: Option<&str>,
        range: &TimeRange,
    ) -> Result<LedgerStats>;

    /// Aggregate a user's ledger inside a time window, grouped by service
    /// (sorted by service name).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn ledger_stats_by_service(
        &self,
        user_id: &UserId,
        range: &TimeRange,
    ) -> Result<Vec<(String, LedgerStats)>>;

    /// Every user id known to the system: the union of distinct ids across
    /// the balance and quota tables.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn distinct_user_ids(&self) -> Result<Vec<UserId>>;
}
