//! Column family layout.
//!
//! Four logical tables plus two secondary indexes.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Balance rows, keyed by `user_id`.
    pub const BALANCES: &str = "balances";

    /// Free-quota rows, keyed by `user_id \0 service_name \0 reset_month`.
    pub const QUOTAS: &str = "quotas";

    /// Ledger entries, keyed by `entry_id` (ULID bytes).
    pub const LEDGER: &str = "ledger";

    /// Index: ledger entries by user, keyed by `user_id \0 entry_id`.
    /// Value is empty (index only); ULIDs keep the range time-ordered.
    pub const LEDGER_BY_USER: &str = "ledger_by_user";

    /// Recharge orders, keyed by `order_id`.
    pub const ORDERS: &str = "orders";

    /// Index: order id by provider `payment_id` (unique when present).
    pub const ORDERS_BY_PAYMENT: &str = "orders_by_payment";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::BALANCES,
        cf::QUOTAS,
        cf::LEDGER,
        cf::LEDGER_BY_USER,
        cf::ORDERS,
        cf::ORDERS_BY_PAYMENT,
    ]
}
