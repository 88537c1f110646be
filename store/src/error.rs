//! Error types for tally storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Which table the lookup hit.
        entity: &'static str,
        /// The missing key.
        id: String,
    },

    /// Unique-key violation on insert.
    #[error("{entity} already exists: {id}")]
    Duplicate {
        /// Which table the insert hit.
        entity: &'static str,
        /// The conflicting key.
        id: String,
    },

    /// A deduction would take the balance below zero.
    #[error("insufficient balance: balance={balance_cents}, required={required_cents}")]
    InsufficientBalance {
        /// Current balance in cents.
        balance_cents: i64,
        /// Required amount in cents.
        required_cents: i64,
    },
}

impl StoreError {
    /// Whether this is the unique-key violation callers swallow on
    /// create-if-absent races.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}
