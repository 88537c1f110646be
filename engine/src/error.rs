//! Engine error types.
//!
//! Every error the engine raises carries a stable numeric code in the
//! `19MMEE` namespace (`19` = billing, `MM` = module, `EE` = sequence), so
//! callers and dashboards can partition failures without string matching.

use tally_store::StoreError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the accounting engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The balance cannot cover the requested deduction. Terminal for the
    /// caller; no side effects were made.
    #[error("insufficient balance: balance={balance_cents}, required={required_cents}")]
    InsufficientBalance {
        /// Current balance in cents.
        balance_cents: i64,
        /// Required amount in cents.
        required_cents: i64,
    },

    /// The service name is not configured for billing.
    #[error("unknown service: {service}")]
    UnknownService {
        /// The unconfigured service name.
        service: String,
    },

    /// The distributed deduct mutex could not be acquired. Retryable.
    #[error("failed to acquire deduct lock")]
    LockAcquisitionFailed,

    /// No recharge order matches the callback.
    #[error("recharge order not found: {order_id}")]
    OrderNotFound {
        /// The missing order id.
        order_id: String,
    },

    /// An order with this id already exists.
    #[error("recharge order already exists: {order_id}")]
    OrderAlreadyExists {
        /// The conflicting order id.
        order_id: String,
    },

    /// The order row could not be updated.
    #[error("recharge order update failed: {0}")]
    OrderUpdateFailed(String),

    /// No payment provider is configured.
    #[error("payment service unavailable")]
    PaymentServiceUnavailable,

    /// The payment provider rejected or failed the create call.
    #[error("payment create failed: {0}")]
    PaymentCreateFailed(String),

    /// Validation: the request carried no currency.
    #[error("currency is required")]
    CurrencyRequired,

    /// Validation: the user id is malformed.
    #[error("invalid user id")]
    InvalidUserId,

    /// Validation: a required field is missing or out of range.
    #[error("invalid request: {0}")]
    MissingRequiredField(&'static str),

    /// Wrapped storage failure.
    #[error("database error: {0}")]
    Database(String),

    /// Wrapped cache failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Wrapped message-bus failure.
    #[error("message bus error: {0}")]
    Bus(String),
}

impl EngineError {
    /// The stable numeric error code.
    #[must_use]
    pub const fn code(&self) -> u32 {
        match self {
            Self::InsufficientBalance { .. } => 190_102,
            Self::UnknownService { .. } => 190_205,
            Self::OrderNotFound { .. } => 190_301,
            Self::OrderUpdateFailed(_) => 190_303,
            Self::OrderAlreadyExists { .. } => 190_305,
            Self::LockAcquisitionFailed => 190_402,
            Self::PaymentServiceUnavailable => 190_501,
            Self::PaymentCreateFailed(_) => 190_502,
            Self::CurrencyRequired => 190_503,
            Self::Database(_) => 190_701,
            Self::Cache(_) => 190_702,
            Self::Bus(_) => 190_703,
            Self::InvalidUserId => 190_709,
            Self::MissingRequiredField(_) => 190_710,
        }
    }

    /// Whether the caller may retry the exact same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockAcquisitionFailed | Self::Database(_) | Self::Cache(_) | Self::Bus(_)
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientBalance {
                balance_cents,
                required_cents,
            } => Self::InsufficientBalance {
                balance_cents,
                required_cents,
            },
            StoreError::NotFound { entity: "recharge_order", id } => {
                Self::OrderNotFound { order_id: id }
            }
            StoreError::Duplicate { entity: "recharge_order", id } => {
                Self::OrderAlreadyExists { order_id: id }
            }
            other => Self::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = EngineError::InsufficientBalance {
            balance_cents: 5,
            required_cents: 20,
        };
        assert_eq!(err.code(), 190_102);
        assert_eq!(
            EngineError::UnknownService {
                service: "ocr".into()
            }
            .code(),
            190_205
        );
        assert_eq!(EngineError::LockAcquisitionFailed.code(), 190_402);
        assert_eq!(EngineError::CurrencyRequired.code(), 190_503);
    }

    #[test]
    fn store_errors_map_to_engine_codes() {
        let err: EngineError = StoreError::InsufficientBalance {
            balance_cents: 0,
            required_cents: 10,
        }
        .into();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));

        let err: EngineError = StoreError::NotFound {
            entity: "recharge_order",
            id: "recharge_u1_1".into(),
        }
        .into();
        assert!(matches!(err, EngineError::OrderNotFound { .. }));
    }

    #[test]
    fn retryability() {
        assert!(EngineError::LockAcquisitionFailed.is_retryable());
        assert!(!EngineError::CurrencyRequired.is_retryable());
        assert!(!EngineError::InsufficientBalance {
            balance_cents: 0,
            required_cents: 1
        }
        .is_retryable());
    }
}
