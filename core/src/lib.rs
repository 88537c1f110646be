//! Core types for the tally billing and quota accounting service.
//!
//! This crate provides the foundational types shared by the storage, engine
//! and service crates:
//!
//! - **Identifiers**: `UserId`, `EntryId`, order-id minting
//! - **Entities**: `Balance`, `FreeQuota`, `LedgerEntry`, `RechargeOrder`
//! - **Events**: `DeductEvent` (the async settlement message)
//! - **Configuration**: `BillingConfig` (prices, free quotas, alert thresholds)
//! - **Time**: `BillingMonth` (`YYYY-MM` quota periods)
//!
//! # Money
//!
//! All monetary amounts are integer cents (`i64`). Amounts cross the RPC
//! boundary in cents and are stored in cents, so no floating point ever
//! touches an account balance.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod balance;
pub mod config;
pub mod event;
pub mod ids;
pub mod ledger;
pub mod month;
pub mod order;
pub mod quota;

pub use balance::Balance;
pub use config::BillingConfig;
pub use event::{DeductEvent, DEDUCT_TOPIC};
pub use ids::{EntryId, IdError, UserId};
pub use ledger::{LedgerEntry, LedgerKind};
pub use month::BillingMonth;
pub use order::{OrderStatus, RechargeOrder};
pub use quota::FreeQuota;
