//! The tally accounting engine.
//!
//! Everything between the RPC surface and the store lives here:
//!
//! - [`quota::QuotaEngine`]: the hot check/deduct path, with a cache-script
//!   fast path and a store-transaction slow path that produce the same
//!   observable accounting outcome.
//! - [`consumer::DeductConsumer`]: batch settlement of fast-path events
//!   against the store.
//! - [`recharge::RechargeCoordinator`]: order creation, payment-provider
//!   hand-off and idempotent callback settlement.
//! - [`stats::Aggregator`]: read-only statistics over the ledger.
//! - [`reset::ResetJob`]: monthly materialization of next-month quota rows.
//! - [`cache`], [`bus`], [`payment`]: the seams to Redis, the message bus
//!   and the payment provider, each with an in-memory implementation for
//!   tests and degraded deployments.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bus;
pub mod cache;
pub mod consumer;
pub mod error;
pub mod metrics;
pub mod payment;
pub mod quota;
pub mod recharge;
pub mod redis;
pub mod reset;
pub mod stats;

pub use bus::{BusError, Delivery, MemoryBus, MessageBus};
pub use cache::{Cache, CacheError, MemoryCache, ScriptOutcome};
pub use consumer::DeductConsumer;
pub use error::{EngineError, Result};
pub use payment::{CreatePaymentReply, CreatePaymentRequest, PaymentClient, PaymentMethod};
pub use quota::{AccountView, CheckDecision, QuotaEngine};
pub use recharge::RechargeCoordinator;
pub use self::redis::{RedisCache, RedisStreamsBus};
pub use reset::{ResetJob, ResetReport};
pub use stats::{Aggregator, ServiceStats, Stats, StatsSummary};
