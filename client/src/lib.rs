//! HTTP client for the tally billing and quota service.
//!
//! Gateways call [`TallyClient::check_quota`] before serving a billable
//! request and [`TallyClient::deduct_quota`] on commit; user-facing backends
//! use the account, recharge and statistics calls.
//!
//! # Example
//!
//! ```no_run
//! use tally_client::TallyClient;
//!
//! # async fn example() -> Result<(), tally_client::ClientError> {
//! let client = TallyClient::new("http://tally:8080");
//!
//! let decision = client.check_quota("u1", "asr", 3).await?;
//! if decision.allowed {
//!     let record = client.deduct_quota("u1", "asr", 3).await?;
//!     println!("deducted, record {}", record.record_id);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod types;

pub use client::{ClientOptions, TallyClient};
pub use error::ClientError;
pub use types::{
    AccountResponse, CheckQuotaResponse, DeductQuotaResponse, ListRecordsResponse, QuotaResponse,
    RechargeCallbackResponse, RechargeRequest, RechargeResponse, RecordResponse,
    ServiceStatsResponse, StatsResponse, StatsSummaryResponse,
};
