//! HTTP surface for the tally billing and quota service.
//!
//! Two route groups share one router: the caller-facing surface
//! (`/v1/account`, `/v1/recharge`, `/v1/records`, `/v1/stats/*`) and the
//! infra-facing surface (`/internal/v1/quota/*`,
//! `/internal/v1/recharge/callback`). The binary in `main.rs` wires Redis,
//! the bus consumer, the payment client and the monthly reset around this
//! crate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod cron;
pub mod error;
pub mod handlers;
pub mod payment;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
