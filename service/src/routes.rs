//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, health, internal, recharge, stats};
use crate::state::AppState;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## External (caller-facing)
/// - `GET  /v1/account/:user_id` - Balance and current quotas
/// - `POST /v1/recharge` - Create a recharge order
/// - `GET  /v1/records/:user_id` - Deduction history
/// - `GET  /v1/stats/today/:user_id` - Today's usage
/// - `GET  /v1/stats/month/:user_id` - This month's usage
/// - `GET  /v1/stats/summary/:user_id` - Per-service summary
///
/// ## Internal (infra-facing)
/// - `POST /internal/v1/quota/check` - May user spend N units?
/// - `POST /internal/v1/quota/deduct` - Commit a deduction
/// - `POST /internal/v1/recharge/callback` - Payment settlement callback
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let state = Arc::new(state);

    Router::new()
        // Health (public)
        .route("/health", get(health::health))
        // External surface
        .route("/v1/account/:user_id", get(accounts::get_account))
        .route("/v1/recharge", post(recharge::recharge))
        .route("/v1/records/:user_id", get(accounts::list_records))
        .route("/v1/stats/today/:user_id", get(stats::stats_today))
        .route("/v1/stats/month/:user_id", get(stats::stats_month))
        .route("/v1/stats/summary/:user_id", get(stats::stats_summary))
        // Internal surface
        .route("/internal/v1/quota/check", post(internal::check_quota))
        .route("/internal/v1/quota/deduct", post(internal::deduct_quota))
        .route(
            "/internal/v1/recharge/callback",
            post(internal::recharge_callback),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
