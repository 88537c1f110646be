//! Statistics handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use tally_engine::{ServiceStats, Stats};

use crate::error::ApiError;
use crate::handlers::accounts::{format_cents, parse_user};
use crate::state::AppState;

/// Stats query parameters.
#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    /// Optional service filter.
    #[serde(default)]
    pub service_name: Option<String>,
}

/// Stats response for a single window.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// The queried user.
    pub user_id: String,
    /// The service filter, empty for all.
    pub service_name: String,
    /// Total units.
    pub total_count: i64,
    /// Cents across balance deductions.
    pub total_cost_cents: i64,
    /// Cost formatted with two decimals.
    pub total_cost_formatted: String,
    /// Units drawn from free quota.
    pub free_count: i64,
    /// Units drawn from balance.
    pub paid_count: i64,
    /// "today" or "month".
    pub period: &'static str,
}

impl From<Stats> for StatsResponse {
    fn from(stats: Stats) -> Self {
        Self {
            user_id: stats.user_id.to_string(),
            service_name: stats.service_name,
            total_count: stats.total_count,
            total_cost_cents: stats.total_cost_cents,
            total_cost_formatted: format_cents(stats.total_cost_cents),
            free_count: stats.free_count,
            paid_count: stats.paid_count,
            period: stats.period,
        }
    }
}

/// Today's usage for a user.
pub async fn stats_today(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<StatsResponse>, ApiError> {
    let user_id = parse_user(&user_id)?;
    let stats = state
        .stats
        .today(&user_id, query.service_name.as_deref())?;
    Ok(Json(stats.into()))
}

/// This month's usage for a user.
pub async fn stats_month(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<StatsResponse>, ApiError> {
    let user_id = parse_user(&user_id)?;
    let stats = state
        .stats
        .month(&user_id, query.service_name.as_deref())?;
    Ok(Json(stats.into()))
}

/// One service's slice of a summary response.
#[derive(Debug, Serialize)]
pub struct ServiceStatsResponse {
    /// Service name.
    pub service_name: String,
    /// Total units.
    pub total_count: i64,
    /// Cents across balance deductions.
    pub total_cost_cents: i64,
    /// Units drawn from free quota.
    pub free_count: i64,
    /// Units drawn from balance.
    pub paid_count: i64,
}

impl From<ServiceStats> for ServiceStatsResponse {
    fn from(stats: ServiceStats) -> Self {
        Self {
            service_name: stats.service_name,
            total_count: stats.total_count,
            total_cost_cents: stats.total_cost_cents,
            free_count: stats.free_count,
            paid_count: stats.paid_count,
        }
    }
}

/// Summary response: current-month aggregates per service.
#[derive(Debug, Serialize)]
pub struct StatsSummaryResponse {
    /// The queried user.
    pub user_id: String,
    /// Total units across services.
    pub total_count: i64,
    /// Cents across balance deductions.
    pub total_cost_cents: i64,
    /// Breakdown by service.
    pub services: Vec<ServiceStatsResponse>,
}

/// Current-month summary across services.
pub async fn stats_summary(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<StatsSummaryResponse>, ApiError> {
    let user_id = parse_user(&user_id)?;
    let summary = state.stats.summary(&user_id)?;

    Ok(Json(StatsSummaryResponse {
        user_id: summary.user_id.to_string(),
        total_count: summary.total_count,
        total_cost_cents: summary.total_cost_cents,
        services: summary
            .services
            .into_iter()
            .map(ServiceStatsResponse::from)
            .collect(),
    }))
}
