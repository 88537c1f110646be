//! Account and ledger-record handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use tally_core::{FreeQuota, LedgerEntry, UserId};

use crate::error::ApiError;
use crate::state::AppState;

/// One quota row in an account response.
#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    /// Service name.
    pub service_name: String,
    /// Units granted for the month.
    pub total_quota: i64,
    /// Units consumed.
    pub used_quota: i64,
    /// Units still available.
    pub remaining: i64,
    /// The month this row applies to.
    pub reset_month: String,
}

impl From<&FreeQuota> for QuotaResponse {
    fn from(quota: &FreeQuota) -> Self {
        Self {
            service_name: quota.service_name.clone(),
            total_quota: quota.total_quota,
            used_quota: quota.used_quota,
            remaining: quota.remaining(),
            reset_month: quota.reset_month.to_string(),
        }
    }
}

/// Account response.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// The queried user.
    pub user_id: String,
    /// Balance in cents.
    pub balance_cents: i64,
    /// Balance formatted with two decimals.
    pub balance_formatted: String,
    /// Current month's quotas for configured services.
    pub quotas: Vec<QuotaResponse>,
}

/// Get a user's balance and current quotas.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<AccountResponse>, ApiError> {
    let user_id = parse_user(&user_id)?;
    let view = state.engine.get_account(&user_id)?;

    Ok(Json(AccountResponse {
        user_id: user_id.to_string(),
        balance_cents: view.balance.balance_cents,
        balance_formatted: format_cents(view.balance.balance_cents),
        quotas: view.quotas.iter().map(QuotaResponse::from).collect(),
    }))
}

/// Ledger record list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListRecordsQuery {
    /// 1-based page (default: 1).
    #[serde(default = "default_page")]
    pub page: u64,
    /// Page size (default: 20, max: 100).
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    20
}

/// One ledger record in a list response.
#[derive(Debug, Serialize)]
pub struct RecordResponse {
    /// Record id.
    pub record_id: String,
    /// Service name.
    pub service_name: String,
    /// "free" or "balance".
    pub kind: &'static str,
    /// Cents deducted (zero for free records).
    pub amount_cents: i64,
    /// Units consumed.
    pub count: i64,
    /// Timestamp, RFC 3339.
    pub created_at: String,
}

impl From<&LedgerEntry> for RecordResponse {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            record_id: entry.entry_id.to_string(),
            service_name: entry.service_name.clone(),
            kind: entry.kind.as_str(),
            amount_cents: entry.amount_cents,
            count: entry.count,
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

/// Ledger record list response.
#[derive(Debug, Serialize)]
pub struct ListRecordsResponse {
    /// Records, newest first.
    pub records: Vec<RecordResponse>,
    /// Total records for the user.
    pub total: u64,
}

/// List a user's deduction records.
pub async fn list_records(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<ListRecordsQuery>,
) -> Result<Json<ListRecordsResponse>, ApiError> {
    let user_id = parse_user(&user_id)?;
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 100);

    let (entries, total) = state
        .store
        .list_ledger(&user_id, page, page_size)
        .map_err(tally_engine::EngineError::from)?;

    Ok(Json(ListRecordsResponse {
        records: entries.iter().map(RecordResponse::from).collect(),
        total,
    }))
}

pub(crate) fn parse_user(raw: &str) -> Result<UserId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::Engine(tally_engine::EngineError::InvalidUserId))
}

pub(crate) fn format_cents(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, (cents % 100).abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_format() {
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(90), "0.90");
        assert_eq!(format_cents(5_000), "50.00");
    }
}
