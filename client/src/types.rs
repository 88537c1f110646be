//! Wire types for the tally HTTP surface.

use serde::{Deserialize, Serialize};

/// One quota row in an account response.
#[derive(Debug, Clone, Deserialize)]
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

/// Account response.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    /// The queried user.
    pub user_id: String,
    /// Balance in cents.
    pub balance_cents: i64,
    /// Balance formatted with two decimals.
    pub balance_formatted: String,
    /// Current month's quotas.
    pub quotas: Vec<QuotaResponse>,
}

/// Recharge request body.
#[derive(Debug, Clone, Serialize)]
pub struct RechargeRequest {
    /// The recharging user.
    pub user_id: String,
    /// Amount in cents.
    pub amount_cents: i64,
    /// Payment method wire code; 0 defaults to Alipay.
    pub payment_method: i32,
    /// ISO currency code.
    pub currency: String,
    /// Redirect URL after payment.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub return_url: String,
    /// Callback URL for settlement.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub notify_url: String,
}

/// Recharge response.
#[derive(Debug, Clone, Deserialize)]
pub struct RechargeResponse {
    /// The internal order id.
    pub order_id: String,
    /// Where to send the payer.
    pub payment_url: String,
}

/// One ledger record.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordResponse {
    /// Record id.
    pub record_id: String,
    /// Service name.
    pub service_name: String,
    /// "free" or "balance".
    pub kind: String,
    /// Cents deducted.
    pub amount_cents: i64,
    /// Units consumed.
    pub count: i64,
    /// Timestamp, RFC 3339.
    pub created_at: String,
}

/// Ledger record list response.
#[derive(Debug, Clone, Deserialize)]
pub struct ListRecordsResponse {
    /// Records, newest first.
    pub records: Vec<RecordResponse>,
    /// Total records for the user.
    pub total: u64,
}

/// Stats response for one window.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsResponse {
    /// The queried user.
    pub user_id: String,
    /// The service filter, empty for all.
    pub service_name: String,
    /// Total units.
    pub total_count: i64,
    /// Cents across balance deductions.
    pub total_cost_cents: i64,
    /// Units drawn from free quota.
    pub free_count: i64,
    /// Units drawn from balance.
    pub paid_count: i64,
    /// "today" or "month".
    pub period: String,
}

/// One service's slice of a summary.
#[derive(Debug, Clone, Deserialize)]
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

/// Summary response.
#[derive(Debug, Clone, Deserialize)]
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

/// Quota check response.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckQuotaResponse {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Which pool covers it, or why it was denied.
    pub reason: String,
}

/// Deduct response.
#[derive(Debug, Clone, Deserialize)]
pub struct DeductQuotaResponse {
    /// Whether the deduction committed.
    pub success: bool,
    /// The deduction record id.
    pub record_id: String,
}

/// Recharge callback response.
#[derive(Debug, Clone, Deserialize)]
pub struct RechargeCallbackResponse {
    /// Whether the callback settled a credit.
    pub success: bool,
}

/// Error envelope returned by the service.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

/// Inner error body.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub code: u32,
    pub message: String,
}
