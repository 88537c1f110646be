//! Metrics instrumentation for the billing engine.
//!
//! Counters, histograms and gauges behind the `metrics` facade; the service
//! binary installs a Prometheus exporter. Every observable is partitioned by
//! outcome so dashboards can separate allowed/denied, free/balance/mixed and
//! success/failed without log scraping.

use metrics::{counter, gauge, histogram};

// ============================================================================
// Metric Names
// ============================================================================

/// Quota checks by service and result (allowed/denied/error).
pub const QUOTA_CHECK_TOTAL: &str = "billing_quota_check_total";
/// Quota check duration in seconds, by service.
pub const QUOTA_CHECK_DURATION_SECONDS: &str = "billing_quota_check_duration_seconds";
/// Deductions by service and type (free/balance/mixed).
pub const DEDUCT_TOTAL: &str = "billing_deduct_quota_total";
/// Deduction duration in seconds, by service and path (fast/slow).
pub const DEDUCT_DURATION_SECONDS: &str = "billing_deduct_quota_duration_seconds";
/// Cents deducted, by service.
pub const DEDUCT_AMOUNT_CENTS_TOTAL: &str = "billing_deduct_amount_cents_total";
/// Users currently below the low-balance threshold.
pub const BALANCE_LOW_ALERT: &str = "billing_balance_low_alert";
/// Users currently below the low-quota threshold, by service.
pub const QUOTA_LOW_ALERT: &str = "billing_quota_low_alert";
/// Recharge operations by status.
pub const RECHARGE_TOTAL: &str = "billing_recharge_total";
/// Cents recharged by status.
pub const RECHARGE_AMOUNT_CENTS_TOTAL: &str = "billing_recharge_amount_cents_total";
/// Recharge duration in seconds, by stage.
pub const RECHARGE_DURATION_SECONDS: &str = "billing_recharge_duration_seconds";
/// Recharge orders by status.
pub const RECHARGE_ORDER_TOTAL: &str = "billing_recharge_order_total";
/// Deduct-mutex acquisitions by result.
pub const LOCK_ACQUIRE_TOTAL: &str = "billing_lock_acquire_total";
/// Deduct-mutex acquisition duration in seconds.
pub const LOCK_ACQUIRE_DURATION_SECONDS: &str = "billing_lock_acquire_duration_seconds";
/// Events settled by the bus consumer.
pub const CONSUMER_EVENTS_TOTAL: &str = "billing_consumer_events_total";
/// Consumer batches sent back for redelivery.
pub const CONSUMER_RETRY_TOTAL: &str = "billing_consumer_retry_total";

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a quota check (result: "allowed", "denied", "error").
#[inline]
pub fn record_check(service: &str, result: &'static str) {
    counter!(QUOTA_CHECK_TOTAL, "service" => service.to_owned(), "result" => result).increment(1);
}

/// Record quota check duration.
#[inline]
pub fn record_check_duration(service: &str, seconds: f64) {
    histogram!(QUOTA_CHECK_DURATION_SECONDS, "service" => service.to_owned()).record(seconds);
}

/// Record a deduction (kind: "free", "balance", "mixed").
#[inline]
pub fn record_deduct(service: &str, kind: &'static str) {
    counter!(DEDUCT_TOTAL, "service" => service.to_owned(), "type" => kind).increment(1);
}

/// Record deduction duration (path: "fast", "slow").
#[inline]
pub fn record_deduct_duration(service: &str, path: &'static str, seconds: f64) {
    histogram!(DEDUCT_DURATION_SECONDS, "service" => service.to_owned(), "path" => path)
        .record(seconds);
}

/// Record cents deducted from a balance.
#[inline]
pub fn record_deduct_amount(service: &str, cents: i64) {
    counter!(DEDUCT_AMOUNT_CENTS_TOTAL, "service" => service.to_owned())
        .increment(cents.max(0).unsigned_abs());
}

/// Raise/clear the low-balance flag for the checked user.
#[inline]
pub fn set_balance_low(low: bool) {
    gauge!(BALANCE_LOW_ALERT).set(if low { 1.0 } else { 0.0 });
}

/// Raise/clear the low-quota flag for a service.
#[inline]
pub fn set_quota_low(service: &str, low: bool) {
    gauge!(QUOTA_LOW_ALERT, "service" => service.to_owned()).set(if low { 1.0 } else { 0.0 });
}

/// Record a recharge operation (status: "success", "failed", "pending").
#[inline]
pub fn record_recharge(status: &'static str) {
    counter!(RECHARGE_TOTAL, "status" => status).increment(1);
}

/// Record cents recharged.
#[inline]
pub fn record_recharge_amount(status: &'static str, cents: i64) {
    counter!(RECHARGE_AMOUNT_CENTS_TOTAL, "status" => status)
        .increment(cents.max(0).unsigned_abs());
}

/// Record recharge duration (stage: "create", "settle").
#[inline]
pub fn record_recharge_duration(stage: &'static str, seconds: f64) {
    histogram!(RECHARGE_DURATION_SECONDS, "stage" => stage).record(seconds);
}

/// Record a recharge order transition (status: "pending", "success", "failed").
#[inline]
pub fn record_recharge_order(status: &'static str) {
    counter!(RECHARGE_ORDER_TOTAL, "status" => status).increment(1);
}

/// Record a deduct-mutex acquisition attempt (result: "success", "failed").
#[inline]
pub fn record_lock_acquire(result: &'static str, seconds: f64) {
    counter!(LOCK_ACQUIRE_TOTAL, "result" => result).increment(1);
    histogram!(LOCK_ACQUIRE_DURATION_SECONDS).record(seconds);
}

/// Record settled consumer events.
#[inline]
pub fn record_consumer_events(count: usize) {
    counter!(CONSUMER_EVENTS_TOTAL).increment(count as u64);
}

/// Record a consumer batch pushed back for redelivery.
#[inline]
pub fn record_consumer_retry() {
    counter!(CONSUMER_RETRY_TOTAL).increment(1);
}
