//! Read-only statistics over the ledger.
//!
//! Windows follow the caller's local day and month, matching how invoices
//! are cut; `total_cost` sums only BALANCE entries (free usage costs
//! nothing).

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Local, TimeZone, Utc};

use tally_core::UserId;
use tally_store::{LedgerStats, Store, TimeRange};

use crate::error::Result;

/// Statistics period labels.
pub const PERIOD_TODAY: &str = "today";
/// See [`PERIOD_TODAY`].
pub const PERIOD_MONTH: &str = "month";

/// Usage aggregates for one user over one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    /// The queried user.
    pub user_id: UserId,
    /// The service filter, empty for all services.
    pub service_name: String,
    /// Total units across all entries.
    pub total_count: i64,
    /// Cents across BALANCE entries only.
    pub total_cost_cents: i64,
    /// Units drawn from free quota.
    pub free_count: i64,
    /// Units drawn from balance.
    pub paid_count: i64,
    /// `"today"` or `"month"`.
    pub period: &'static str,
}

/// Per-service aggregates inside a summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStats {
    /// The service name.
    pub service_name: String,
    /// Total units.
    pub total_count: i64,
    /// Cents across BALANCE entries only.
    pub total_cost_cents: i64,
    /// Units drawn from free quota.
    pub free_count: i64,
    /// Units drawn from balance.
    pub paid_count: i64,
}

/// Current-month aggregates per service plus the grand total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSummary {
    /// The queried user.
    pub user_id: UserId,
    /// Total units across all services.
    pub total_count: i64,
    /// Cents across BALANCE entries only.
    pub total_cost_cents: i64,
    /// Breakdown by service, sorted by service name.
    pub services: Vec<ServiceStats>,
}

/// Read-only statistics over the ledger.
pub struct Aggregator {
    store: Arc<dyn Store>,
}

impl Aggregator {
    /// Wire the aggregator.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Aggregates for the local calendar day containing `now`.
    ///
    /// # Errors
    ///
    /// Returns a wrapped database error on storage failure.
    pub fn today(&self, user_id: &UserId, service_name: Option<&str>) -> Result<Stats> {
        let range = today_range(Local::now());
        let stats = self.store.ledger_stats(user_id, service_name, &range)?;
        Ok(to_stats(user_id, service_name, &stats, PERIOD_TODAY))
    }

    /// Aggregates for the local calendar month containing `now`.
    ///
    /// # Errors
    ///
    /// Returns a wrapped database error on storage failure.
    pub fn month(&self, user_id: &UserId, service_name: Option<&str>) -> Result<Stats> {
        let range = month_range(Local::now());
        let stats = self.store.ledger_stats(user_id, service_name, &range)?;
        Ok(to_stats(user_id, service_name, &stats, PERIOD_MONTH))
    }

    /// Current-month aggregates per service.
    ///
    /// # Errors
    ///
    /// Returns a wrapped database error on storage failure.
    pub fn summary(&self, user_id: &UserId) -> Result<StatsSummary> {
        let range = month_range(Local::now());
        let grouped = self.store.ledger_stats_by_service(user_id, &range)?;

        let mut summary = StatsSummary {
            user_id: user_id.clone(),
            total_count: 0,
            total_cost_cents: 0,
            services: Vec::with_capacity(grouped.len()),
        };
        for (service_name, stats) in grouped {
            summary.total_count += stats.total_count;
            summary.total_cost_cents += stats.total_cost_cents;
            summary.services.push(ServiceStats {
                service_name,
                total_count: stats.total_count,
                total_cost_cents: stats.total_cost_cents,
                free_count: stats.free_count,
                paid_count: stats.paid_count,
            });
        }
        Ok(summary)
    }
}

fn to_stats(
    user_id: &UserId,
    service_name: Option<&str>,
    stats: &LedgerStats,
    period: &'static str,
) -> Stats {
    Stats {
        user_id: user_id.clone(),
        service_name: service_name.unwrap_or_default().to_owned(),
        total_count: stats.total_count,
        total_cost_cents: stats.total_cost_cents,
        free_count: stats.free_count,
        paid_count: stats.paid_count,
        period,
    }
}

/// `[local midnight, +24h)` as UTC instants.
fn today_range(now: DateTime<Local>) -> TimeRange {
    let start = Local
        .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .single()
        .unwrap_or(now)
        .with_timezone(&Utc);
    TimeRange {
        start,
        end: start + Duration::hours(24),
    }
}

/// `[local 1st 00:00, next month 1st 00:00)` as UTC instants.
fn month_range(now: DateTime<Local>) -> TimeRange {
    let start_local = Local
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    let (next_year, next_month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let end_local = Local
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    TimeRange {
        start: start_local.with_timezone(&Utc),
        end: end_local.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{FreeQuota, RechargeOrder};
    use tally_store::{DeductRequest, RocksStore};
    use tempfile::TempDir;

    fn setup() -> (Aggregator, Arc<RocksStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        (Aggregator::new(store.clone()), store, dir)
    }

    fn seed_usage(store: &RocksStore, u: &UserId) {
        let month = tally_core::BillingMonth::current();
        store
            .create_quota(&FreeQuota::fresh(u.clone(), "tts", 10, month.clone()))
            .unwrap();
        store
            .create_quota(&FreeQuota::fresh(u.clone(), "asr", 100, month.clone()))
            .unwrap();
        let order_id = format!("recharge_{u}_1700000000");
        store
            .create_order(&RechargeOrder::pending(order_id.clone(), u.clone(), 100))
            .unwrap();
        store.settle_recharge(&order_id, "pay_seed", 100).unwrap();

        // Mixed tts deduct: 10 free + 5 paid (10 cents), plus 30 free asr.
        store
            .deduct(&DeductRequest {
                user_id: u.clone(),
                service_name: "tts".into(),
                count: 15,
                cost_cents: 30,
                month: month.clone(),
            })
            .unwrap();
        store
            .deduct(&DeductRequest {
                user_id: u.clone(),
                service_name: "asr".into(),
                count: 30,
                cost_cents: 0,
                month,
            })
            .unwrap();
    }

    #[test]
    fn today_and_month_cover_fresh_entries() {
        let (aggregator, store, _dir) = setup();
        let u = UserId::new("u1").unwrap();
        seed_usage(&store, &u);

        let today = aggregator.today(&u, None).unwrap();
        assert_eq!(today.total_count, 45);
        assert_eq!(today.free_count, 40);
        assert_eq!(today.paid_count, 5);
        assert_eq!(today.total_cost_cents, 10);
        assert_eq!(today.period, PERIOD_TODAY);

        let month = aggregator.month(&u, Some("tts")).unwrap();
        assert_eq!(month.total_count, 15);
        assert_eq!(month.total_cost_cents, 10);
        assert_eq!(month.service_name, "tts");
        assert_eq!(month.period, PERIOD_MONTH);
    }

    #[test]
    fn summary_groups_by_service() {
        let (aggregator, store, _dir) = setup();
        let u = UserId::new("u1").unwrap();
        seed_usage(&store, &u);

        let summary = aggregator.summary(&u).unwrap();
        assert_eq!(summary.total_count, 45);
        assert_eq!(summary.total_cost_cents, 10);
        assert_eq!(summary.services.len(), 2);
        assert_eq!(summary.services[0].service_name, "asr");
        assert_eq!(summary.services[0].free_count, 30);
        assert_eq!(summary.services[1].service_name, "tts");
        assert_eq!(summary.services[1].paid_count, 5);
    }

    #[test]
    fn empty_ledger_yields_zeroes() {
        let (aggregator, _store, _dir) = setup();
        let u = UserId::new("nobody").unwrap();
        let stats = aggregator.today(&u, None).unwrap();
        assert_eq!(stats.total_count, 0);
        assert_eq!(stats.total_cost_cents, 0);
        let summary = aggregator.summary(&u).unwrap();
        assert!(summary.services.is_empty());
    }

    #[test]
    fn window_boundaries_are_half_open() {
        let noon = Local.with_ymd_and_hms(2025, 3, 15, 12, 30, 0).unwrap();
        let day = today_range(noon);
        assert!(day.contains(day.start));
        assert!(!day.contains(day.end));
        assert_eq!(day.end - day.start, Duration::hours(24));

        let month = month_range(noon);
        assert!(month.contains(day.start));
        let dec = Local.with_ymd_and_hms(2025, 12, 2, 0, 0, 0).unwrap();
        let dec_range = month_range(dec);
        assert!(dec_range.end > dec_range.start);
    }
}
