//! The monthly free-quota reset.
//!
//! The job prepares the **next** month's rows so the live month is never
//! disrupted: every known user gets a fresh allowance for every configured
//! service. Per-row failures are logged and counted but never abort the job;
//! re-running is idempotent (existing rows are skipped).

use std::sync::Arc;

use tally_core::{BillingConfig, BillingMonth, FreeQuota, UserId};
use tally_store::Store;

use crate::error::Result;

/// Outcome of one reset run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    /// The month the rows were prepared for.
    pub month: String,
    /// Rows inserted.
    pub created: u64,
    /// Rows that already existed.
    pub skipped: u64,
    /// Rows that failed to insert.
    pub failed: u64,
    /// Users that received at least one new row.
    pub users: Vec<UserId>,
}

/// Materializes next-month quota rows for every known user.
pub struct ResetJob {
    store: Arc<dyn Store>,
    config: BillingConfig,
}

impl ResetJob {
    /// Wire the job.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: BillingConfig) -> Self {
        Self { store, config }
    }

    /// Run one reset for the month after the current one.
    ///
    /// # Errors
    ///
    /// Only the user enumeration is fatal; per-row insert failures are
    /// tallied in the report.
    pub fn run(&self) -> Result<ResetReport> {
        self.run_for(BillingMonth::current().next())
    }

    /// Run one reset for an explicit target month.
    ///
    /// # Errors
    ///
    /// Only the user enumeration is fatal.
    pub fn run_for(&self, next_month: BillingMonth) -> Result<ResetReport> {
        let users = self.store.distinct_user_ids()?;
        let mut report = ResetReport {
            month: next_month.to_string(),
            ..ResetReport::default()
        };

        if users.is_empty() {
            tracing::info!("no users found, skipping quota reset");
            return Ok(report);
        }

        for user_id in users {
            let mut touched = false;
            for service in self.config.quota_services() {
                let Some(total) = self.config.free_quota(service) else {
                    continue;
                };

                if let Ok(Some(_)) = self.store.get_quota(&user_id, service, &next_month) {
                    report.skipped += 1;
                    continue;
                }

                let quota =
                    FreeQuota::fresh(user_id.clone(), service, total, next_month.clone());
                match self.store.create_quota(&quota) {
                    Ok(()) => {
                        report.created += 1;
                        touched = true;
                    }
                    Err(err) if err.is_duplicate() => report.skipped += 1,
                    Err(err) => {
                        tracing::warn!(
                            user_id = %user_id,
                            service,
                            month = %next_month,
                            error = %err,
                            "quota reset insert failed"
                        );
                        report.failed += 1;
                    }
                }
            }
            if touched {
                report.users.push(user_id);
            }
        }

        tracing::info!(
            month = %next_month,
            created = report.created,
            skipped = report.skipped,
            failed = report.failed,
            users = report.users.len(),
            "quota reset completed"
        );
        Ok(report)
    }
}
