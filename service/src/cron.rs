//! Monthly reset scheduling.
//!
//! The reset fires at 00:00:00 local time on the 1st of every month (the
//! `0 0 0 1 * *` schedule). The task sleeps until the next boundary, runs the
//! job under a 10-minute budget, and repeats until shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, TimeZone};
use tokio::sync::watch;

use tally_engine::ResetJob;

/// Budget for one reset run.
const RESET_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// The next 1st-of-month 00:00:00 strictly after `now`.
#[must_use]
pub fn next_reset_after(now: DateTime<Local>) -> DateTime<Local> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Local
        .with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        // A DST fold exactly at midnight of the 1st: take the earliest
        // representable instant instead.
        .or_else(|| Local.with_ymd_and_hms(year, month, 1, 1, 0, 0).single())
        .unwrap_or(now)
}

/// Run the reset schedule until `shutdown` flips to `true`.
pub async fn run_reset_schedule(job: Arc<ResetJob>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("quota reset scheduled for 00:00:00 on day 1 of each month");
    loop {
        let fire_at = next_reset_after(Local::now());
        let wait = (fire_at - Local::now())
            .to_std()
            .unwrap_or(Duration::from_secs(1));
        tracing::debug!(fire_at = %fire_at, "next quota reset");

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("quota reset schedule stopped");
                    return;
                }
            }
            () = tokio::time::sleep(wait) => {
                run_reset_once(&job).await;
            }
        }
    }
}

/// One reset run under the 10-minute budget.
pub async fn run_reset_once(job: &Arc<ResetJob>) {
    tracing::info!("starting free quota reset");
    let job = Arc::clone(job);
    let run = tokio::task::spawn_blocking(move || job.run());

    match tokio::time::timeout(RESET_TIMEOUT, run).await {
        Ok(Ok(Ok(report))) => {
            tracing::info!(
                month = %report.month,
                created = report.created,
                skipped = report.skipped,
                failed = report.failed,
                users = report.users.len(),
                "free quota reset finished"
            );
            if !report.users.is_empty() && report.users.len() <= 10 {
                tracing::info!(users = ?report.users, "reset users");
            } else if report.users.len() > 10 {
                tracing::info!(users = ?&report.users[..10], "reset users (first 10)");
            }
        }
        Ok(Ok(Err(err))) => tracing::error!(error = %err, "free quota reset failed"),
        Ok(Err(join_err)) => tracing::error!(error = %join_err, "free quota reset panicked"),
        Err(_) => tracing::error!("free quota reset exceeded its 10 minute budget"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn next_boundary_is_first_of_next_month() {
        let now = Local.with_ymd_and_hms(2025, 1, 15, 12, 30, 45).unwrap();
        let next = next_reset_after(now);
        assert_eq!((next.year(), next.month(), next.day()), (2025, 2, 1));
        assert_eq!((next.hour(), next.minute(), next.second()), (0, 0, 0));
    }

    #[test]
    fn december_rolls_into_january() {
        let now = Local.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        let next = next_reset_after(now);
        assert_eq!((next.year(), next.month(), next.day()), (2026, 1, 1));
    }

    #[test]
    fn boundary_instant_schedules_the_following_month() {
        // Exactly at the fire instant the next fire is a month away.
        let now = Local.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let next = next_reset_after(now);
        assert_eq!((next.year(), next.month(), next.day()), (2025, 3, 1));
    }
}
