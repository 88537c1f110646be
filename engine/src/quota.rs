//! The hot check/deduct path.
//!
//! Two write paths, one truth: the cache script (fast path, feeding the bus
//! consumer) and the store transaction (slow path) encode the same accounting
//! rule and must produce the same observable outcome. The fast path is taken
//! when a message bus is configured; publish failures, cache failures and
//! repeated cache misses all degrade to the slow path for correctness.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tally_core::{
    Balance, BillingConfig, BillingMonth, DeductEvent, EntryId, FreeQuota, UserId,
};
use tally_store::{DeductOutcome, DeductRequest, Store};

use crate::cache::{self, Cache, ScriptOutcome, LOCK_TTL, VALUE_TTL};
use crate::bus::MessageBus;
use crate::error::{EngineError, Result};
use crate::metrics;

/// Check reason: the request fits in the monthly free quota.
pub const REASON_FREE: &str = "free";
/// Check reason: the request will be charged to the balance.
pub const REASON_BALANCE: &str = "balance";
/// Check reason: neither quota nor balance covers the request.
pub const REASON_INSUFFICIENT: &str = "insufficient balance";
/// Check reason: the service is not configured for billing.
pub const REASON_UNKNOWN_SERVICE: &str = "unknown service";

/// Budget for post-commit cache refreshes; failures never poison the
/// response.
const CACHE_REFRESH_TIMEOUT: Duration = Duration::from_secs(1);

/// The answer to "may this user perform N units of service S?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Which pool covers it, or why it was denied.
    pub reason: &'static str,
}

/// A user's account as returned by `GetAccount`: balance plus the current
/// month's quota rows (virtual defaults for rows not yet materialized).
#[derive(Debug, Clone)]
pub struct AccountView {
    /// The balance row, zero when the user has none yet.
    pub balance: Balance,
    /// One row per configured service for the current month.
    pub quotas: Vec<FreeQuota>,
}

/// The accounting engine's hot path.
pub struct QuotaEngine {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    bus: Option<Arc<dyn MessageBus>>,
    config: BillingConfig,
}

impl QuotaEngine {
    /// Wire the engine. A `None` bus disables the fast path entirely.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        bus: Option<Arc<dyn MessageBus>>,
        config: BillingConfig,
    ) -> Self {
        Self {
            store,
            cache,
            bus,
            config,
        }
    }

    /// The billing configuration this engine runs with.
    #[must_use]
    pub const fn config(&self) -> &BillingConfig {
        &self.config
    }

    /// Account snapshot: balance (zero if absent) plus quota rows for every
    /// configured service, materialized rows where they exist and virtual
    /// defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns a wrapped database error on storage failure.
    pub fn get_account(&self, user_id: &UserId) -> Result<AccountView> {
        let balance = self
            .store
            .get_balance(user_id)?
            .unwrap_or_else(|| Balance::zero(user_id.clone()));

        let month = BillingMonth::current();
        let mut quotas = Vec::new();
        for service in self.config.quota_services() {
            let quota = match self.store.get_quota(user_id, service, &month)? {
                Some(quota) => quota,
                None => FreeQuota::fresh(
                    user_id.clone(),
                    service,
                    self.config.free_quota(service).unwrap_or(0),
                    month.clone(),
                ),
            };
            quotas.push(quota);
        }

        Ok(AccountView { balance, quotas })
    }

    /// Read-or-create the quota row for `(user, service, current month)`.
    ///
    /// Two concurrent callers may race on the insert; the duplicate-key error
    /// is swallowed and the row re-read, so both observe the same row.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnknownService`] when the service has no configured
    ///   free quota.
    /// - A wrapped database error on storage failure.
    pub fn get_or_create_quota(
        &self,
        user_id: &UserId,
        service_name: &str,
        month: &BillingMonth,
    ) -> Result<FreeQuota> {
        if let Some(quota) = self.store.get_quota(user_id, service_name, month)? {
            return Ok(quota);
        }

        let total = self
            .config
            .free_quota(service_name)
            .ok_or_else(|| EngineError::UnknownService {
                service: service_name.to_owned(),
            })?;

        let fresh = FreeQuota::fresh(user_id.clone(), service_name, total, month.clone());
        match self.store.create_quota(&fresh) {
            Ok(()) => {}
            Err(err) if err.is_duplicate() => {}
            Err(err) => return Err(err.into()),
        }

        self.store
            .get_quota(user_id, service_name, month)?
            .ok_or_else(|| EngineError::Database("quota row missing after create".to_owned()))
    }

    /// May `user` perform `count` units of `service`?
    ///
    /// Never mutates balances or quotas; the only write is the lazy quota-row
    /// creation.
    ///
    /// # Errors
    ///
    /// Returns validation errors and wrapped database errors. Business
    /// denials (unknown service, insufficient funds) are expressed in the
    /// decision, not as errors.
    pub fn check(
        &self,
        user_id: &UserId,
        service_name: &str,
        count: i64,
    ) -> Result<CheckDecision> {
        let started = Instant::now();
        validate_request(service_name, count)?;

        let month = BillingMonth::current();
        let decision = self.check_inner(user_id, service_name, count, &month);

        match &decision {
            Ok(d) => {
                metrics::record_check(service_name, if d.allowed { "allowed" } else { "denied" });
            }
            Err(_) => metrics::record_check(service_name, "error"),
        }
        metrics::record_check_duration(service_name, started.elapsed().as_secs_f64());
        decision
    }

    fn check_inner(
        &self,
        user_id: &UserId,
        service_name: &str,
        count: i64,
        month: &BillingMonth,
    ) -> Result<CheckDecision> {
        let quota = match self.get_or_create_quota(user_id, service_name, month) {
            Ok(quota) => quota,
            // Not configured for billing: deny without consulting prices.
            Err(EngineError::UnknownService { .. }) => {
                return Ok(CheckDecision {
                    allowed: false,
                    reason: REASON_UNKNOWN_SERVICE,
                })
            }
            Err(err) => return Err(err),
        };

        let remaining = quota.remaining();
        if quota.total_quota > 0 {
            #[allow(clippy::cast_precision_loss)]
            let remaining_percent = remaining as f64 / quota.total_quota as f64 * 100.0;
            metrics::set_quota_low(
                service_name,
                remaining_percent < self.config.quota_low_percent_threshold,
            );
        }
        if remaining >= count {
            return Ok(CheckDecision {
                allowed: true,
                reason: REASON_FREE,
            });
        }

        let Some(unit_price) = self.config.unit_price_cents(service_name) else {
            // Quota exhausted and no price: nothing to charge against.
            return Ok(CheckDecision {
                allowed: false,
                reason: REASON_INSUFFICIENT,
            });
        };

        let balance_cents = self
            .store
            .get_balance(user_id)?
            .map_or(0, |b| b.balance_cents);
        metrics::set_balance_low(balance_cents < self.config.balance_low_threshold_cents);

        let cost = unit_price.saturating_mul(count);
        if balance_cents >= cost {
            Ok(CheckDecision {
                allowed: true,
                reason: REASON_BALANCE,
            })
        } else {
            Ok(CheckDecision {
                allowed: false,
                reason: REASON_INSUFFICIENT,
            })
        }
    }

    /// Deduct `count` units of `service` from `user`, drawing free quota
    /// first and balance for the remainder. Returns the deduction record id
    /// (the BALANCE ledger entry's id when one exists, else the FREE one's).
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnknownService`] for unconfigured services.
    /// - [`EngineError::InsufficientBalance`] when the request cannot be
    ///   covered; no side effects were made.
    /// - [`EngineError::LockAcquisitionFailed`] when the slow path cannot
    ///   acquire the deduct mutex (retryable).
    pub async fn deduct(
        &self,
        user_id: &UserId,
        service_name: &str,
        count: i64,
    ) -> Result<EntryId> {
        validate_request(service_name, count)?;
        if !self.config.is_known_service(service_name) {
            return Err(EngineError::UnknownService {
                service: service_name.to_owned(),
            });
        }

        let unit_price = self.config.unit_price_cents(service_name).unwrap_or(0);
        let cost_cents = unit_price.saturating_mul(count);
        let month = BillingMonth::current();

        if let Some(bus) = self.bus.clone() {
            match self
                .deduct_fast(&bus, user_id, service_name, count, cost_cents, &month)
                .await?
            {
                Some(entry_id) => return Ok(entry_id),
                None => {
                    // Cache cold or bus unavailable: the store transaction is
                    // the correctness fallback.
                }
            }
        }

        self.deduct_slow(user_id, service_name, count, cost_cents, &month)
            .await
    }

    /// The cache-script path. `Ok(None)` means "degrade to the slow path".
    async fn deduct_fast(
        &self,
        bus: &Arc<dyn MessageBus>,
        user_id: &UserId,
        service_name: &str,
        count: i64,
        cost_cents: i64,
        month: &BillingMonth,
    ) -> Result<Option<EntryId>> {
        let started = Instant::now();
        let quota_key = cache::quota_key(user_id, service_name, month);
        let balance_key = cache::balance_key(user_id);

        for attempt in 0..2 {
            let outcome = match self
                .cache
                .deduct(&quota_key, &balance_key, count, cost_cents)
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::warn!(
                        user_id = %user_id,
                        service = service_name,
                        error = %err,
                        "deduct script failed, degrading to slow path"
                    );
                    return Ok(None);
                }
            };

            match outcome {
                ScriptOutcome::Deducted {
                    free_count,
                    paid_count,
                    balance_deducted_cents,
                } => {
                    let entry_id = EntryId::generate();
                    let event = DeductEvent {
                        entry_id,
                        user_id: user_id.clone(),
                        service_name: service_name.to_owned(),
                        count,
                        cost_cents,
                        free_count,
                        paid_count,
                        balance_deducted_cents,
                        deduct_time: chrono::Utc::now(),
                        month: month.clone(),
                    };

                    if let Err(err) = bus.publish(&event).await {
                        // The slow path re-runs against the store and its
                        // post-commit refresh rewrites both counters from
                        // committed truth.
                        tracing::warn!(
                            user_id = %user_id,
                            service = service_name,
                            error = %err,
                            "publish failed after cache deduct, degrading to slow path"
                        );
                        return Ok(None);
                    }

                    metrics::record_deduct(service_name, deduct_kind(free_count, paid_count));
                    metrics::record_deduct_amount(service_name, balance_deducted_cents);
                    metrics::record_deduct_duration(
                        service_name,
                        "fast",
                        started.elapsed().as_secs_f64(),
                    );
                    return Ok(Some(entry_id));
                }
                ScriptOutcome::Insufficient => {
                    let balance_cents = self
                        .cache
                        .get_counter(&balance_key)
                        .await
                        .ok()
                        .flatten()
                        .unwrap_or(0);
                    return Err(EngineError::InsufficientBalance {
                        balance_cents,
                        required_cents: cost_cents,
                    });
                }
                ScriptOutcome::QuotaMiss | ScriptOutcome::BalanceMiss => {
                    if attempt > 0 {
                        return Ok(None);
                    }
                    // The warm must be synchronous: an async warm races the
                    // retry and the script flaps between miss codes.
                    if let Err(err) = self
                        .warm_cache(user_id, service_name, month, &quota_key, &balance_key)
                        .await
                    {
                        tracing::warn!(
                            user_id = %user_id,
                            service = service_name,
                            error = %err,
                            "cache warm failed, degrading to slow path"
                        );
                        return Ok(None);
                    }
                }
            }
        }

        Ok(None)
    }

    /// Seed both counters from the store, creating the quota row when absent
    /// so the consumer's additive update always has a row to land on.
    async fn warm_cache(
        &self,
        user_id: &UserId,
        service_name: &str,
        month: &BillingMonth,
        quota_key: &str,
        balance_key: &str,
    ) -> Result<()> {
        let remaining = self
            .get_or_create_quota(user_id, service_name, month)?
            .remaining();
        self.cache
            .set_counter(quota_key, remaining, VALUE_TTL)
            .await
            .map_err(|e| EngineError::Cache(e.to_string()))?;

        let balance_cents = self
            .store
            .get_balance(user_id)?
            .map_or(0, |b| b.balance_cents);
        self.cache
            .set_counter(balance_key, balance_cents, VALUE_TTL)
            .await
            .map_err(|e| EngineError::Cache(e.to_string()))?;
        Ok(())
    }

    /// The store-transaction path, serialized by the distributed mutex.
    async fn deduct_slow(
        &self,
        user_id: &UserId,
        service_name: &str,
        count: i64,
        cost_cents: i64,
        month: &BillingMonth,
    ) -> Result<EntryId> {
        let started = Instant::now();
        let lock_key = cache::deduct_lock_key(user_id, service_name, month);

        let lock_started = Instant::now();
        let token = self
            .cache
            .acquire_lock(&lock_key, LOCK_TTL)
            .await
            .map_err(|e| EngineError::Cache(e.to_string()))?;
        let Some(token) = token else {
            metrics::record_lock_acquire("failed", lock_started.elapsed().as_secs_f64());
            return Err(EngineError::LockAcquisitionFailed);
        };
        metrics::record_lock_acquire("success", lock_started.elapsed().as_secs_f64());

        // Ensure the quota row exists before the transaction, mirroring the
        // check path's lazy creation.
        let result = self
            .get_or_create_quota(user_id, service_name, month)
            .and_then(|_| {
                self.store
                    .deduct(&DeductRequest {
                        user_id: user_id.clone(),
                        service_name: service_name.to_owned(),
                        count,
                        cost_cents,
                        month: month.clone(),
                    })
                    .map_err(EngineError::from)
            });

        if let Ok(outcome) = &result {
            self.refresh_after_commit(user_id, service_name, month, outcome)
                .await;
        }

        if let Err(err) = self.cache.release_lock(&lock_key, &token).await {
            tracing::warn!(key = %lock_key, error = %err, "failed to release deduct lock");
        }

        let outcome = result?;
        metrics::record_deduct(
            service_name,
            deduct_kind(outcome.free_count, outcome.paid_count),
        );
        metrics::record_deduct_amount(service_name, outcome.balance_deducted_cents);
        metrics::record_deduct_duration(service_name, "slow", started.elapsed().as_secs_f64());
        Ok(outcome.entry_id)
    }

    /// Post-commit cache refresh on a detached budget; failures are logged,
    /// never fatal.
    async fn refresh_after_commit(
        &self,
        user_id: &UserId,
        service_name: &str,
        month: &BillingMonth,
        outcome: &DeductOutcome,
    ) {
        let refresh = async {
            if let Some(remaining) = outcome.quota_remaining {
                let key = cache::quota_key(user_id, service_name, month);
                self.cache.set_counter(&key, remaining, VALUE_TTL).await?;
            }
            if let Some(balance_cents) = outcome.balance_cents {
                let key = cache::balance_key(user_id);
                self.cache
                    .set_counter(&key, balance_cents, VALUE_TTL)
                    .await?;
            }
            Ok::<(), crate::cache::CacheError>(())
        };

        match tokio::time::timeout(CACHE_REFRESH_TIMEOUT, refresh).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(user_id = %user_id, error = %err, "post-commit cache refresh failed");
            }
            Err(_) => {
                tracing::warn!(user_id = %user_id, "post-commit cache refresh timed out");
            }
        }
    }
}

/// Metric label for a deduction's composition.
const fn deduct_kind(free_count: i64, paid_count: i64) -> &'static str {
    if free_count > 0 && paid_count > 0 {
        "mixed"
    } else if paid_count > 0 {
        "balance"
    } else {
        "free"
    }
}

fn validate_request(service_name: &str, count: i64) -> Result<()> {
    if service_name.is_empty() {
        return Err(EngineError::MissingRequiredField("service_name"));
    }
    if count < 1 {
        return Err(EngineError::MissingRequiredField("count"));
    }
    Ok(())
}
