//! The cache seam: hot counters, the atomic deduct script and the
//! distributed deduct mutex.
//!
//! Key families owned by the engine:
//!
//! - `quota:<user>:<svc>:<month>`: remaining free units, TTL 5 minutes
//! - `balance:<user>`: balance in cents, TTL 5 minutes
//! - `deduct:lock:<user>:<svc>:<month>`: the slow-path mutex, expiry 5 s
//!
//! [`MemoryCache`] implements the identical decision table under one process
//! mutex; it backs tests and deployments without Redis.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use ulid::Ulid;

use tally_core::{BillingMonth, UserId};

/// Prefix for remaining-quota counters.
pub const QUOTA_KEY_PREFIX: &str = "quota:";
/// Prefix for balance counters.
pub const BALANCE_KEY_PREFIX: &str = "balance:";
/// Prefix for the slow-path deduct mutex.
pub const DEDUCT_LOCK_PREFIX: &str = "deduct:lock:";

/// TTL for quota/balance counters.
pub const VALUE_TTL: Duration = Duration::from_secs(5 * 60);
/// Expiry of the deduct mutex, so a crashed holder cannot freeze a tuple.
pub const LOCK_TTL: Duration = Duration::from_secs(5);

/// Remaining-quota counter key.
#[must_use]
pub fn quota_key(user_id: &UserId, service_name: &str, month: &BillingMonth) -> String {
    format!("{QUOTA_KEY_PREFIX}{user_id}:{service_name}:{month}")
}

/// Balance counter key.
#[must_use]
pub fn balance_key(user_id: &UserId) -> String {
    format!("{BALANCE_KEY_PREFIX}{user_id}")
}

/// Deduct mutex key.
#[must_use]
pub fn deduct_lock_key(user_id: &UserId, service_name: &str, month: &BillingMonth) -> String {
    format!("{DEDUCT_LOCK_PREFIX}{user_id}:{service_name}:{month}")
}

/// Result of one atomic deduct-script execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// The script committed the split.
    Deducted {
        /// Units drawn from the quota counter.
        free_count: i64,
        /// Units drawn from the balance counter.
        paid_count: i64,
        /// Cents removed from the balance counter.
        balance_deducted_cents: i64,
    },
    /// Quota and balance together cannot cover the request; nothing changed.
    Insufficient,
    /// The quota counter is not cached; warm and retry.
    QuotaMiss,
    /// The balance counter is not cached; warm and retry.
    BalanceMiss,
}

/// Error from the cache backend.
#[derive(Debug, thiserror::Error)]
#[error("cache backend error: {0}")]
pub struct CacheError(pub String);

/// Fast key-value store with the atomic deduct script and a distributed
/// mutex.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Run the deduct script atomically against the two counters.
    ///
    /// `count` must be at least 1 (the engine validates before calling);
    /// `cost_cents` is always `unit_price * count`.
    ///
    /// Decision table (one indivisible step):
    /// 1. quota counter absent → [`ScriptOutcome::QuotaMiss`]
    /// 2. quota ≥ count → decrement quota, pure free
    /// 3. balance counter absent → [`ScriptOutcome::BalanceMiss`]
    /// 4. balance covers `(count - quota) * unit` → quota to zero, decrement
    ///    balance, mixed
    /// 5. otherwise → [`ScriptOutcome::Insufficient`]
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the backend call fails.
    async fn deduct(
        &self,
        quota_key: &str,
        balance_key: &str,
        count: i64,
        cost_cents: i64,
    ) -> Result<ScriptOutcome, CacheError>;

    /// Seed or refresh a counter with a TTL.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the backend call fails.
    async fn set_counter(&self, key: &str, value: i64, ttl: Duration) -> Result<(), CacheError>;

    /// Read a counter.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the backend call fails.
    async fn get_counter(&self, key: &str) -> Result<Option<i64>, CacheError>;

    /// Drop a key.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the backend call fails.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Try to acquire the distributed mutex; returns a release token on
    /// success, `None` when another holder owns it.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the backend call fails.
    async fn acquire_lock(&self, key: &str, ttl: Duration)
        -> Result<Option<String>, CacheError>;

    /// Release a held mutex. Releasing with a stale token is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the backend call fails.
    async fn release_lock(&self, key: &str, token: &str) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct MemoryValue {
    value: i64,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, MemoryValue>,
    locks: HashMap<String, (String, Instant)>,
}

impl MemoryState {
    fn live_value(&mut self, key: &str) -> Option<i64> {
        let Some(entry) = self.values.get(key) else {
            return None;
        };
        let expired = entry.expires_at.map_or(false, |at| at <= Instant::now());
        let value = entry.value;
        if expired {
            self.values.remove(key);
            return None;
        }
        Some(value)
    }
}

/// In-process cache with the same observable behavior as the Redis script.
#[derive(Debug, Default)]
pub struct MemoryCache {
    state: Mutex<MemoryState>,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn deduct(
        &self,
        quota_key: &str,
        balance_key: &str,
        count: i64,
        cost_cents: i64,
    ) -> Result<ScriptOutcome, CacheError> {
        let mut state = self.state.lock();

        let Some(quota) = state.live_value(quota_key) else {
            return Ok(ScriptOutcome::QuotaMiss);
        };

        if quota >= count {
            if let Some(entry) = state.values.get_mut(quota_key) {
                entry.value -= count;
            }
            return Ok(ScriptOutcome::Deducted {
                free_count: count,
                paid_count: 0,
                balance_deducted_cents: 0,
            });
        }

        let Some(balance) = state.live_value(balance_key) else {
            return Ok(ScriptOutcome::BalanceMiss);
        };

        let free = quota.max(0);
        let paid = count - free;
        let unit = cost_cents / count;
        let needed = paid * unit;

        if balance >= needed {
            if let Some(entry) = state.values.get_mut(quota_key) {
                entry.value = 0;
            }
            if let Some(entry) = state.values.get_mut(balance_key) {
                entry.value -= needed;
            }
            return Ok(ScriptOutcome::Deducted {
                free_count: free,
                paid_count: paid,
                balance_deducted_cents: needed,
            });
        }

        Ok(ScriptOutcome::Insufficient)
    }

    async fn set_counter(&self, key: &str, value: i64, ttl: Duration) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        state.values.insert(
            key.to_owned(),
            MemoryValue {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>, CacheError> {
        Ok(self.state.lock().live_value(key))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.state.lock().values.remove(key);
        Ok(())
    }

    async fn acquire_lock(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<String>, CacheError> {
        let mut state = self.state.lock();
        let now = Instant::now();
        if let Some((_, expires)) = state.locks.get(key) {
            if *expires > now {
                return Ok(None);
            }
        }
        let token = Ulid::new().to_string();
        state.locks.insert(key.to_owned(), (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        if state.locks.get(key).is_some_and(|(held, _)| held == token) {
            state.locks.remove(key);
        }
        Ok(())
    }
}
