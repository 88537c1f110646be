//! Billing configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default low-balance alert threshold: 10.00 in cents.
pub const DEFAULT_BALANCE_LOW_THRESHOLD_CENTS: i64 = 1_000;

/// Default low-quota alert threshold as a percentage of the monthly grant.
pub const DEFAULT_QUOTA_LOW_PERCENT_THRESHOLD: f64 = 20.0;

/// Per-service pricing and free-quota configuration.
///
/// A service is billable only when it carries a monthly free-quota grant;
/// `prices` supplies the unit charge once that grant is exhausted. A service
/// absent from `free_quotas` is unknown to the engine and every check or
/// deduct against it is denied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Unit price per service, in cents.
    #[serde(default)]
    pub prices: HashMap<String, i64>,

    /// Monthly free units per service.
    #[serde(default)]
    pub free_quotas: HashMap<String, i64>,

    /// Balances below this (cents) raise the low-balance gauge.
    #[serde(default = "default_balance_low")]
    pub balance_low_threshold_cents: i64,

    /// Remaining-quota fractions below this percentage raise the low-quota
    /// gauge.
    #[serde(default = "default_quota_low_percent")]
    pub quota_low_percent_threshold: f64,
}

fn default_balance_low() -> i64 {
    DEFAULT_BALANCE_LOW_THRESHOLD_CENTS
}

fn default_quota_low_percent() -> f64 {
    DEFAULT_QUOTA_LOW_PERCENT_THRESHOLD
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            prices: HashMap::new(),
            free_quotas: HashMap::new(),
            balance_low_threshold_cents: DEFAULT_BALANCE_LOW_THRESHOLD_CENTS,
            quota_low_percent_threshold: DEFAULT_QUOTA_LOW_PERCENT_THRESHOLD,
        }
    }
}

impl BillingConfig {
    /// Unit price for a service, if configured.
    #[must_use]
    pub fn unit_price_cents(&self, service: &str) -> Option<i64> {
        self.prices.get(service).copied()
    }

    /// Monthly free grant for a service, if configured.
    #[must_use]
    pub fn free_quota(&self, service: &str) -> Option<i64> {
        self.free_quotas.get(service).copied()
    }

    /// Whether the service is configured for billing.
    ///
    /// Configuration is carried by the free-quota grant; a price alone does
    /// not make a service billable.
    #[must_use]
    pub fn is_known_service(&self, service: &str) -> bool {
        self.free_quotas.contains_key(service)
    }

    /// Service names with a configured free quota, sorted for stable output.
    #[must_use]
    pub fn quota_services(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.free_quotas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
