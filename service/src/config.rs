//! Service configuration.

use std::path::Path;

use tally_core::BillingConfig;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Address for the Prometheus exporter; `None` disables it.
    pub metrics_listen_addr: Option<String>,

    /// Path to the `RocksDB` data directory (default: "/data/tally").
    pub data_dir: String,

    /// Redis URL for the cache, deduct script and message bus; `None` runs
    /// with the in-process cache and no bus (slow path only).
    pub redis_url: Option<String>,

    /// Whether the message bus (and with it the fast path) is enabled.
    /// Requires Redis.
    pub bus_enabled: bool,

    /// Consumer group for the deduct stream.
    pub consumer_group: String,

    /// Consumer name inside the group (default: hostname-flavored).
    pub consumer_name: String,

    /// Payment provider base URL; `None` disables recharge creation.
    pub payment_base_url: Option<String>,

    /// Outbound payment call timeout in seconds.
    pub payment_timeout_seconds: u64,

    /// Whether this process schedules the monthly quota reset.
    pub reset_job_enabled: bool,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Prices, free quotas and alert thresholds.
    pub billing: BillingConfig,
}

impl ServiceConfig {
    /// Load configuration from environment variables, with the billing maps
    /// read from the JSON file at `BILLING_CONFIG_PATH` when present.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            metrics_listen_addr: std::env::var("METRICS_LISTEN_ADDR").ok(),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/tally".into()),
            redis_url: std::env::var("REDIS_URL").ok(),
            bus_enabled: std::env::var("BUS_ENABLED")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            consumer_group: std::env::var("CONSUMER_GROUP")
                .unwrap_or_else(|_| "tally-billing".into()),
            consumer_name: std::env::var("CONSUMER_NAME").unwrap_or_else(|_| "tally-1".into()),
            payment_base_url: std::env::var("PAYMENT_BASE_URL").ok(),
            payment_timeout_seconds: std::env::var("PAYMENT_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            reset_job_enabled: std::env::var("RESET_JOB_ENABLED")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024), // 1MB
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            billing: load_billing_config(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            metrics_listen_addr: None,
            data_dir: "/data/tally".into(),
            redis_url: None,
            bus_enabled: true,
            consumer_group: "tally-billing".into(),
            consumer_name: "tally-1".into(),
            payment_base_url: None,
            payment_timeout_seconds: 30,
            reset_job_enabled: true,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            billing: BillingConfig::default(),
        }
    }
}

/// Load the billing maps from `BILLING_CONFIG_PATH`, falling back to
/// defaults when unset or unreadable.
fn load_billing_config() -> BillingConfig {
    let Ok(path) = std::env::var("BILLING_CONFIG_PATH") else {
        tracing::warn!("BILLING_CONFIG_PATH not set, no services are configured for billing");
        return BillingConfig::default();
    };

    match load_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path, "billing configuration loaded");
            config
        }
        Err(err) => {
            tracing::error!(path = %path, error = %err, "failed to load billing configuration");
            BillingConfig::default()
        }
    }
}

fn load_config_file(path: &str) -> Result<BillingConfig, std::io::Error> {
    let path = Path::new(path);
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
