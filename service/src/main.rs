//! tally - billing and quota accounting service.
//!
//! Wires the store, cache, message bus, payment client, bus consumer and
//! monthly reset around the HTTP surface, then serves until SIGINT with a
//! bounded drain.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tally_engine::{
    Cache, DeductConsumer, MemoryCache, MessageBus, PaymentClient, RedisCache, RedisStreamsBus,
};
use tally_service::payment::HttpPaymentClient;
use tally_service::{create_router, cron, AppState, ServiceConfig};
use tally_store::RocksStore;

/// Drain budget for inflight requests and the consumer on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tally=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting tally billing service");

    let config = ServiceConfig::from_env();
    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        redis_configured = config.redis_url.is_some(),
        bus_enabled = config.bus_enabled,
        payment_configured = config.payment_base_url.is_some(),
        reset_job_enabled = config.reset_job_enabled,
        services = config.billing.quota_services().len(),
        "service configuration loaded"
    );

    if let Some(addr) = &config.metrics_listen_addr {
        let addr: std::net::SocketAddr = addr.parse()?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        tracing::info!(listen_addr = %addr, "prometheus exporter started");
    }

    tracing::info!(path = %config.data_dir, "opening RocksDB store");
    let store = Arc::new(RocksStore::open(&config.data_dir)?);

    let cache: Arc<dyn Cache> = match &config.redis_url {
        Some(url) => {
            tracing::info!("redis cache enabled");
            Arc::new(RedisCache::connect(url).await?)
        }
        None => {
            tracing::warn!("redis not configured - using the in-process cache");
            Arc::new(MemoryCache::new())
        }
    };

    let bus: Option<Arc<dyn MessageBus>> = match (&config.redis_url, config.bus_enabled) {
        (Some(url), true) => {
            let bus =
                RedisStreamsBus::connect(url, &config.consumer_group, &config.consumer_name)
                    .await?;
            tracing::info!(group = %config.consumer_group, "message bus enabled");
            Some(Arc::new(bus))
        }
        _ => None,
    };

    let payment: Option<Arc<dyn PaymentClient>> = match &config.payment_base_url {
        Some(url) => {
            tracing::info!(base_url = %url, "payment provider enabled");
            Some(Arc::new(HttpPaymentClient::new(
                url.as_str(),
                Duration::from_secs(config.payment_timeout_seconds),
            )?))
        }
        None => None,
    };

    let state = AppState::new(store.clone(), cache, bus.clone(), payment, config.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer_handle = bus.map(|bus| {
        let consumer = DeductConsumer::new(bus, store.clone());
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { consumer.run(shutdown).await })
    });

    let reset_handle = config.reset_job_enabled.then(|| {
        let job = state.reset.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { cron::run_reset_schedule(job, shutdown).await })
    });

    let app = create_router(state);
    tracing::info!(listen_addr = %config.listen_addr, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Stop accepting work, then drain the cron task and the consumer (which
    // settles one final batch) before the pools drop.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = reset_handle {
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, handle).await;
    }
    if let Some(handle) = consumer_handle {
        if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
            tracing::warn!("consumer did not drain in time, events stay queued");
        }
    }

    tracing::info!("tally stopped");
    Ok(())
}
