//! Application state.

use std::sync::Arc;

use tally_engine::{
    Aggregator, Cache, MessageBus, PaymentClient, QuotaEngine, RechargeCoordinator, ResetJob,
};
use tally_store::Store;

use crate::config::ServiceConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// The hot check/deduct path.
    pub engine: Arc<QuotaEngine>,

    /// Recharge order lifecycle.
    pub recharge: Arc<RechargeCoordinator>,

    /// Ledger statistics.
    pub stats: Arc<Aggregator>,

    /// Monthly quota reset.
    pub reset: Arc<ResetJob>,

    /// The message bus, when configured (drives the consumer in `main`).
    pub bus: Option<Arc<dyn MessageBus>>,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Wire the engine components around the given backends.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        bus: Option<Arc<dyn MessageBus>>,
        payment: Option<Arc<dyn PaymentClient>>,
        config: ServiceConfig,
    ) -> Self {
        if bus.is_none() {
            tracing::warn!("message bus not configured - deducts take the slow path only");
        }
        if payment.is_none() {
            tracing::warn!("payment provider not configured - recharges will be rejected");
        }

        let engine = Arc::new(QuotaEngine::new(
            store.clone(),
            cache.clone(),
            bus.clone(),
            config.billing.clone(),
        ));
        let recharge = Arc::new(RechargeCoordinator::new(store.clone(), cache, payment));
        let stats = Arc::new(Aggregator::new(store.clone()));
        let reset = Arc::new(ResetJob::new(store.clone(), config.billing.clone()));

        Self {
            store,
            engine,
            recharge,
            stats,
            reset,
            bus,
            config,
        }
    }

    /// Whether the fast path is available.
    #[must_use]
    pub fn has_bus(&self) -> bool {
        self.bus.is_some()
    }
}
