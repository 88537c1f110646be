//! Common test utilities for tally integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum_test::TestServer;
use tempfile::TempDir;

use tally_core::BillingConfig;
use tally_engine::{
    CreatePaymentReply, CreatePaymentRequest, DeductConsumer, EngineError, MemoryBus, MemoryCache,
    MessageBus, PaymentClient,
};
use tally_service::{create_router, AppState, ServiceConfig};
use tally_store::{RocksStore, Store};

/// Payment provider stub answering every create with a canned checkout URL.
pub struct StubPayment;

#[async_trait]
impl PaymentClient for StubPayment {
    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<CreatePaymentReply, EngineError> {
        Ok(CreatePaymentReply {
            payment_id: format!("pay_{}", request.order_id),
            status: 1,
            pay_url: "https://pay.example/checkout".into(),
            pay_code: String::new(),
            pay_params: String::new(),
        })
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the service, for direct assertions.
    pub store: Arc<RocksStore>,
    /// The in-process bus, so tests can settle fast-path events.
    pub bus: Arc<MemoryBus>,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
}

impl TestHarness {
    /// Create a new harness with a fresh database, the in-process cache/bus
    /// and a stub payment provider.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let store = Arc::new(RocksStore::open(temp_dir.path()).expect("failed to open store"));
        let bus = Arc::new(MemoryBus::new());

        let mut billing = BillingConfig::default();
        billing.free_quotas.insert("asr".into(), 100);
        billing.free_quotas.insert("tts".into(), 10);
        billing.prices.insert("tts".into(), 2);
        // Priced but carrying no monthly grant: unknown to the engine.
        billing.prices.insert("ocr".into(), 100);

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            billing,
            ..ServiceConfig::default()
        };

        let state = AppState::new(
            store.clone(),
            Arc::new(MemoryCache::new()),
            Some(bus.clone() as Arc<dyn MessageBus>),
            Some(Arc::new(StubPayment)),
            config,
        );
        let router: Router = create_router(state);
        let server = TestServer::new(router).expect("failed to create test server");

        Self {
            server,
            store,
            bus,
            _temp_dir: temp_dir,
        }
    }

    /// Settle all outstanding fast-path events against the store.
    pub async fn settle_bus(&self) {
        let consumer = DeductConsumer::new(
            self.bus.clone() as Arc<dyn MessageBus>,
            self.store.clone() as Arc<dyn Store>,
        );
        while consumer.settle_once().await.expect("settlement failed") > 0 {}
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
