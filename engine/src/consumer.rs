//! Batch settlement of fast-path deduction events.
//!
//! The consumer is the write half of the eventually-consistent pair: the
//! cache script decided each split, the consumer replays it against the store
//! in batches. Updates are additive per `(user, service, month)`, so the bus
//! does not need to preserve order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use tally_core::DeductEvent;
use tally_store::Store;

use crate::bus::MessageBus;
use crate::error::{EngineError, Result};
use crate::metrics;

/// Events settled per poll.
pub const BATCH_SIZE: usize = 100;

/// Idle delay between polls.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Delay after a failed batch before the bus redelivers.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Consumes `DeductEvent`s and applies them to the store.
pub struct DeductConsumer {
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn Store>,
}

impl DeductConsumer {
    /// Wire a consumer.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, store: Arc<dyn Store>) -> Self {
        Self { bus, store }
    }

    /// Poll one batch and settle it in a single store transaction. Returns
    /// the number of events applied.
    ///
    /// On failure the batch stays unacked so the bus redelivers it.
    ///
    /// # Errors
    ///
    /// Returns the wrapped bus or store error for the failed batch.
    pub async fn settle_once(&self) -> Result<usize> {
        let deliveries = self
            .bus
            .poll(BATCH_SIZE)
            .await
            .map_err(|e| EngineError::Bus(e.to_string()))?;
        if deliveries.is_empty() {
            return Ok(0);
        }

        let events: Vec<DeductEvent> = deliveries.iter().map(|d| d.event.clone()).collect();
        match self.store.apply_deduct_events(&events) {
            Ok(()) => {
                let ids: Vec<String> = deliveries.into_iter().map(|d| d.id).collect();
                self.bus
                    .ack(&ids)
                    .await
                    .map_err(|e| EngineError::Bus(e.to_string()))?;
                metrics::record_consumer_events(events.len());
                Ok(events.len())
            }
            Err(err) => {
                metrics::record_consumer_retry();
                tracing::warn!(
                    batch = events.len(),
                    error = %err,
                    "batch settlement failed, leaving for redelivery"
                );
                Err(err.into())
            }
        }
    }

    /// Run until `shutdown` flips to `true`, then drain one final batch and
    /// return.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(batch_size = BATCH_SIZE, "deduct consumer started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                () = tokio::time::sleep(POLL_INTERVAL) => {
                    match self.settle_once().await {
                        Ok(0) => {}
                        Ok(applied) => tracing::debug!(applied, "settled deduct batch"),
                        Err(_) => tokio::time::sleep(RETRY_BACKOFF).await,
                    }
                }
            }
        }

        // Drain what is already in flight before the pools close.
        if let Err(err) = self.settle_once().await {
            tracing::warn!(error = %err, "final drain failed, events stay queued");
        }
        tracing::info!("deduct consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use chrono::Utc;
    use tally_core::{BillingMonth, EntryId, FreeQuota, RechargeOrder, UserId};
    use tally_store::RocksStore;
    use tempfile::TempDir;

    fn month() -> BillingMonth {
        "2025-01".parse().unwrap()
    }

    fn setup() -> (Arc<RocksStore>, Arc<MemoryBus>, DeductConsumer, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let bus = Arc::new(MemoryBus::new());
        let consumer = DeductConsumer::new(
            bus.clone() as Arc<dyn MessageBus>,
            store.clone() as Arc<dyn Store>,
        );
        (store, bus, consumer, dir)
    }

    fn seed_user(store: &RocksStore, u: &UserId, quota: i64, balance: i64) {
        store
            .create_quota(&FreeQuota::fresh(u.clone(), "asr", quota, month()))
            .unwrap();
        let order_id = format!("recharge_{u}_1700000000");
        store
            .create_order(&RechargeOrder::pending(order_id.clone(), u.clone(), balance))
            .unwrap();
        store.settle_recharge(&order_id, "pay_seed", balance).unwrap();
    }

    fn event(u: &UserId, free: i64, paid: i64, deducted: i64) -> DeductEvent {
        DeductEvent {
            entry_id: EntryId::generate(),
            user_id: u.clone(),
            service_name: "asr".into(),
            count: free + paid,
            cost_cents: deducted,
            free_count: free,
            paid_count: paid,
            balance_deducted_cents: deducted,
            deduct_time: Utc::now(),
            month: month(),
        }
    }

    #[tokio::test]
    async fn settles_and_acks_a_batch() {
        let (store, bus, consumer, _dir) = setup();
        let u = UserId::new("u1").unwrap();
        seed_user(&store, &u, 100, 1_000);

        bus.publish(&event(&u, 10, 0, 0)).await.unwrap();
        bus.publish(&event(&u, 0, 3, 30)).await.unwrap();

        let applied = consumer.settle_once().await.unwrap();
        assert_eq!(applied, 2);
        assert_eq!(bus.outstanding(), 0);

        let quota = store.get_quota(&u, "asr", &month()).unwrap().unwrap();
        assert_eq!(quota.used_quota, 10);
        let balance = store.get_balance(&u).unwrap().unwrap();
        assert_eq!(balance.balance_cents, 970);
    }

    #[tokio::test]
    async fn failed_batch_stays_queued_and_replays() {
        let (store, bus, consumer, _dir) = setup();
        let u = UserId::new("u1").unwrap();

        // No quota row yet: the batch must fail and stay queued.
        bus.publish(&event(&u, 10, 0, 0)).await.unwrap();
        assert!(consumer.settle_once().await.is_err());
        assert_eq!(bus.outstanding(), 1);

        // Materialize the row; the redelivered batch now settles.
        seed_user(&store, &u, 100, 0);
        let applied = consumer.settle_once().await.unwrap();
        assert_eq!(applied, 1);
        assert_eq!(bus.outstanding(), 0);

        let quota = store.get_quota(&u, "asr", &month()).unwrap().unwrap();
        assert_eq!(quota.used_quota, 10);
    }

    #[tokio::test]
    async fn empty_poll_is_a_noop() {
        let (_store, _bus, consumer, _dir) = setup();
        assert_eq!(consumer.settle_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_drains_on_shutdown() {
        let (store, bus, consumer, _dir) = setup();
        let u = UserId::new("u1").unwrap();
        seed_user(&store, &u, 100, 0);
        bus.publish(&event(&u, 5, 0, 0)).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { consumer.run(rx).await });
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(bus.outstanding(), 0);
        let quota = store.get_quota(&u, "asr", &month()).unwrap().unwrap();
        assert_eq!(quota.used_quota, 5);
    }
}
