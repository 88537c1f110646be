//! The message-bus seam for async deduction settlement.
//!
//! At-least-once delivery: a polled message stays pending until acked, and
//! unacked messages are redelivered on a later poll. The engine degrades
//! gracefully when no bus is configured (every deduct takes the slow path).

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use ulid::Ulid;

use tally_core::DeductEvent;

/// Error from the bus backend.
#[derive(Debug, thiserror::Error)]
#[error("message bus error: {0}")]
pub struct BusError(pub String);

/// One polled message with its delivery id.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Backend delivery id, passed back to [`MessageBus::ack`].
    pub id: String,
    /// The decoded event.
    pub event: DeductEvent,
}

/// At-least-once publish plus batched consumption.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish one event to the deduct topic.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the backend call fails; the caller falls back
    /// to the slow path.
    async fn publish(&self, event: &DeductEvent) -> Result<(), BusError>;

    /// Fetch up to `max` deliveries, redelivering unacked ones first.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the backend call fails.
    async fn poll(&self, max: usize) -> Result<Vec<Delivery>, BusError>;

    /// Acknowledge processed deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the backend call fails.
    async fn ack(&self, ids: &[String]) -> Result<(), BusError>;
}

#[derive(Debug, Default)]
struct MemoryBusState {
    queue: VecDeque<Delivery>,
    pending: Vec<Delivery>,
}

/// In-process bus used by tests and single-node deployments.
#[derive(Debug, Default)]
pub struct MemoryBus {
    state: Mutex<MemoryBusState>,
}

impl MemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of published-but-unacked messages (queued or in flight).
    #[must_use]
    pub fn outstanding(&self) -> usize {
        let state = self.state.lock();
        state.queue.len() + state.pending.len()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, event: &DeductEvent) -> Result<(), BusError> {
        let mut state = self.state.lock();
        state.queue.push_back(Delivery {
            id: Ulid::new().to_string(),
            event: event.clone(),
        });
        Ok(())
    }

    async fn poll(&self, max: usize) -> Result<Vec<Delivery>, BusError> {
        let mut state = self.state.lock();
        let mut batch: Vec<Delivery> = state.pending.iter().take(max).cloned().collect();
        while batch.len() < max {
            let Some(delivery) = state.queue.pop_front() else {
                break;
            };
            state.pending.push(delivery.clone());
            batch.push(delivery);
        }
        Ok(batch)
    }

    async fn ack(&self, ids: &[String]) -> Result<(), BusError> {
        let mut state = self.state.lock();
        state.pending.retain(|d| !ids.contains(&d.id));
        Ok(())
    }
}
