//! Simulated bus: every publish is one log line and nothing else.

use super::{BusError, BusRecord, BusSubscription, Delivery, MessageBus, OffsetReset};
use async_trait::async_trait;
use std::time::Duration;

/// Logging no-op bus.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedBus;

#[async_trait]
impl MessageBus for SimulatedBus {
    fn is_connected(&self) -> bool {
        false
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<Delivery, BusError> {
        tracing::info!(
            "[SIMULATED] Would send to {}: {}",
            topic,
            String::from_utf8_lossy(&payload)
        );
        Ok(Delivery::Simulated)
    }

    async fn subscribe(
        &self,
        _group: &str,
        _topics: &[String],
        _offset_reset: OffsetReset,
    ) -> Result<Box<dyn BusSubscription>, BusError> {
        Ok(Box::new(SimulatedSubscription))
    }

    async fn flush(&self) -> Result<(), BusError> {
        Ok(())
    }
}

struct SimulatedSubscription;

#[async_trait]
impl BusSubscription for SimulatedSubscription {
    async fn poll(&mut self, _timeout: Duration, _max: usize) -> Result<Vec<BusRecord>, BusError> {
        Ok(Vec::new())
    }

    async fn close(&mut self) {}
}
