//! Message bus abstraction.
//!
//! The producer and consumer only see the [`MessageBus`] trait. Two
//! backends ship:
//! - [`InMemoryBus`] - a process-local broker with per-group offsets
//! - [`SimulatedBus`] - logs what would be published, does no I/O
//!
//! A backend that reports `is_connected() == false` when a producer or
//! consumer is built is replaced with [`SimulatedBus`], so upstream code
//! never has to care whether a bus is really there.

mod memory;
mod simulated;

pub use memory::InMemoryBus;
pub use simulated::SimulatedBus;

use crate::config::{BusBackend, BusConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Build the bus selected by `config.backend`.
///
/// The memory backend is private to this process; it is only useful when
/// the producer and consumer share it.
pub fn from_config(config: &BusConfig) -> Arc<dyn MessageBus> {
    match config.backend {
        BusBackend::Memory => Arc::new(InMemoryBus::new()),
        BusBackend::Simulated => Arc::new(SimulatedBus),
    }
}

/// Bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus cannot be reached.
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// The broker rejected a record.
    #[error("publish to {topic} failed: {reason}")]
    PublishFailed {
        /// Destination topic.
        topic: String,
        /// Broker's reason.
        reason: String,
    },

    /// The subscription was closed.
    #[error("subscription closed")]
    Closed,
}

/// Where a new consumer group starts reading a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// From the first retained record.
    Earliest,
    /// Only records published after subscribing.
    Latest,
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The broker stored the record.
    Acknowledged {
        /// Topic written to.
        topic: String,
        /// Partition written to.
        partition: u32,
        /// Offset of the record within the partition.
        offset: u64,
    },
    /// Nothing was sent; the bus is simulated.
    Simulated,
}

/// One record handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRecord {
    /// Topic the record came from.
    pub topic: String,
    /// Offset within the topic.
    pub offset: u64,
    /// Raw payload (a JSON envelope, if the sender behaved).
    pub payload: Vec<u8>,
}

/// A durable topic-based message bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Whether a broker is actually reachable.
    fn is_connected(&self) -> bool;

    /// Append `payload` to `topic` and wait for the broker's acknowledgement.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<Delivery, BusError>;

    /// Join consumer group `group` on `topics`.
    async fn subscribe(
        &self,
        group: &str,
        topics: &[String],
        offset_reset: OffsetReset,
    ) -> Result<Box<dyn BusSubscription>, BusError>;

    /// Wait until every pending publish has been acknowledged.
    async fn flush(&self) -> Result<(), BusError>;
}

/// A consumer group membership.
#[async_trait]
pub trait BusSubscription: Send {
    /// Wait up to `timeout` for records and return at most `max` of them.
    ///
    /// Returned records count as consumed for the group.
    async fn poll(&mut self, timeout: Duration, max: usize) -> Result<Vec<BusRecord>, BusError>;

    /// Leave the group. Further polls fail with [`BusError::Closed`].
    async fn close(&mut self);
}
