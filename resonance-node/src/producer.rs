//! Producer - publishes envelopes to the message bus.
//!
//! If the bus is unreachable when the producer is built, it switches to
//! [`SimulatedBus`] for its whole lifetime: every publish becomes a single
//! log line that still reports success.

use crate::bus::{BusError, Delivery, MessageBus, SimulatedBus};
use crate::config::{Config, TopicConfig};
use resonance_core::NodeRegistry;
use resonance_types::{Envelope, Origin, WireError};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Publish errors.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Targeted send to a peer missing from the registry.
    #[error("unknown target node: {0}")]
    UnknownTarget(String),

    /// Envelope could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] WireError),

    /// The bus rejected the record.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// No acknowledgement within the send timeout.
    #[error("no acknowledgement from {topic} within {after:?}")]
    Timeout {
        /// Destination topic.
        topic: String,
        /// Configured bound.
        after: Duration,
    },

    /// The producer was closed.
    #[error("producer closed")]
    Closed,
}

/// Bus producer.
pub struct Producer {
    bus: Arc<dyn MessageBus>,
    simulated: bool,
    topics: TopicConfig,
    registry: NodeRegistry,
    origin: Origin,
    frequency: f64,
    s_roi: f64,
    send_timeout: Duration,
    closed: AtomicBool,
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("simulated", &self.simulated)
            .field("topics", &self.topics)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Producer {
    /// Create a producer on `bus`, or on the simulated bus if `bus` is down.
    pub fn new(config: &Config, bus: Arc<dyn MessageBus>) -> Self {
        let simulated = !bus.is_connected();
        let bus: Arc<dyn MessageBus> = if simulated {
            tracing::warn!("Bus unavailable, producer running in simulation mode");
            Arc::new(SimulatedBus)
        } else {
            tracing::info!(
                "Producer {} connected to {:?}",
                config.bus.client_id,
                config.bus.bootstrap_servers
            );
            bus
        };

        Self {
            bus,
            simulated,
            topics: config.topics.clone(),
            registry: config.nodes.clone(),
            origin: config.resonance.origin(),
            frequency: config.resonance.frequency,
            s_roi: config.resonance.s_roi_threshold,
            send_timeout: config.bus.send_timeout(),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether publishes are only logged.
    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    /// Publish one envelope to `topic`.
    pub async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<Delivery, PublishError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PublishError::Closed);
        }

        let payload = envelope.to_bytes()?;
        match tokio::time::timeout(self.send_timeout, self.bus.publish(topic, payload)).await {
            Ok(Ok(delivery)) => {
                if let Delivery::Acknowledged {
                    partition, offset, ..
                } = &delivery
                {
                    tracing::debug!(
                        "Message sent to {} [partition {}] at offset {}",
                        topic,
                        partition,
                        offset
                    );
                }
                Ok(delivery)
            }
            Ok(Err(e)) => {
                tracing::error!("Failed to send {} to {}: {}", envelope.message_type(), topic, e);
                Err(e.into())
            }
            Err(_) => {
                tracing::error!(
                    "Timed out sending {} to {} after {:?}",
                    envelope.message_type(),
                    topic,
                    self.send_timeout
                );
                Err(PublishError::Timeout {
                    topic: topic.to_string(),
                    after: self.send_timeout,
                })
            }
        }
    }

    /// Publish a state snapshot to the state-sync topic.
    pub async fn send_state_update(&self, data: Value) -> Result<Delivery, PublishError> {
        let envelope = self.origin.state_update(data);
        self.publish(&self.topics.state_sync, &envelope).await
    }

    /// Publish a frequency sync to the state-sync topic.
    pub async fn send_frequency_sync(&self, frequency: f64, s_roi: f64) -> Result<Delivery, PublishError> {
        let envelope = self.origin.frequency_sync(frequency, s_roi);
        self.publish(&self.topics.state_sync, &envelope).await
    }

    /// Publish a repository event.
    ///
    /// Goes to the target's own topic, or to the outbound topic when no
    /// target is given. An unregistered target publishes nothing.
    pub async fn send_repository_event(
        &self,
        event_type: &str,
        data: Value,
        target: Option<&str>,
    ) -> Result<Delivery, PublishError> {
        let topic = match target {
            Some(node) => match self.registry.topic_for(node) {
                Some(topic) => topic,
                None => {
                    tracing::error!("Unknown target node: {}", node);
                    return Err(PublishError::UnknownTarget(node.to_string()));
                }
            },
            None => self.topics.outbound.as_str(),
        };

        let envelope = self.origin.repository_event(event_type, data);
        self.publish(topic, &envelope).await
    }

    /// Publish a heartbeat carrying this node's frequency and S-ROI.
    pub async fn send_heartbeat(&self) -> Result<Delivery, PublishError> {
        let envelope = self.origin.heartbeat_with_vitals(self.frequency, self.s_roi);
        self.publish(&self.topics.state_sync, &envelope).await
    }

    /// Flush and release the bus. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.bus.flush().await {
            tracing::warn!("Flush on close failed: {}", e);
        }
        tracing::info!("Producer closed");
    }
}
