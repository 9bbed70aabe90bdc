//! Consumer - polls the message bus and dispatches envelopes by type.
//!
//! Lookup order for each envelope: the registered handler, then the
//! built-in log-only handler for the common types, then a "no handler"
//! warning. A malformed payload or a failing handler is logged and the
//! batch carries on.

use crate::bus::{BusError, BusRecord, BusSubscription, MessageBus};
use crate::config::Config;
use resonance_core::dispatch::invoke;
use resonance_core::{Dispatch, HandlerError, HandlerTable};
use resonance_types::{Envelope, MessageType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

/// Bus consumer.
pub struct Consumer {
    subscription: Mutex<Option<Box<dyn BusSubscription>>>,
    handlers: RwLock<HandlerTable>,
    topics: Vec<String>,
    simulated: bool,
    closed: AtomicBool,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("topics", &self.topics)
            .field("simulated", &self.simulated)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Consumer {
    /// Subscribe to the inbound and state-sync topics.
    pub async fn new(config: &Config, bus: Arc<dyn MessageBus>) -> Self {
        let topics = vec![
            config.topics.inbound.clone(),
            config.topics.state_sync.clone(),
        ];
        Self::with_topics(config, bus, topics).await
    }

    /// Subscribe to an explicit topic list.
    ///
    /// Falls back to simulation mode if the bus is down or refuses the
    /// subscription.
    pub async fn with_topics(config: &Config, bus: Arc<dyn MessageBus>, topics: Vec<String>) -> Self {
        let subscription = if bus.is_connected() {
            match bus
                .subscribe(&config.bus.group_id, &topics, config.bus.auto_offset_reset)
                .await
            {
                Ok(sub) => {
                    tracing::info!("Consumer subscribed to {:?}", topics);
                    Some(sub)
                }
                Err(e) => {
                    tracing::error!("Failed to subscribe to {:?}: {}", topics, e);
                    None
                }
            }
        } else {
            None
        };

        let simulated = subscription.is_none();
        if simulated {
            tracing::warn!("Bus unavailable, consumer running in simulation mode");
        }

        Self {
            subscription: Mutex::new(subscription),
            handlers: RwLock::new(HandlerTable::new()),
            topics,
            simulated,
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribed topics.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Whether polling is a no-op.
    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    /// Install the handler for `message_type`, replacing any earlier one.
    pub fn register_handler<F>(&self, message_type: MessageType, handler: F)
    where
        F: Fn(&Envelope) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let mut table = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        table.register(message_type, handler);
        tracing::info!("Registered handler for message type: {}", message_type);
    }

    /// Poll once and dispatch what arrived. Returns the number of records
    /// taken off the bus.
    pub async fn process_messages(&self, timeout: Duration, max_messages: usize) -> usize {
        if self.simulated {
            tracing::debug!("[SIMULATED] Would be processing messages from the bus");
            return 0;
        }

        let records = {
            let mut guard = self.subscription.lock().await;
            let Some(subscription) = guard.as_mut() else {
                return 0;
            };
            match subscription.poll(timeout, max_messages).await {
                Ok(records) => records,
                Err(BusError::Closed) => return 0,
                Err(e) => {
                    tracing::error!("Error polling the bus: {}", e);
                    return 0;
                }
            }
        };

        for record in &records {
            self.handle_record(record);
        }
        records.len()
    }

    /// Decode and dispatch one record.
    ///
    /// Returns `None` for an undecodable payload; otherwise the outcome
    /// of the registered handler, with `Unhandled` meaning a built-in
    /// fallback (or nothing) ran instead.
    pub fn handle_record(&self, record: &BusRecord) -> Option<Dispatch> {
        let envelope = match Envelope::from_bytes(&record.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(
                    "Dropping malformed message from {} at offset {}: {}",
                    record.topic,
                    record.offset,
                    e
                );
                return None;
            }
        };
        tracing::debug!("Processing message type: {}", envelope.message_type());

        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(envelope.message_type());

        let outcome = match handler {
            Some(handler) => invoke(&handler, &envelope),
            None => {
                default_handler(&envelope);
                Dispatch::Unhandled
            }
        };
        if let Dispatch::Failed(e) = &outcome {
            tracing::error!("Error handling {}: {}", envelope.message_type(), e);
        }
        Some(outcome)
    }

    /// Leave the consumer group. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut subscription) = self.subscription.lock().await.take() {
            subscription.close().await;
            tracing::info!("Consumer closed");
        }
    }
}

/// Log-only reaction for the types every node is expected to receive.
fn default_handler(envelope: &Envelope) {
    let from = envelope.origin().unwrap_or("unknown");
    match envelope {
        Envelope::StateUpdate(m) => {
            tracing::info!("State update from {}: {:?}", from, m.data);
        }
        Envelope::FrequencySync(m) => {
            tracing::info!(
                "Frequency sync from {}: {} Hz, S-ROI: {}",
                from,
                m.frequency,
                m.s_roi
            );
        }
        Envelope::RepositoryEvent(m) => {
            tracing::info!("Repository event from {}: {}", from, m.event_type);
        }
        Envelope::Heartbeat(_) => {
            tracing::debug!("Heartbeat from {}", from);
        }
        Envelope::SRoiUpdate(_) | Envelope::Ack(_) | Envelope::Error(_) => {
            tracing::warn!("No handler for message type: {}", envelope.message_type());
        }
    }
}
