//! Pipeline - one hub, one synchronizer and one consumer, run together.
//!
//! ```text
//!              ┌──────────────┐
//!   peers ───▶ │     Hub      │ ◀─── inbound sockets
//!              └──────────────┘
//!              ┌──────────────┐  spokes   ┌───────┐
//!              │ Synchronizer │ ────────▶ │ peers │
//!              └──────┬───────┘           └───────┘
//!                     │ producer
//!              ┌──────▼───────┐
//!              │     Bus      │
//!              └──────┬───────┘
//!                     │ consumer
//!              ┌──────▼───────┐
//!              │  poll loop   │
//!              └──────────────┘
//! ```

use crate::bus::{self, MessageBus};
use crate::config::Config;
use crate::consumer::Consumer;
use crate::error::Result;
use crate::hub::Hub;
use crate::producer::Producer;
use crate::synchronizer::Synchronizer;
use resonance_client::TransportFactory;
use resonance_types::{Envelope, MessageType};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A complete Resonance node.
pub struct Pipeline<F: TransportFactory + 'static> {
    config: Config,
    hub: Arc<Hub>,
    synchronizer: Arc<Synchronizer<F>>,
    consumer: Arc<Consumer>,
    cancel: CancellationToken,
    stopped: AtomicBool,
}

impl<F: TransportFactory + 'static> std::fmt::Debug for Pipeline<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("hub", &self.hub)
            .field("synchronizer", &self.synchronizer)
            .field("consumer", &self.consumer)
            .finish_non_exhaustive()
    }
}

impl<F: TransportFactory + 'static> Pipeline<F> {
    /// Build a pipeline on the bus selected by `config`.
    pub async fn new(config: Config, factory: F) -> Self {
        let bus = bus::from_config(&config.bus);
        Self::with_bus(config, bus, factory).await
    }

    /// Build a pipeline on an explicit bus.
    pub async fn with_bus(config: Config, bus: Arc<dyn MessageBus>, factory: F) -> Self {
        let producer = Producer::new(&config, Arc::clone(&bus));
        let consumer = Consumer::new(&config, bus).await;
        let pipeline = Self {
            hub: Arc::new(Hub::new(&config)),
            synchronizer: Arc::new(Synchronizer::new(&config, producer, factory)),
            consumer: Arc::new(consumer),
            config,
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        };
        pipeline.setup_handlers();
        pipeline
    }

    /// The socket hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The state synchronizer.
    pub fn synchronizer(&self) -> &Arc<Synchronizer<F>> {
        &self.synchronizer
    }

    /// The bus consumer.
    pub fn consumer(&self) -> &Arc<Consumer> {
        &self.consumer
    }

    /// Address the hub is listening on, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.hub.local_addr()
    }

    /// Install the log-only consumer handlers.
    pub fn setup_handlers(&self) {
        self.consumer
            .register_handler(MessageType::StateUpdate, |envelope| {
                if let Envelope::StateUpdate(m) = envelope {
                    tracing::info!("Received state update: {:?}", m.data);
                }
                Ok(())
            });
        self.consumer
            .register_handler(MessageType::FrequencySync, |envelope| {
                if let Envelope::FrequencySync(m) = envelope {
                    tracing::info!(
                        "Received frequency sync: {} Hz, S-ROI: {}",
                        m.frequency,
                        m.s_roi
                    );
                }
                Ok(())
            });
        self.consumer
            .register_handler(MessageType::RepositoryEvent, |envelope| {
                if let Envelope::RepositoryEvent(m) = envelope {
                    tracing::info!(
                        "Received repository event: {} from {}",
                        m.event_type,
                        envelope.origin().unwrap_or("unknown")
                    );
                }
                Ok(())
            });
    }

    /// Run the hub, the sync loop and the bus poll loop until stopped.
    ///
    /// # Errors
    ///
    /// Fails only if the hub cannot bind its address. A task that fails
    /// later is logged and the others keep running.
    pub async fn start(&self) -> Result<()> {
        let resonance = &self.config.resonance;
        tracing::info!("Starting Resonance pipeline");
        tracing::info!("Anchor: {}", resonance.anchor);
        tracing::info!("Frequency: {} Hz", resonance.frequency);
        tracing::info!("S-ROI threshold: {}", resonance.s_roi_threshold);

        if self.cancel.is_cancelled() {
            return Ok(());
        }

        self.hub.start().await?;
        if self.cancel.is_cancelled() {
            // stop() ran while the hub was binding.
            self.hub.stop().await;
            return Ok(());
        }

        let mut tasks = JoinSet::new();
        let synchronizer = Arc::clone(&self.synchronizer);
        tasks.spawn(async move { synchronizer.start().await });
        tasks.spawn(poll_loop(
            Arc::clone(&self.consumer),
            self.cancel.clone(),
            self.config.bus.poll_timeout(),
            self.config.bus.poll_batch,
            self.config.bus.poll_idle(),
        ));

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Pipeline task failed: {}", e);
            }
        }
        Ok(())
    }

    /// Stop every component. Safe to call more than once and while
    /// [`start`](Self::start) is still coming up.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("Stopping Resonance pipeline");
        self.hub.stop().await;
        self.synchronizer.stop().await;
        self.consumer.close().await;
        tracing::info!("Resonance pipeline stopped");
    }
}

async fn poll_loop(
    consumer: Arc<Consumer>,
    cancel: CancellationToken,
    timeout: Duration,
    batch: usize,
    idle: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = consumer.process_messages(timeout, batch) => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(idle) => {}
        }
    }
    tracing::debug!("Bus poll loop stopped");
}
