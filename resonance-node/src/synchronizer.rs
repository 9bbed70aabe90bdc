//! State synchronizer - owns the local state and pushes it to every peer.
//!
//! Each sync cycle sends, in this order:
//! 1. `state_update` with the full state record
//! 2. `frequency_sync` with the current frequency and S-ROI
//! 3. `heartbeat`
//!
//! Every envelope goes through the producer and through each connected
//! spoke. Delivery is best-effort: a failure on the bus or on one peer is
//! logged and recorded in the [`FanoutReport`], and the remaining channels
//! still get the envelope.

use crate::config::Config;
use crate::producer::Producer;
use chrono::Utc;
use futures_util::FutureExt;
use resonance_client::{Spoke, TransportFactory};
use resonance_core::{NodeRegistry, ReconnectPolicy, StatePatch};
use resonance_types::{Envelope, MessageType, Origin, ResonanceState};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Outcome of one best-effort fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Bus publishes that were accepted.
    pub published: usize,
    /// Bus publishes that failed.
    pub publish_failures: usize,
    /// Peers that received the frame over their socket.
    pub delivered: Vec<String>,
    /// Connected peers whose socket send failed.
    pub failed: Vec<String>,
}

impl FanoutReport {
    /// Whether every attempted delivery succeeded.
    pub fn is_complete(&self) -> bool {
        self.publish_failures == 0 && self.failed.is_empty()
    }

    fn record_publish<T, E>(&mut self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.published += 1,
            Err(_) => self.publish_failures += 1,
        }
    }
}

type SpokeMap<T> = BTreeMap<String, Arc<Spoke<T>>>;

/// Owns [`ResonanceState`] and drives the sync loop.
pub struct Synchronizer<F: TransportFactory> {
    state: RwLock<ResonanceState>,
    producer: Producer,
    spokes: RwLock<SpokeMap<F::Transport>>,
    factory: F,
    registry: NodeRegistry,
    origin: Origin,
    policy: ReconnectPolicy,
    sync_interval: Duration,
    running: AtomicBool,
    stopped: AtomicBool,
    cancel: CancellationToken,
    links: tokio::sync::Mutex<JoinSet<()>>,
}

impl<F: TransportFactory> std::fmt::Debug for Synchronizer<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("state", &self.get_state())
            .field("producer", &self.producer)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl<F: TransportFactory> Synchronizer<F> {
    /// Create a synchronizer with fresh state and no spokes.
    pub fn new(config: &Config, producer: Producer, factory: F) -> Self {
        let resonance = &config.resonance;
        Self {
            state: RwLock::new(ResonanceState::new(
                resonance.frequency,
                resonance.s_roi_threshold,
                resonance.anchor.clone(),
            )),
            producer,
            spokes: RwLock::new(BTreeMap::new()),
            factory,
            registry: config.nodes.clone(),
            origin: resonance.origin(),
            policy: ReconnectPolicy::fixed(config.socket.reconnect_delay()),
            sync_interval: resonance.sync_interval(),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            links: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    /// Whether the sync loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The producer used for bus fan-out.
    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    // ===========================================
    // State
    // ===========================================

    /// Merge `patch` into the state and refresh `last_update`.
    ///
    /// Local only; nothing is sent.
    pub fn update_state(&self, patch: StatePatch) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        patch.apply(&mut state, Utc::now());
    }

    /// Snapshot of the current state.
    pub fn get_state(&self) -> ResonanceState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    // ===========================================
    // Spokes
    // ===========================================

    /// Build one spoke per registry entry that does not have one yet.
    ///
    /// A peer whose transport cannot be built is logged and skipped.
    /// Returns the number of spokes created.
    pub fn initialize_clients(&self) -> usize {
        let mut created = 0;
        for (name, endpoint) in self.registry.iter() {
            if self.spoke(name).is_some() {
                continue;
            }

            let transport = match self.factory.create(name, endpoint) {
                Ok(transport) => transport,
                Err(e) => {
                    tracing::error!("Failed to initialize client for {}: {}", name, e);
                    continue;
                }
            };

            let spoke = Spoke::new(name, endpoint.websocket.clone(), transport, self.origin.clone())
                .with_reconnect_policy(self.policy);
            let peer = name.to_string();
            spoke.register_handler(MessageType::Error, move |envelope| {
                if let Envelope::Error(report) = envelope {
                    tracing::warn!("Peer {} reported an error: {}", peer, report.message);
                }
                Ok(())
            });

            self.spokes
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(name.to_string(), Arc::new(spoke));
            tracing::info!("Initialized client for {} at {}", name, endpoint.websocket);
            created += 1;
        }
        created
    }

    /// The spoke for peer `node`, if initialized.
    pub fn spoke(&self, node: &str) -> Option<Arc<Spoke<F::Transport>>> {
        self.spokes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(node)
            .cloned()
    }

    fn all_spokes(&self) -> Vec<Arc<Spoke<F::Transport>>> {
        self.spokes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    fn connected_spokes(&self) -> Vec<Arc<Spoke<F::Transport>>> {
        self.all_spokes()
            .into_iter()
            .filter(|spoke| spoke.is_connected())
            .collect()
    }

    /// Names of peers with a live socket link right now.
    pub fn connected_nodes(&self) -> BTreeSet<String> {
        self.connected_spokes()
            .iter()
            .map(|spoke| spoke.node().to_string())
            .collect()
    }

    /// Connect every spoke concurrently. Returns how many are connected.
    pub async fn connect_all(&self) -> usize {
        let spokes = self.all_spokes();
        // Failures are logged by the spoke.
        futures_util::future::join_all(spokes.iter().map(|spoke| spoke.connect())).await;
        spokes.iter().filter(|spoke| spoke.is_connected()).count()
    }

    /// Disconnect every spoke concurrently.
    pub async fn disconnect_all(&self) {
        let spokes = self.all_spokes();
        futures_util::future::join_all(spokes.iter().map(|spoke| spoke.disconnect())).await;
    }

    // ===========================================
    // Fan-out
    // ===========================================

    async fn fan_out<'a, Fut>(
        &self,
        report: &mut FanoutReport,
        spokes: &'a [Arc<Spoke<F::Transport>>],
        send: impl Fn(&'a Spoke<F::Transport>) -> Fut,
    ) where
        Fut: std::future::Future<Output = Result<(), resonance_client::SpokeError>>,
    {
        let sends = spokes.iter().map(|spoke| {
            let fut = send(spoke.as_ref());
            async move { (spoke.node(), fut.await) }
        });

        // Send errors are logged by the spoke.
        for (node, result) in futures_util::future::join_all(sends).await {
            match result {
                Ok(()) => report.delivered.push(node.to_string()),
                Err(_) => report.failed.push(node.to_string()),
            }
        }
    }

    /// Send the full state record to the bus and every connected peer.
    pub async fn broadcast_state(&self) -> FanoutReport {
        let mut report = FanoutReport::default();
        let data = match self.get_state().to_value() {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Cannot encode state: {}", e);
                report.publish_failures += 1;
                return report;
            }
        };

        report.record_publish(&self.producer.send_state_update(data.clone()).await);

        let spokes = self.connected_spokes();
        self.fan_out(&mut report, &spokes, |spoke| spoke.send_state_update(data.clone()))
            .await;
        report
    }

    /// Send the current frequency and S-ROI to the bus and every connected peer.
    pub async fn broadcast_frequency_sync(&self) -> FanoutReport {
        let mut report = FanoutReport::default();
        let state = self.get_state();

        report.record_publish(
            &self
                .producer
                .send_frequency_sync(state.frequency, state.s_roi)
                .await,
        );

        let spokes = self.connected_spokes();
        self.fan_out(&mut report, &spokes, |spoke| {
            spoke.send_frequency_sync(state.frequency, state.s_roi)
        })
        .await;
        report
    }

    /// Notify peers of a repository event.
    ///
    /// Each target gets the event on its own bus topic and, if connected,
    /// over its socket. `None` targets every registered peer.
    pub async fn notify_repository_event(
        &self,
        event_type: &str,
        data: Value,
        targets: Option<&[String]>,
    ) -> FanoutReport {
        let targets: Vec<String> = match targets {
            Some(targets) => targets.to_vec(),
            None => self.registry.names().map(str::to_string).collect(),
        };
        let mut report = FanoutReport::default();

        let publishes = targets.iter().map(|node| {
            self.producer
                .send_repository_event(event_type, data.clone(), Some(node))
        });
        for result in futures_util::future::join_all(publishes).await {
            report.record_publish(&result);
        }

        let spokes: Vec<_> = targets
            .iter()
            .filter_map(|node| self.spoke(node))
            .filter(|spoke| spoke.is_connected())
            .collect();
        self.fan_out(&mut report, &spokes, |spoke| {
            spoke.send_repository_event(event_type, data.clone())
        })
        .await;

        tracing::info!(
            "Repository event {} sent to {} of {} targets",
            event_type,
            report.delivered.len(),
            targets.len()
        );
        report
    }

    /// Send a heartbeat to the bus and every connected peer.
    pub async fn send_heartbeat(&self) -> FanoutReport {
        let mut report = FanoutReport::default();
        report.record_publish(&self.producer.send_heartbeat().await);

        let spokes = self.connected_spokes();
        self.fan_out(&mut report, &spokes, |spoke| spoke.send_heartbeat())
            .await;
        report
    }

    // ===========================================
    // Lifecycle
    // ===========================================

    /// Run one sync cycle.
    pub async fn sync_cycle(&self) {
        let reports = [
            ("state", self.broadcast_state().await),
            ("frequency", self.broadcast_frequency_sync().await),
            ("heartbeat", self.send_heartbeat().await),
        ];
        for (what, report) in &reports {
            if !report.failed.is_empty() {
                tracing::warn!("Sync {} did not reach: {}", what, report.failed.join(", "));
            }
        }

        self.update_state(StatePatch::new().connected_nodes(self.connected_nodes()));
        tracing::debug!("Sync cycle complete");
    }

    /// Run sync cycles until stopped.
    ///
    /// A panicking cycle is logged and the next one runs on schedule.
    pub async fn periodic_sync(&self) {
        while !self.cancel.is_cancelled() {
            if let Err(panic) = AssertUnwindSafe(self.sync_cycle()).catch_unwind().await {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!("Error in periodic sync: {}", reason);
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.sync_interval) => {}
            }
        }
    }

    /// Connect to every peer and run the sync loop.
    ///
    /// Returns only once [`stop`](Self::stop) is called. A stopped
    /// synchronizer cannot be started again.
    pub async fn start(&self) {
        if self.cancel.is_cancelled() {
            tracing::warn!("State synchronizer already stopped");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("State synchronizer already running");
            return;
        }

        self.initialize_clients();
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            connected = self.connect_all() => {
                tracing::info!("Connected to {} of {} peers", connected, self.registry.len());
            }
        }

        {
            let mut links = self.links.lock().await;
            if self.cancel.is_cancelled() {
                return;
            }
            for spoke in self.all_spokes() {
                let cancel = self.cancel.clone();
                links.spawn(async move { spoke.run_with_reconnect(cancel).await });
            }
        }

        tracing::info!("State synchronizer started");
        self.periodic_sync().await;
    }

    /// Stop the sync loop, release every peer link and close the producer.
    ///
    /// Safe to call more than once, and before or during [`start`](Self::start).
    pub async fn stop(&self) {
        self.cancel.cancel();
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.running.store(false, Ordering::SeqCst);

        {
            let mut links = self.links.lock().await;
            while let Some(joined) = links.join_next().await {
                if let Err(e) = joined {
                    tracing::error!("Reconnect loop failed: {}", e);
                }
            }
        }

        self.disconnect_all().await;
        self.producer.close().await;
        tracing::info!("State synchronizer stopped");
    }
}
