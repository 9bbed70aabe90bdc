//! Socket hub - the WebSocket server side of a node.
//!
//! The hub accepts inbound peers, greets each with a welcome frame and
//! relays what they send to every other peer:
//!
//! | Inbound frame | Relayed | Reply to sender |
//! |---------------|---------|-----------------|
//! | `state_update`, `frequency_sync`, `s_roi_update`, `repository_event` | yes | `ack` |
//! | `heartbeat` | no | fresh `heartbeat` |
//! | anything else | no | `error` |
//!
//! Only the `type` field of an inbound frame is inspected. Relayed frames
//! go out exactly as the sender wrote them, unknown fields included.
//!
//! The connection set is a [`DashMap`]; the accept path and the broadcast
//! cleanup path both go through [`Hub::register_client`] and
//! [`Hub::unregister_client`]. Every write to a connection is bounded by
//! [`SocketConfig::write_timeout`]; a connection that misses it is closed,
//! so a peer that stops reading cannot hold up the others.

use crate::config::{Config, SocketConfig, SocketMode};
use crate::error::{NodeError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use resonance_types::{Envelope, MessageType, Origin, WireError};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

/// Error text sent back for frames that are not JSON.
pub const INVALID_JSON: &str = "Invalid JSON format";

const MAX_PING_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

fn text_field<'a>(frame: &'a Value, name: &str) -> Option<&'a str> {
    frame.get(name).and_then(Value::as_str)
}

/// Identifier of one hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Write side of one hub connection.
#[async_trait]
pub trait ClientSink: Send + Sync {
    /// Send one text frame.
    async fn send_text(&self, frame: String) -> Result<()>;

    /// Send a keep-alive ping.
    async fn ping(&self) -> Result<()>;

    /// Start the close handshake.
    async fn close(&self);
}

/// [`ClientSink`] over an accepted WebSocket.
///
/// The first failed or timed-out write cancels `failed`, which ends the
/// connection task.
struct WsClientSink {
    sink: Mutex<SplitSink<WebSocketStream<TcpStream>, Message>>,
    write_timeout: Duration,
    failed: CancellationToken,
}

impl WsClientSink {
    fn new(sink: SplitSink<WebSocketStream<TcpStream>, Message>, write_timeout: Duration) -> Self {
        Self {
            sink: Mutex::new(sink),
            write_timeout,
            failed: CancellationToken::new(),
        }
    }

    async fn write(&self, message: Message) -> Result<()> {
        // The lock wait counts against the deadline too.
        let send = async move { self.sink.lock().await.send(message).await };
        let result = match tokio::time::timeout(self.write_timeout, send).await {
            Ok(sent) => sent.map_err(|e| NodeError::ClientSend(e.to_string())),
            Err(_) => Err(NodeError::ClientSend(format!(
                "write timed out after {:?}",
                self.write_timeout
            ))),
        };
        if result.is_err() {
            self.failed.cancel();
        }
        result
    }
}

#[async_trait]
impl ClientSink for WsClientSink {
    async fn send_text(&self, frame: String) -> Result<()> {
        self.write(Message::Text(frame)).await
    }

    async fn ping(&self) -> Result<()> {
        self.write(Message::Ping(Vec::new())).await
    }

    async fn close(&self) {
        let close = async { self.sink.lock().await.close().await };
        match tokio::time::timeout(self.write_timeout, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Close handshake failed: {}", e),
            Err(_) => tracing::debug!("Close handshake timed out"),
        }
    }
}

/// Operational metrics for the hub.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct HubMetrics {
    /// Total connections accepted.
    pub connections_total: AtomicU64,
    /// Total frames received from clients.
    pub frames_received: AtomicU64,
    /// Total frames delivered to clients by broadcast.
    pub frames_relayed: AtomicU64,
    /// Total failed writes to clients.
    pub send_failures: AtomicU64,
    /// Total error frames sent back to clients.
    pub errors_total: AtomicU64,
}

/// Removes a connection from the set when its task ends, however it ends.
struct ClientGuard<'a> {
    hub: &'a Hub,
    id: ClientId,
}

impl Drop for ClientGuard<'_> {
    fn drop(&mut self) {
        self.hub.unregister_client(self.id);
    }
}

/// WebSocket hub.
pub struct Hub {
    config: SocketConfig,
    origin: Origin,
    frequency: f64,
    s_roi: f64,
    clients: DashMap<ClientId, Arc<dyn ClientSink>>,
    next_id: AtomicU64,
    metrics: HubMetrics,
    running: AtomicBool,
    shutdown: std::sync::Mutex<CancellationToken>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .field("clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Create a stopped hub.
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.socket.clone(),
            origin: config.resonance.origin(),
            frequency: config.resonance.frequency,
            s_roi: config.resonance.s_roi_threshold,
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
            metrics: HubMetrics::default(),
            running: AtomicBool::new(false),
            shutdown: std::sync::Mutex::new(CancellationToken::new()),
            accept_task: Mutex::new(None),
            local_addr: std::sync::Mutex::new(None),
        }
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &HubMetrics {
        &self.metrics
    }

    /// Number of live connections.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Whether `id` is in the connection set.
    pub fn has_client(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Whether the hub is started.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Add a connection and greet it with the welcome frame.
    pub async fn register_client(&self, sink: Arc<dyn ClientSink>) -> ClientId {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.clients.insert(id, sink);
        tracing::info!("Client connected. Total clients: {}", self.clients.len());

        let welcome = self.origin.welcome(self.frequency, self.s_roi);
        if let Err(e) = self.send_to_client(id, &welcome).await {
            tracing::error!("Error sending welcome to {}: {}", id, e);
        }
        id
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub fn unregister_client(&self, id: ClientId) -> bool {
        let removed = self.clients.remove(&id).is_some();
        if removed {
            tracing::info!("Client disconnected. Total clients: {}", self.clients.len());
        }
        removed
    }

    /// Send one envelope to one connection.
    pub async fn send_to_client(&self, id: ClientId, envelope: &Envelope) -> Result<()> {
        // Clone the sink out so no map guard is held across the await.
        let Some(sink) = self.clients.get(&id).map(|entry| entry.value().clone()) else {
            return Err(NodeError::ClientSend(format!("{id} is not connected")));
        };

        let frame = envelope.to_json()?;
        sink.send_text(frame).await.inspect_err(|e| {
            self.metrics.send_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Error sending message to {}: {}", id, e);
        })
    }

    /// Send `envelope` to every connection except `exclude`.
    ///
    /// Returns the number of successful deliveries.
    pub async fn broadcast(&self, envelope: &Envelope, exclude: Option<ClientId>) -> usize {
        match envelope.to_json() {
            Ok(frame) => self.relay(&frame, exclude).await,
            Err(e) => {
                tracing::error!("Cannot encode {} for broadcast: {}", envelope.message_type(), e);
                0
            }
        }
    }

    /// Send an already encoded frame to every connection except `exclude`.
    ///
    /// All sends run to completion; connections whose send failed are
    /// removed afterwards. Returns the number of successful deliveries.
    pub async fn relay(&self, frame: &str, exclude: Option<ClientId>) -> usize {
        let targets: Vec<(ClientId, Arc<dyn ClientSink>)> = self
            .clients
            .iter()
            .filter(|entry| Some(*entry.key()) != exclude)
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        if targets.is_empty() {
            tracing::debug!("No clients connected for broadcast");
            return 0;
        }

        let sends = targets.iter().map(|(id, sink)| {
            let frame = frame.to_string();
            async move { (*id, sink.send_text(frame).await) }
        });
        let results = futures_util::future::join_all(sends).await;

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::error!("Error broadcasting to {}: {}", id, e);
                    failed.push(id);
                }
            }
        }

        self.metrics
            .frames_relayed
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.metrics
            .send_failures
            .fetch_add(failed.len() as u64, Ordering::Relaxed);
        for id in failed {
            self.unregister_client(id);
        }
        delivered
    }

    async fn send_error(&self, id: ClientId, message: String) {
        self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
        // Failures are already logged by send_to_client.
        let _ = self.send_to_client(id, &Envelope::error(message)).await;
    }

    /// Handle one inbound text frame from `id`.
    pub async fn process_frame(&self, id: ClientId, frame: &str) {
        self.metrics.frames_received.fetch_add(1, Ordering::Relaxed);

        let value: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Invalid JSON message from {}: {}", id, e);
                self.send_error(id, INVALID_JSON.to_string()).await;
                return;
            }
        };

        let message_type = match MessageType::of(&value) {
            Ok(message_type) => message_type,
            Err(WireError::UnknownType(kind)) => {
                tracing::warn!("Unknown message type: {}", kind);
                self.send_error(id, format!("Unknown message type: {kind}")).await;
                return;
            }
            Err(_) => {
                tracing::warn!("Message without type from {}", id);
                self.send_error(id, "Missing message type".to_string()).await;
                return;
            }
        };
        tracing::debug!("Received {} from {}", message_type, id);

        match message_type {
            MessageType::StateUpdate
            | MessageType::FrequencySync
            | MessageType::SRoiUpdate
            | MessageType::RepositoryEvent => {
                if message_type == MessageType::RepositoryEvent {
                    tracing::info!(
                        "Repository event: {} from {}",
                        text_field(&value, "event_type").unwrap_or("unknown"),
                        text_field(&value, "anchor")
                            .or_else(|| text_field(&value, "source"))
                            .unwrap_or("unknown")
                    );
                }
                self.relay(frame, Some(id)).await;
                let _ = self.send_to_client(id, &Envelope::ack(message_type)).await;
            }
            MessageType::Heartbeat => {
                let _ = self.send_to_client(id, &self.origin.heartbeat()).await;
            }
            MessageType::Ack | MessageType::Error => {
                tracing::warn!("Unknown message type: {}", message_type);
                self.send_error(id, format!("Unknown message type: {message_type}"))
                    .await;
            }
        }
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Returns the bound address, or `None` in simulated mode. Calling it
    /// while running is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<Option<SocketAddr>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(self.local_addr());
        }

        let token = CancellationToken::new();
        *self.shutdown.lock().unwrap_or_else(|e| e.into_inner()) = token.clone();

        let addr = self.config.bind_address();
        if self.config.mode == SocketMode::Simulated {
            tracing::warn!("[SIMULATED] WebSocket server would start on {}", addr);
            return Ok(None);
        }

        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.running.store(false, Ordering::SeqCst);
                tracing::error!("Error starting socket hub on {}: {}", addr, source);
                return Err(NodeError::Bind { addr, source });
            }
        };
        let local = listener.local_addr()?;

        // stop() takes this lock after cancelling, so it either sees the
        // handle or we see the cancellation.
        let mut task = self.accept_task.lock().await;
        if token.is_cancelled() {
            return Ok(None);
        }
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(local);
        *task = Some(tokio::spawn(Arc::clone(self).accept_loop(listener, token)));

        tracing::info!("Socket hub started on {}", local);
        Ok(Some(local))
    }

    /// Stop accepting, close every connection and release the port.
    ///
    /// Returns once the listener is dropped and all connection tasks have
    /// finished. Safe to call more than once.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.shutdown_token().cancel();
        if let Some(handle) = self.accept_task.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!("Accept loop ended abnormally: {}", e);
            }
        }
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = None;

        tracing::info!(
            "Socket hub stopped (connections: {}, received: {}, relayed: {}, send failures: {})",
            self.metrics.connections_total.load(Ordering::Relaxed),
            self.metrics.frames_received.load(Ordering::Relaxed),
            self.metrics.frames_relayed.load(Ordering::Relaxed),
            self.metrics.send_failures.load(Ordering::Relaxed),
        );
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("Accepted connection from {}", peer);
                        connections.spawn(
                            Arc::clone(&self).handle_connection(stream, peer, shutdown.clone()),
                        );
                    }
                    Err(e) => {
                        tracing::error!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        drop(listener);
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Connection task failed: {}", e);
            }
        }
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: CancellationToken,
    ) {
        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::warn!("WebSocket handshake with {} failed: {}", peer, e);
                return;
            }
        };
        let (sink, mut frames) = ws.split();
        let sink = Arc::new(WsClientSink::new(sink, self.config.write_timeout()));

        let id = self.register_client(sink.clone()).await;
        let _guard = ClientGuard { hub: &self, id };

        // Zero would make the interval panic, a huge value would overflow
        // the first deadline.
        let period = self
            .config
            .ping_interval()
            .clamp(Duration::from_secs(1), MAX_PING_PERIOD);
        let idle_limit = self.config.idle_limit();
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    sink.close().await;
                    break;
                }
                _ = sink.failed.cancelled() => {
                    tracing::warn!("{} stopped accepting writes, dropping", id);
                    break;
                }
                _ = keepalive.tick() => {
                    if last_seen.elapsed() >= idle_limit {
                        tracing::warn!("{} silent for {:?}, dropping", id, last_seen.elapsed());
                        sink.close().await;
                        break;
                    }
                    if let Err(e) = sink.ping().await {
                        tracing::debug!("Ping to {} failed: {}", id, e);
                        break;
                    }
                }
                next = frames.next() => {
                    match next {
                        Some(Ok(Message::Text(text))) => {
                            last_seen = Instant::now();
                            self.process_frame(id, &text).await;
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            last_seen = Instant::now();
                            match String::from_utf8(bytes) {
                                Ok(text) => self.process_frame(id, &text).await,
                                Err(_) => self.send_error(id, INVALID_JSON.to_string()).await,
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("Client connection closed");
                            break;
                        }
                        Some(Ok(_)) => last_seen = Instant::now(),
                        Some(Err(e)) => {
                            tracing::error!("Error handling client {}: {}", id, e);
                            break;
                        }
                    }
                }
            }
        }
    }
}
