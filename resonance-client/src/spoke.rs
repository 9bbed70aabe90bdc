//! Spoke - one outbound socket link to one named peer.
//!
//! # Architecture
//!
//! The spoke feeds a pure link state machine (from resonance-core) and
//! performs the actual I/O through the [`Transport`] trait.
//!
//! ```text
//! Synchronizer → Spoke → Transport → Peer hub
//!                  ↓
//!          resonance-core (LinkState, HandlerTable)
//! ```
//!
//! Sends are only attempted while the link is connected. Any send
//! failure drops the link so the next sync cycle skips this peer until
//! [`Spoke::run_with_reconnect`] brings it back.

use std::sync::{Mutex, RwLock};

use resonance_core::dispatch::invoke;
use resonance_core::{
    Dispatch, HandlerError, HandlerTable, LinkEvent, LinkState, ReconnectPolicy,
};
use resonance_types::{Envelope, MessageType, Origin, WireError};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::transport::{Transport, TransportError};

/// Spoke errors.
#[derive(Debug, Error)]
pub enum SpokeError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Envelope could not be encoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Link is down; nothing was sent.
    #[error("not connected")]
    NotConnected,
}

/// Outbound link to one peer.
pub struct Spoke<T: Transport> {
    node: String,
    uri: String,
    transport: T,
    link: Mutex<LinkState>,
    handlers: RwLock<HandlerTable>,
    origin: Origin,
    policy: ReconnectPolicy,
}

impl<T: Transport> std::fmt::Debug for Spoke<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spoke")
            .field("node", &self.node)
            .field("uri", &self.uri)
            .field("link", &self.link_state())
            .finish()
    }
}

impl<T: Transport> Spoke<T> {
    /// Create a disconnected spoke for peer `node` at `uri`.
    pub fn new(node: impl Into<String>, uri: impl Into<String>, transport: T, origin: Origin) -> Self {
        Self {
            node: node.into(),
            uri: uri.into(),
            transport,
            link: Mutex::new(LinkState::default()),
            handlers: RwLock::new(HandlerTable::new()),
            origin,
            policy: ReconnectPolicy::default(),
        }
    }

    /// Set the reconnect policy.
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Peer name.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Peer socket URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Get the underlying transport (for testing).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current link state.
    pub fn link_state(&self) -> LinkState {
        self.link.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Whether sends will currently be attempted.
    pub fn is_connected(&self) -> bool {
        self.link_state().is_connected() && self.transport.is_connected()
    }

    fn transition(&self, event: LinkEvent) -> LinkState {
        let mut link = self.link.lock().unwrap_or_else(|e| e.into_inner());
        *link = link.clone().on_event(event);
        link.clone()
    }

    /// Install the handler for `message_type`, replacing any earlier one.
    pub fn register_handler<F>(&self, message_type: MessageType, handler: F)
    where
        F: Fn(&Envelope) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let mut table = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if table.register(message_type, handler) {
            debug!("Replaced {} handler on spoke {}", message_type, self.node);
        }
    }

    /// Open the connection. A no-op if already connected.
    pub async fn connect(&self) -> Result<(), SpokeError> {
        if self.is_connected() {
            return Ok(());
        }

        self.transition(LinkEvent::ConnectRequested);
        match self.transport.connect(&self.uri).await {
            Ok(()) => {
                self.transition(LinkEvent::ConnectSucceeded);
                info!("Connected to {} at {}", self.node, self.uri);
                Ok(())
            }
            Err(e) => {
                self.transition(LinkEvent::ConnectFailed);
                warn!("Failed to connect to {} at {}: {}", self.node, self.uri, e);
                Err(e.into())
            }
        }
    }

    /// Close the connection.
    pub async fn disconnect(&self) {
        let was_connected = self.is_connected();
        self.transition(LinkEvent::DisconnectRequested);

        if let Err(e) = self.transport.close().await {
            debug!("Error closing link to {}: {}", self.node, e);
        }
        if was_connected {
            info!("Disconnected from {}", self.node);
        }
    }

    /// Send one envelope. A failure drops the link.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), SpokeError> {
        if !self.is_connected() {
            return Err(SpokeError::NotConnected);
        }

        let frame = envelope.to_json()?;
        if let Err(e) = self.transport.send(&frame).await {
            self.transition(LinkEvent::SendFailed);
            error!(
                "Failed to send {} to {}: {}",
                envelope.message_type(),
                self.node,
                e
            );
            return Err(e.into());
        }

        debug!("Sent {} to {}", envelope.message_type(), self.node);
        Ok(())
    }

    /// Send a state snapshot.
    pub async fn send_state_update(&self, data: Value) -> Result<(), SpokeError> {
        self.send(&self.origin.state_update(data)).await
    }

    /// Send a frequency synchronization.
    pub async fn send_frequency_sync(&self, frequency: f64, s_roi: f64) -> Result<(), SpokeError> {
        self.send(&self.origin.frequency_sync(frequency, s_roi)).await
    }

    /// Send a repository event.
    pub async fn send_repository_event(&self, event_type: &str, data: Value) -> Result<(), SpokeError> {
        self.send(&self.origin.repository_event(event_type, data)).await
    }

    /// Send a heartbeat.
    pub async fn send_heartbeat(&self) -> Result<(), SpokeError> {
        self.send(&self.origin.heartbeat()).await
    }

    /// Dispatch inbound frames until the connection closes or errors.
    pub async fn listen(&self) {
        loop {
            match self.transport.recv().await {
                Ok(frame) => {
                    self.handle_frame(&frame);
                }
                Err(TransportError::ConnectionClosed) => {
                    self.transition(LinkEvent::ConnectionLost);
                    info!("Connection to {} closed", self.node);
                    return;
                }
                Err(e) => {
                    self.transition(LinkEvent::ConnectionLost);
                    warn!("Connection to {} lost: {}", self.node, e);
                    return;
                }
            }
        }
    }

    /// Decode one frame and run its handler.
    ///
    /// Unhandled types are dropped quietly; sockets carry no mandatory
    /// default handler.
    pub fn handle_frame(&self, frame: &str) -> Option<Dispatch> {
        let envelope = match Envelope::from_json(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Dropping undecodable frame from {}: {}", self.node, e);
                return None;
            }
        };

        // Clone the handler out so the table lock is not held while it runs.
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(envelope.message_type());

        let outcome = match handler {
            Some(handler) => invoke(&handler, &envelope),
            None => Dispatch::Unhandled,
        };
        match &outcome {
            Dispatch::Handled => {}
            Dispatch::Unhandled => {
                debug!("No handler for {} from {}", envelope.message_type(), self.node);
            }
            Dispatch::Failed(e) => {
                error!(
                    "Handler for {} from {} failed: {}",
                    envelope.message_type(),
                    self.node,
                    e
                );
            }
        }
        Some(outcome)
    }

    /// Connect, listen, wait, retry. Returns only once `cancel` fires,
    /// after the connection has been released.
    pub async fn run_with_reconnect(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            if !self.is_connected() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    // Failures are logged by connect().
                    _ = self.connect() => {}
                }
            }

            if self.is_connected() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.listen() => {}
                }
            }

            let attempt = match self.link_state() {
                LinkState::Reconnecting { attempt } => attempt,
                _ => 1,
            };
            let delay = self.policy.delay_for(attempt);
            info!(
                "Reconnecting to {} in {:?} (attempt {})",
                self.node, delay, attempt
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.disconnect().await;
        debug!("Reconnect loop for {} stopped", self.node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn origin() -> Origin {
        Origin::new("BOLZANO_71", "resonance")
    }

    fn spoke() -> Spoke<MockTransport> {
        Spoke::new("nexus", "ws://nexus-node:8767", MockTransport::new(), origin())
    }

    // ===========================================
    // Connection Tests
    // ===========================================

    #[tokio::test]
    async fn connect_uses_registry_uri() {
        let spoke = spoke();
        spoke.connect().await.unwrap();

        assert!(spoke.is_connected());
        assert_eq!(
            spoke.transport().connected_address(),
            Some("ws://nexus-node:8767".to_string())
        );
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let spoke = spoke();
        spoke.connect().await.unwrap();
        spoke.connect().await.unwrap();
        assert_eq!(spoke.transport().connect_attempts(), 1);
    }

    #[tokio::test]
    async fn failed_connect_leaves_link_down() {
        let spoke = spoke();
        spoke.transport().fail_next_connect("connection refused");

        let result = spoke.connect().await;

        assert!(matches!(result, Err(SpokeError::Transport(_))));
        assert!(!spoke.is_connected());
        assert_eq!(spoke.link_state(), LinkState::Reconnecting { attempt: 1 });
    }

    #[tokio::test]
    async fn disconnect_closes_transport() {
        let spoke = spoke();
        spoke.connect().await.unwrap();

        spoke.disconnect().await;

        assert!(!spoke.is_connected());
        assert!(!spoke.transport().is_connected());
        assert_eq!(spoke.link_state(), LinkState::Disconnected);
    }

    // ===========================================
    // Send Tests
    // ===========================================

    #[tokio::test]
    async fn send_helpers_write_envelopes() {
        let spoke = spoke();
        spoke.connect().await.unwrap();

        spoke.send_state_update(json!({"frequency": 0.043})).await.unwrap();
        spoke.send_frequency_sync(0.043, 0.502).await.unwrap();
        spoke.send_repository_event("commit", json!({"sha": "abc"})).await.unwrap();
        spoke.send_heartbeat().await.unwrap();

        let types: Vec<_> = spoke
            .transport()
            .sent_frames()
            .iter()
            .map(|f| Envelope::from_json(f).unwrap().message_type())
            .collect();
        assert_eq!(
            types,
            vec![
                MessageType::StateUpdate,
                MessageType::FrequencySync,
                MessageType::RepositoryEvent,
                MessageType::Heartbeat,
            ]
        );
    }

    #[tokio::test]
    async fn send_while_disconnected_is_refused() {
        let spoke = spoke();
        let result = spoke.send_heartbeat().await;
        assert!(matches!(result, Err(SpokeError::NotConnected)));
        assert!(spoke.transport().sent_frames().is_empty());
    }

    #[tokio::test]
    async fn send_failure_drops_link() {
        let spoke = spoke();
        spoke.connect().await.unwrap();
        spoke.transport().fail_next_send("broken pipe");

        assert!(spoke.send_heartbeat().await.is_err());
        assert!(!spoke.is_connected());

        // Skipped until reconnected.
        assert!(matches!(
            spoke.send_heartbeat().await,
            Err(SpokeError::NotConnected)
        ));
    }

    // ===========================================
    // Listen / Dispatch Tests
    // ===========================================

    #[tokio::test]
    async fn listen_dispatches_to_registered_handler() {
        let spoke = spoke();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        spoke.register_handler(MessageType::FrequencySync, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        spoke.connect().await.unwrap();

        let peer = Origin::new("NEXUS", "resonance");
        spoke
            .transport()
            .queue_frame(peer.frequency_sync(0.05, 0.6).to_json().unwrap());
        spoke
            .transport()
            .queue_frame(peer.heartbeat().to_json().unwrap());
        spoke.transport().queue_frame("{not json");
        spoke.transport().close_remote();

        spoke.listen().await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!spoke.is_connected());
        assert_eq!(spoke.link_state(), LinkState::Reconnecting { attempt: 1 });
    }

    #[tokio::test]
    async fn handle_frame_reports_outcome() {
        let spoke = spoke();
        spoke.register_handler(MessageType::Heartbeat, |_| {
            Err(HandlerError::failed("nope"))
        });

        let hb = origin().heartbeat().to_json().unwrap();
        assert!(matches!(spoke.handle_frame(&hb), Some(Dispatch::Failed(_))));

        let ack = Envelope::ack(MessageType::Heartbeat).to_json().unwrap();
        assert_eq!(spoke.handle_frame(&ack), Some(Dispatch::Unhandled));

        assert_eq!(spoke.handle_frame(r#"{"type":"telepathy"}"#), None);
    }

    #[tokio::test]
    async fn handler_panic_does_not_stop_listening() {
        let spoke = spoke();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        spoke.register_handler(MessageType::Heartbeat, move |_| {
            if s.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first one explodes");
            }
            Ok(())
        });
        spoke.connect().await.unwrap();

        let hb = origin().heartbeat().to_json().unwrap();
        spoke.transport().queue_frame(hb.clone());
        spoke.transport().queue_frame(hb);
        spoke.transport().close_remote();

        spoke.listen().await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    // ===========================================
    // Reconnect Loop Tests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn reconnect_retries_after_fixed_delay() {
        let spoke = Arc::new(
            spoke().with_reconnect_policy(ReconnectPolicy::fixed(Duration::from_secs(5))),
        );
        spoke.transport().refuse_connections(true);
        let cancel = CancellationToken::new();

        let task = {
            let spoke = spoke.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { spoke.run_with_reconnect(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(spoke.transport().connect_attempts(), 1);

        tokio::time::sleep(Duration::from_millis(4800)).await;
        assert_eq!(spoke.transport().connect_attempts(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(spoke.transport().connect_attempts(), 2);

        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(spoke.transport().connect_attempts(), 12);

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(spoke.link_state(), LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_recovers_after_peer_drop() {
        let spoke = Arc::new(
            spoke().with_reconnect_policy(ReconnectPolicy::fixed(Duration::from_secs(5))),
        );
        let cancel = CancellationToken::new();

        let task = {
            let spoke = spoke.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { spoke.run_with_reconnect(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(spoke.is_connected());

        spoke.transport().close_remote();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!spoke.is_connected());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(spoke.is_connected());
        assert_eq!(spoke.transport().connect_attempts(), 2);

        cancel.cancel();
        task.await.unwrap();
        assert!(!spoke.transport().is_connected());
    }

    #[tokio::test]
    async fn cancellation_releases_connection() {
        let spoke = Arc::new(spoke());
        let cancel = CancellationToken::new();

        let task = {
            let spoke = spoke.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { spoke.run_with_reconnect(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(spoke.transport().is_connected());

        cancel.cancel();
        task.await.unwrap();

        assert!(!spoke.transport().is_connected());
        assert_eq!(spoke.link_state(), LinkState::Disconnected);
    }
}
