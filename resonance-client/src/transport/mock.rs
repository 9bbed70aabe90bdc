//! Mock transport for testing.
//!
//! Allows queueing inbound frames and capturing sent frames for verification.

use super::{Transport, TransportError, TransportFactory};
use async_trait::async_trait;
use resonance_core::NodeEndpoint;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while a spoke owns
/// another. `recv()` waits for queued frames the way a socket would.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    wake: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connected_address: Option<String>,
    connect_attempts: usize,
    sent_frames: Vec<String>,
    receive_queue: VecDeque<String>,
    refuse_connections: bool,
    remote_closed: bool,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a frame to be returned by a `recv()` call.
    pub fn queue_frame(&self, frame: impl Into<String>) {
        self.lock().receive_queue.push_back(frame.into());
        self.wake.notify_waiters();
    }

    /// Get all frames that were sent.
    pub fn sent_frames(&self) -> Vec<String> {
        self.lock().sent_frames.clone()
    }

    /// Get the address that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        self.lock().connected_address.clone()
    }

    /// Number of `connect()` calls so far, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    /// Make every `connect()` fail until switched off again.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Simulate the peer hanging up; a pending `recv()` returns
    /// [`TransportError::ConnectionClosed`].
    pub fn close_remote(&self) {
        self.lock().remote_closed = true;
        self.wake.notify_waiters();
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Cause the next recv() to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        self.lock().fail_next_recv = Some(error.to_string());
        self.wake.notify_waiters();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            wake: Arc::clone(&self.wake),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.connect_attempts += 1;

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        if inner.refuse_connections {
            return Err(TransportError::ConnectionFailed(format!(
                "{address} refused connection"
            )));
        }

        inner.connected = true;
        inner.remote_closed = false;
        inner.connected_address = Some(address.to_string());
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent_frames.push(frame.to_string());
        Ok(())
    }

    async fn recv(&self) -> Result<String, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        loop {
            // Registered before the checks so no wake-up is lost.
            let woken = self.wake.notified();
            {
                let mut inner = self.lock();

                if let Some(error) = inner.fail_next_recv.take() {
                    return Err(TransportError::ReceiveFailed(error));
                }
                if let Some(frame) = inner.receive_queue.pop_front() {
                    return Ok(frame);
                }
                if inner.remote_closed || !inner.connected {
                    inner.connected = false;
                    return Err(TransportError::ConnectionClosed);
                }
            }
            woken.await;
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.lock().connected = false;
        self.wake.notify_waiters();
        Ok(())
    }
}

/// Hands out one shared [`MockTransport`] per node name.
///
/// Tests grab the same handle with [`MockFactory::transport`] to script
/// the peer or inspect what was sent.
#[derive(Debug, Default, Clone)]
pub struct MockFactory {
    transports: Arc<Mutex<HashMap<String, MockTransport>>>,
}

impl MockFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// The transport for `node`, created on first use.
    pub fn transport(&self, node: &str) -> MockTransport {
        self.transports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(node.to_string())
            .or_default()
            .clone()
    }

    /// Make `node` unreachable.
    pub fn unreachable(self, node: &str) -> Self {
        self.transport(node).refuse_connections(true);
        self
    }
}

impl TransportFactory for MockFactory {
    type Transport = MockTransport;

    fn create(&self, node: &str, _endpoint: &NodeEndpoint) -> Result<MockTransport, TransportError> {
        Ok(self.transport(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_connects() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        transport.connect("ws://nexus-node:8767").await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(
            transport.connected_address(),
            Some("ws://nexus-node:8767".to_string())
        );
    }

    #[tokio::test]
    async fn mock_transport_sends_frames() {
        let transport = MockTransport::new();
        transport.connect("peer").await.unwrap();

        transport.send("frame 1").await.unwrap();
        transport.send("frame 2").await.unwrap();

        assert_eq!(transport.sent_frames(), vec!["frame 1", "frame 2"]);
    }

    #[tokio::test]
    async fn mock_transport_receives_queued_frames() {
        let transport = MockTransport::new();
        transport.connect("peer").await.unwrap();

        transport.queue_frame("response 1");
        transport.queue_frame("response 2");

        assert_eq!(transport.recv().await.unwrap(), "response 1");
        assert_eq!(transport.recv().await.unwrap(), "response 2");
    }

    #[tokio::test]
    async fn recv_waits_for_a_frame() {
        let transport = MockTransport::new();
        transport.connect("peer").await.unwrap();

        let pending = {
            let t = transport.clone();
            tokio::spawn(async move { t.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        transport.queue_frame("late");
        assert_eq!(pending.await.unwrap().unwrap(), "late");
    }

    #[tokio::test]
    async fn remote_close_ends_recv() {
        let transport = MockTransport::new();
        transport.connect("peer").await.unwrap();

        let pending = {
            let t = transport.clone();
            tokio::spawn(async move { t.recv().await })
        };
        transport.close_remote();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn local_close_wakes_recv() {
        let transport = MockTransport::new();
        transport.connect("peer").await.unwrap();

        let pending = {
            let t = transport.clone();
            tokio::spawn(async move { t.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        transport.close().await.unwrap();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
    }

    // ===========================================
    // Error Condition Tests
    // ===========================================

    #[tokio::test]
    async fn send_without_connect_fails() {
        let transport = MockTransport::new();

        let result = transport.send("data").await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn recv_without_connect_fails() {
        let transport = MockTransport::new();

        let result = transport.recv().await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn forced_connect_failure() {
        let transport = MockTransport::new();
        transport.fail_next_connect("network unreachable");

        let result = transport.connect("peer").await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(!transport.is_connected());

        // Only the next one.
        transport.connect("peer").await.unwrap();
    }

    #[tokio::test]
    async fn refused_connections_keep_failing() {
        let transport = MockTransport::new();
        transport.refuse_connections(true);

        for _ in 0..3 {
            assert!(transport.connect("peer").await.is_err());
        }
        assert_eq!(transport.connect_attempts(), 3);

        transport.refuse_connections(false);
        transport.connect("peer").await.unwrap();
    }

    #[tokio::test]
    async fn forced_send_failure() {
        let transport = MockTransport::new();
        transport.connect("peer").await.unwrap();
        transport.fail_next_send("buffer full");

        let result = transport.send("data").await;
        assert!(matches!(result, Err(TransportError::SendFailed(_))));

        // Next send should work
        transport.send("data").await.unwrap();
    }

    #[tokio::test]
    async fn forced_recv_failure() {
        let transport = MockTransport::new();
        transport.connect("peer").await.unwrap();
        transport.queue_frame("data");
        transport.fail_next_recv("timeout");

        let result = transport.recv().await;
        assert!(matches!(result, Err(TransportError::ReceiveFailed(_))));

        // Next recv should work (and get the queued data)
        assert_eq!(transport.recv().await.unwrap(), "data");
    }

    // ===========================================
    // Clone and Factory Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_clone_shares_state() {
        let transport1 = MockTransport::new();
        let transport2 = transport1.clone();

        transport1.connect("peer").await.unwrap();
        assert!(transport2.is_connected());

        transport1.send("from t1").await.unwrap();
        transport2.send("from t2").await.unwrap();

        assert_eq!(transport1.sent_frames().len(), 2);
    }

    #[tokio::test]
    async fn factory_hands_out_shared_handles() {
        let factory = MockFactory::new().unreachable("lexamoris");
        let endpoint = NodeEndpoint::new("ws://lexamoris-node:8766", "resonance.lexamoris");

        let built = factory.create("lexamoris", &endpoint).unwrap();
        assert!(built.connect(&endpoint.websocket).await.is_err());
        assert_eq!(factory.transport("lexamoris").connect_attempts(), 1);

        let nexus = factory.create("nexus", &endpoint).unwrap();
        nexus.connect("ws://nexus-node:8767").await.unwrap();
        assert!(factory.transport("nexus").is_connected());
    }
}
