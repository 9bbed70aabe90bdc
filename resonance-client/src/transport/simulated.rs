//! Simulated transport.
//!
//! Stands in for a real socket when none should be opened: connecting
//! always succeeds, sends are logged and dropped, and nothing is ever
//! received.

use super::{Transport, TransportError, TransportFactory};
use async_trait::async_trait;
use resonance_core::NodeEndpoint;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Logging no-op transport for one peer.
#[derive(Debug)]
pub struct SimulatedTransport {
    node: String,
    connected: AtomicBool,
    closed: Notify,
}

impl SimulatedTransport {
    /// Simulated link to `node`.
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            connected: AtomicBool::new(false),
            closed: Notify::new(),
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        warn!("[SIMULATED] Would connect to {} at {}", self.node, address);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        debug!("[SIMULATED] Would send to {}: {}", self.node, frame);
        Ok(())
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let closed = self.closed.notified();
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        // No peer, so nothing arrives until the link is closed.
        closed.await;
        Err(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.notify_waiters();
        Ok(())
    }
}

/// Builds a [`SimulatedTransport`] for every peer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedFactory;

impl TransportFactory for SimulatedFactory {
    type Transport = SimulatedTransport;

    fn create(
        &self,
        node: &str,
        _endpoint: &NodeEndpoint,
    ) -> Result<SimulatedTransport, TransportError> {
        Ok(SimulatedTransport::new(node))
    }
}
