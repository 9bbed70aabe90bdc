//! Transport abstraction for outbound peer links.
//!
//! A spoke talks to its peer through the [`Transport`] trait and never
//! touches a socket directly. Three implementations ship:
//! - [`WebSocketTransport`] - a real `ws://` client
//! - [`SimulatedTransport`] - connects instantly, logs sends, never receives
//! - [`MockTransport`] - in-memory, for tests
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` establishes a connection
//! - `send()` transmits one JSON text frame
//! - `recv()` waits for the next text frame
//! - `close()` gracefully terminates, waking any pending `recv()`
//!
//! `send()` and `recv()` may run concurrently on the same transport: the
//! spoke's listen loop sits in `recv()` while the sync loop sends.

mod mock;
mod simulated;
mod websocket;

pub use mock::{MockFactory, MockTransport};
pub use simulated::{SimulatedFactory, SimulatedTransport};
pub use websocket::{WebSocketFactory, WebSocketTransport};

use async_trait::async_trait;
use resonance_core::NodeEndpoint;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Transport trait for exchanging envelope frames with one peer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the peer at `address` (a socket URI).
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Send one text frame.
    async fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Receive the next text frame.
    ///
    /// Waits until a frame arrives or the connection closes.
    async fn recv(&self) -> Result<String, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Builds one transport per registry entry.
///
/// The synchronizer is generic over this so the same code runs against
/// real sockets, simulation, or mocks.
pub trait TransportFactory: Send + Sync {
    /// Transport produced by this factory.
    type Transport: Transport + 'static;

    /// Build a transport for peer `node`.
    fn create(
        &self,
        node: &str,
        endpoint: &NodeEndpoint,
    ) -> Result<Self::Transport, TransportError>;
}
