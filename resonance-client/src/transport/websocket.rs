//! WebSocket transport (tokio-tungstenite).
//!
//! The stream is split on connect so a pending `recv()` never blocks a
//! `send()`. Each half sits behind its own async mutex.

use super::{Transport, TransportError, TransportFactory};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use resonance_core::NodeEndpoint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default bound on the opening handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket client transport.
pub struct WebSocketTransport {
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
    connected: AtomicBool,
    /// Cancelled by `close()` to wake a pending `recv()`; replaced on connect.
    closing: std::sync::Mutex<CancellationToken>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("connected", &self.is_connected())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WebSocketTransport {
    /// Create a disconnected transport.
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            sink: Mutex::new(None),
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
            closing: std::sync::Mutex::new(CancellationToken::new()),
            connect_timeout,
        }
    }

    fn closing(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.closing.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        // Release any reader still parked on a previous connection.
        self.closing().cancel();

        let (ws, _response) = tokio::time::timeout(self.connect_timeout, connect_async(address))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        *self.closing() = CancellationToken::new();
        self.connected.store(true, Ordering::SeqCst);

        debug!("websocket connected to {}", address);
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;

        sink.send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| {
                self.connected.store(false, Ordering::SeqCst);
                TransportError::SendFailed(e.to_string())
            })
    }

    async fn recv(&self) -> Result<String, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let closing = self.closing().clone();
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(TransportError::NotConnected)?;

        loop {
            let next = tokio::select! {
                _ = closing.cancelled() => return Err(TransportError::ConnectionClosed),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes)
                        .map_err(|e| TransportError::ReceiveFailed(e.to_string()));
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ConnectionClosed);
                }
                // Ping/pong are answered by tungstenite.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.closing().cancel();

        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!("websocket close handshake failed: {}", e);
            }
        }
        self.stream.lock().await.take();
        Ok(())
    }
}

/// Builds a [`WebSocketTransport`] for every peer.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketFactory {
    connect_timeout: Duration,
}

impl WebSocketFactory {
    /// Factory whose transports bound the handshake by `connect_timeout`.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketFactory {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl TransportFactory for WebSocketFactory {
    type Transport = WebSocketTransport;

    fn create(
        &self,
        _node: &str,
        _endpoint: &NodeEndpoint,
    ) -> Result<WebSocketTransport, TransportError> {
        Ok(WebSocketTransport::new(self.connect_timeout))
    }
}
