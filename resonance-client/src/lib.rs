//! # resonance-client
//!
//! Outbound socket links for the Resonance streaming pipeline.
//!
//! A node keeps one [`Spoke`] per peer in its registry. Each spoke owns a
//! [`Transport`], a connected flag driven by the link state machine in
//! `resonance-core`, and its own handler table for inbound frames.
//!
//! ## Features
//!
//! - **Transport Abstraction**: WebSocket, simulated, and mock transports
//! - **Reconnect Loop**: fixed delay, unbounded retries, cancel to exit
//! - **Isolated Dispatch**: a failing handler never ends the listen loop
//!
//! ## Example
//!
//! ```ignore
//! use resonance_client::{Spoke, WebSocketTransport};
//! use resonance_types::Origin;
//!
//! let spoke = Spoke::new(
//!     "nexus",
//!     "ws://nexus-node:8767",
//!     WebSocketTransport::default(),
//!     Origin::new("BOLZANO_71", "resonance"),
//! );
//! spoke.connect().await?;
//! spoke.send_heartbeat().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod spoke;
pub mod transport;

pub use spoke::{Spoke, SpokeError};
pub use transport::{
    MockFactory, MockTransport, SimulatedFactory, SimulatedTransport, Transport,
    TransportError, TransportFactory, WebSocketFactory, WebSocketTransport,
};
