//! # resonance-node
//!
//! A Resonance node: socket hub, state synchronizer and bus consumer.
//!
//! This crate wires the pieces of one node together:
//! - Publishes state, frequency syncs, repository events and heartbeats
//!   through the message bus ([`Producer`])
//! - Polls inbound topics and dispatches by message type ([`Consumer`])
//! - Accepts peer sockets and relays their frames to each other ([`Hub`])
//! - Keeps one outbound spoke per registered peer ([`Synchronizer`])
//!
//! ## Architecture
//!
//! ```text
//!  Peer A ──┐                         ┌── Peer B
//!           │   ws (inbound)          │   ws (outbound spoke)
//!       ┌───┴─────────────────────────┴───┐
//!       │          resonance-node         │
//!       │  Hub ◀─┐          ┌─▶ Synchronizer
//!       │        └─ Pipeline ─┘       │   │
//!       │              │              ▼   │
//!       │           Consumer ◀── message bus
//!       └─────────────────────────────────┘
//! ```
//!
//! ## Degraded operation
//!
//! When the bus is unreachable the producer and consumer switch to
//! simulation mode, and `socket.mode = "simulated"` does the same for the
//! hub and spokes. Every operation still reports success and logs what it
//! would have done.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod config;
pub mod consumer;
pub mod error;
pub mod hub;
pub mod pipeline;
pub mod producer;
pub mod shutdown;
pub mod synchronizer;

pub use bus::{BusError, Delivery, InMemoryBus, MessageBus, SimulatedBus};
pub use config::{Config, ConfigError, SocketMode};
pub use consumer::Consumer;
pub use error::{NodeError, Result};
pub use hub::{ClientId, ClientSink, Hub, HubMetrics};
pub use pipeline::Pipeline;
pub use producer::{Producer, PublishError};
pub use shutdown::{run_until, wait_for_shutdown_signal};
pub use synchronizer::{FanoutReport, Synchronizer};
