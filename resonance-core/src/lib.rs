//! # resonance-core
//!
//! Pure logic for the Resonance pipeline (no I/O, instant tests).
//!
//! This crate holds the decisions the pipeline makes, without any network
//! or clock-driven I/O:
//! - [`HandlerTable`] - message-type keyed dispatch with panic isolation
//! - [`StatePatch`] - partial state updates and the merge rule
//! - [`LinkState`] - per-peer connection lifecycle
//! - [`NodeRegistry`] - the static peer table (name → socket URI + topic)
//!
//! The transports in `resonance-client` and `resonance-node` interpret
//! these values and perform the actual I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatch;
pub mod link;
pub mod registry;
pub mod state;

pub use dispatch::{Dispatch, Handler, HandlerError, HandlerTable};
pub use link::{LinkEvent, LinkState, ReconnectPolicy, DEFAULT_RECONNECT_DELAY};
pub use registry::{NodeEndpoint, NodeRegistry};
pub use state::StatePatch;
