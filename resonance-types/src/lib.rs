//! # resonance-types
//!
//! Wire format types for the Resonance streaming pipeline.
//!
//! This crate provides the foundational types shared by every transport:
//! - [`Envelope`] - the typed message unit exchanged over the bus and sockets
//! - [`MessageType`] - the closed set of message kinds that drives dispatch
//! - [`Origin`] - stamps anchor, source and timestamp onto new envelopes
//! - [`ResonanceState`] - the state record a node broadcasts
//! - [`WireError`] - decode/encode failures
//!
//! The envelope is a JSON object tagged by its `type` field:
//!
//! ```json
//! {"type": "frequency_sync", "timestamp": "...", "anchor": "BOLZANO_71",
//!  "frequency": 0.043, "s_roi": 0.502}
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod messages;
mod state;

pub use envelope::{timestamp_now, Envelope, MessageType};
pub use error::WireError;
pub use messages::{
    Ack, ErrorReport, FrequencySync, Heartbeat, Origin, RepositoryEvent, SRoiUpdate, StateUpdate,
    DEFAULT_SOURCE, WELCOME_MESSAGE,
};
pub use state::ResonanceState;
