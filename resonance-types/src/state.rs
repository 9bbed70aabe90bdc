//! The state record a node owns and broadcasts.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::WireError;

/// Local resonance state.
///
/// Owned by the synchronizer; peers only ever see copies of it inside
/// `state_update` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResonanceState {
    /// Resonance frequency in Hz
    pub frequency: f64,
    /// Social Return on Integrity
    pub s_roi: f64,
    /// This node's identity
    pub anchor: String,
    /// Time of the last mutation
    pub last_update: DateTime<Utc>,
    /// Peers with a live socket connection, as of the last sync cycle
    pub connected_nodes: BTreeSet<String>,
}

impl ResonanceState {
    /// Create a fresh state with no connected peers.
    pub fn new(frequency: f64, s_roi: f64, anchor: impl Into<String>) -> Self {
        Self {
            frequency,
            s_roi,
            anchor: anchor.into(),
            last_update: Utc::now(),
            connected_nodes: BTreeSet::new(),
        }
    }

    /// The record as a JSON value, for the `data` field of a state update.
    pub fn to_value(&self) -> Result<serde_json::Value, WireError> {
        serde_json::to_value(self).map_err(WireError::Serialization)
    }
}
