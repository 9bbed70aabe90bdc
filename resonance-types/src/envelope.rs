//! Envelope - the wire format shared by the bus and the socket transports.

use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::messages::{
    Ack, ErrorReport, FrequencySync, Heartbeat, RepositoryEvent, SRoiUpdate, StateUpdate,
};
use crate::WireError;

/// Message type discriminator for envelope dispatch.
///
/// The set is closed; handlers match on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageType {
    /// Full state snapshot (or the hub's welcome frame)
    #[serde(rename = "state_update")]
    StateUpdate,
    /// Frequency and S-ROI pair
    #[serde(rename = "frequency_sync")]
    FrequencySync,
    /// Stand-alone S-ROI change
    #[serde(rename = "s_roi_update")]
    SRoiUpdate,
    /// Repository activity notification (commit, push, ...)
    #[serde(rename = "repository_event")]
    RepositoryEvent,
    /// Liveness beacon
    #[serde(rename = "heartbeat")]
    Heartbeat,
    /// Acknowledgement of a relayed frame
    #[serde(rename = "ack")]
    Ack,
    /// Error report sent back to a peer
    #[serde(rename = "error")]
    Error,
}

impl MessageType {
    /// Every message type, in wire-name order of declaration.
    pub const ALL: [MessageType; 7] = [
        MessageType::StateUpdate,
        MessageType::FrequencySync,
        MessageType::SRoiUpdate,
        MessageType::RepositoryEvent,
        MessageType::Heartbeat,
        MessageType::Ack,
        MessageType::Error,
    ];

    /// The wire name carried in the `type` field.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::StateUpdate => "state_update",
            MessageType::FrequencySync => "frequency_sync",
            MessageType::SRoiUpdate => "s_roi_update",
            MessageType::RepositoryEvent => "repository_event",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Ack => "ack",
            MessageType::Error => "error",
        }
    }

    /// Read the `type` field of an already parsed frame.
    ///
    /// Only the discriminator is checked; the other fields are left for
    /// whoever decodes or forwards the frame.
    pub fn of(frame: &serde_json::Value) -> Result<Self, WireError> {
        match frame.get("type") {
            Some(serde_json::Value::String(kind)) => kind.parse(),
            _ => Err(WireError::MissingType),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| WireError::UnknownType(s.to_string()))
    }
}

/// ISO-8601 UTC timestamp with microsecond precision.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The typed message unit exchanged on both transports.
///
/// Serialized as a JSON object whose `type` field selects the variant;
/// the remaining fields are the variant's payload. Envelopes are built
/// right before a send (see [`Origin`](crate::Origin)) and dropped after
/// dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// Full state snapshot
    #[serde(rename = "state_update")]
    StateUpdate(StateUpdate),
    /// Frequency synchronization
    #[serde(rename = "frequency_sync")]
    FrequencySync(FrequencySync),
    /// S-ROI update
    #[serde(rename = "s_roi_update")]
    SRoiUpdate(SRoiUpdate),
    /// Repository event
    #[serde(rename = "repository_event")]
    RepositoryEvent(RepositoryEvent),
    /// Heartbeat
    #[serde(rename = "heartbeat")]
    Heartbeat(Heartbeat),
    /// Acknowledgement
    #[serde(rename = "ack")]
    Ack(Ack),
    /// Error report
    #[serde(rename = "error")]
    Error(ErrorReport),
}

impl Envelope {
    /// Build an acknowledgement for a frame of the given type.
    pub fn ack(original_type: MessageType) -> Self {
        Envelope::Ack(Ack {
            original_type,
            timestamp: timestamp_now(),
        })
    }

    /// Build an error report.
    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Error(ErrorReport {
            message: message.into(),
        })
    }

    /// The discriminator of this envelope.
    pub fn message_type(&self) -> MessageType {
        match self {
            Envelope::StateUpdate(_) => MessageType::StateUpdate,
            Envelope::FrequencySync(_) => MessageType::FrequencySync,
            Envelope::SRoiUpdate(_) => MessageType::SRoiUpdate,
            Envelope::RepositoryEvent(_) => MessageType::RepositoryEvent,
            Envelope::Heartbeat(_) => MessageType::Heartbeat,
            Envelope::Ack(_) => MessageType::Ack,
            Envelope::Error(_) => MessageType::Error,
        }
    }

    /// The originating node named in the envelope, if any.
    ///
    /// Prefers `anchor`, falls back to `source`.
    pub fn origin(&self) -> Option<&str> {
        let (anchor, source) = match self {
            Envelope::StateUpdate(m) => (&m.anchor, &m.source),
            Envelope::FrequencySync(m) => (&m.anchor, &m.source),
            Envelope::SRoiUpdate(m) => (&m.anchor, &m.source),
            Envelope::RepositoryEvent(m) => (&m.anchor, &m.source),
            Envelope::Heartbeat(m) => (&m.anchor, &m.source),
            Envelope::Ack(_) | Envelope::Error(_) => return None,
        };
        anchor.as_deref().or(source.as_deref())
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Serialization)
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from a JSON string.
    ///
    /// Distinguishes invalid JSON, a missing `type`, an unknown `type`
    /// and a known type with bad fields, so callers can answer each
    /// differently.
    pub fn from_json(text: &str) -> Result<Self, WireError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(WireError::InvalidJson)?;

        let kind = MessageType::of(&value)?;

        serde_json::from_value(value).map_err(|source| WireError::Malformed {
            kind: kind.to_string(),
            source,
        })
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        Self::from_json(std::str::from_utf8(bytes)?)
    }
}
