//! Per-type payloads carried inside an [`Envelope`].
//!
//! Optional fields are omitted from the JSON when absent so the wire stays
//! compatible with peers that send the minimal field set. A sender names
//! itself with `anchor`, `source` or both.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{timestamp_now, Envelope, MessageType};

/// Source tag stamped on envelopes when none is configured.
pub const DEFAULT_SOURCE: &str = "resonance";

/// Human-readable line in the hub's welcome frame.
pub const WELCOME_MESSAGE: &str = "Connected to Resonance node";

/// State snapshot, or the hub's welcome frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// ISO-8601 creation time
    pub timestamp: String,
    /// Originating node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    /// Originating subsystem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Full state record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Frequency (welcome frames only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    /// S-ROI (welcome frames only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s_roi: Option<f64>,
    /// Free-form note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Frequency synchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencySync {
    /// ISO-8601 creation time
    pub timestamp: String,
    /// Originating node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    /// Originating subsystem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Resonance frequency in Hz
    pub frequency: f64,
    /// Social Return on Integrity
    pub s_roi: f64,
}

/// Stand-alone S-ROI change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SRoiUpdate {
    /// ISO-8601 creation time
    pub timestamp: String,
    /// Originating node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    /// Originating subsystem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Social Return on Integrity
    pub s_roi: f64,
}

/// Repository activity notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryEvent {
    /// ISO-8601 creation time
    pub timestamp: String,
    /// Originating node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    /// Originating subsystem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Event kind (commit, push, ...)
    pub event_type: String,
    /// Event details
    #[serde(default)]
    pub data: Value,
}

/// Liveness beacon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// ISO-8601 creation time
    pub timestamp: String,
    /// Originating node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    /// Originating subsystem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Frequency (bus heartbeats)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    /// S-ROI (bus heartbeats)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s_roi: Option<f64>,
}

/// Acknowledgement of a relayed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    /// Type of the frame being acknowledged
    pub original_type: MessageType,
    /// ISO-8601 creation time
    pub timestamp: String,
}

/// Error report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// What went wrong
    pub message: String,
}

/// Identity of the sending node.
///
/// Every envelope constructor stamps the current time plus this node's
/// anchor and source, so callers only supply the semantic payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    anchor: String,
    source: String,
}

impl Origin {
    /// Create an origin from an anchor identity and a source tag.
    pub fn new(anchor: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            anchor: anchor.into(),
            source: source.into(),
        }
    }

    /// State snapshot carrying `data`.
    pub fn state_update(&self, data: Value) -> Envelope {
        Envelope::StateUpdate(StateUpdate {
            timestamp: timestamp_now(),
            anchor: Some(self.anchor.clone()),
            source: Some(self.source.clone()),
            data: Some(data),
            frequency: None,
            s_roi: None,
            message: None,
        })
    }

    /// Welcome frame sent by the hub to a newly registered client.
    pub fn welcome(&self, frequency: f64, s_roi: f64) -> Envelope {
        Envelope::StateUpdate(StateUpdate {
            timestamp: timestamp_now(),
            anchor: Some(self.anchor.clone()),
            source: None,
            data: None,
            frequency: Some(frequency),
            s_roi: Some(s_roi),
            message: Some(WELCOME_MESSAGE.to_string()),
        })
    }

    /// Frequency synchronization.
    pub fn frequency_sync(&self, frequency: f64, s_roi: f64) -> Envelope {
        Envelope::FrequencySync(FrequencySync {
            timestamp: timestamp_now(),
            anchor: Some(self.anchor.clone()),
            source: Some(self.source.clone()),
            frequency,
            s_roi,
        })
    }

    /// S-ROI update.
    pub fn s_roi_update(&self, s_roi: f64) -> Envelope {
        Envelope::SRoiUpdate(SRoiUpdate {
            timestamp: timestamp_now(),
            anchor: Some(self.anchor.clone()),
            source: Some(self.source.clone()),
            s_roi,
        })
    }

    /// Repository event.
    pub fn repository_event(&self, event_type: impl Into<String>, data: Value) -> Envelope {
        Envelope::RepositoryEvent(RepositoryEvent {
            timestamp: timestamp_now(),
            anchor: None,
            source: Some(self.source.clone()),
            event_type: event_type.into(),
            data,
        })
    }

    /// Bare heartbeat (socket transport).
    pub fn heartbeat(&self) -> Envelope {
        Envelope::Heartbeat(Heartbeat {
            timestamp: timestamp_now(),
            anchor: Some(self.anchor.clone()),
            source: Some(self.source.clone()),
            frequency: None,
            s_roi: None,
        })
    }

    /// Heartbeat carrying the node's frequency and S-ROI (bus transport).
    pub fn heartbeat_with_vitals(&self, frequency: f64, s_roi: f64) -> Envelope {
        Envelope::Heartbeat(Heartbeat {
            timestamp: timestamp_now(),
            anchor: Some(self.anchor.clone()),
            source: Some(self.source.clone()),
            frequency: Some(frequency),
            s_roi: Some(s_roi),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructors_stamp_identity() {
        let origin = Origin::new("BOLZANO_71", DEFAULT_SOURCE);

        match origin.frequency_sync(0.043, 0.502) {
            Envelope::FrequencySync(sync) => {
                assert_eq!(sync.anchor.as_deref(), Some("BOLZANO_71"));
                assert_eq!(sync.source.as_deref(), Some("resonance"));
                assert!(!sync.timestamp.is_empty());
            }
            other => panic!("unexpected envelope: {other:?}"),
        }

        match origin.repository_event("commit", json!({"sha": "abc"})) {
            Envelope::RepositoryEvent(event) => {
                assert_eq!(event.source.as_deref(), Some("resonance"));
                assert!(event.anchor.is_none());
                assert_eq!(event.event_type, "commit");
                assert_eq!(event.data["sha"], "abc");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn welcome_carries_configured_values() {
        let origin = Origin::new("BOLZANO_71", DEFAULT_SOURCE);
        let text = origin.welcome(0.043, 0.502).to_json().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "state_update");
        assert_eq!(value["frequency"], 0.043);
        assert_eq!(value["s_roi"], 0.502);
        assert_eq!(value["anchor"], "BOLZANO_71");
        assert_eq!(value["message"], WELCOME_MESSAGE);
        assert!(value.get("data").is_none());
    }

    #[test]
    fn bare_heartbeat_omits_vitals() {
        let origin = Origin::new("NEXUS", DEFAULT_SOURCE);
        let value: Value = serde_json::from_str(&origin.heartbeat().to_json().unwrap()).unwrap();
        assert!(value.get("frequency").is_none());
        assert!(value.get("s_roi").is_none());

        let value: Value =
            serde_json::from_str(&origin.heartbeat_with_vitals(1.0, 2.0).to_json().unwrap())
                .unwrap();
        assert_eq!(value["frequency"], 1.0);
        assert_eq!(value["s_roi"], 2.0);
    }

    #[test]
    fn repository_event_without_data_decodes_to_null() {
        let text = r#"{"type":"repository_event","timestamp":"t","source":"nexus","event_type":"push"}"#;
        match Envelope::from_json(text).unwrap() {
            Envelope::RepositoryEvent(event) => assert!(event.data.is_null()),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn source_alone_identifies_the_sender() {
        let text = r#"{"type":"heartbeat","timestamp":"t","source":"nexus"}"#;
        let envelope = Envelope::from_json(text).unwrap();
        match &envelope {
            Envelope::Heartbeat(hb) => {
                assert!(hb.anchor.is_none());
                assert_eq!(hb.source.as_deref(), Some("nexus"));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
        assert_eq!(envelope.origin(), Some("nexus"));

        let text = r#"{"type":"state_update","timestamp":"t","source":"nexus","data":{"k":1}}"#;
        match Envelope::from_json(text).unwrap() {
            Envelope::StateUpdate(update) => assert_eq!(update.data, Some(json!({"k": 1}))),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}
