//! Error types for the wire format.

use thiserror::Error;

/// Errors produced while encoding or decoding an [`Envelope`](crate::Envelope).
///
/// Decoding fails closed: every malformed input maps to one of these
/// variants, never to a panic.
#[derive(Debug, Error)]
pub enum WireError {
    /// Envelope could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Input is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// Input is not valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// JSON object has no string `type` field.
    #[error("message has no type field")]
    MissingType,

    /// `type` names a message kind this node does not know.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// `type` is known but the payload fields do not match it.
    #[error("malformed {kind} message: {source}")]
    Malformed {
        /// The message type named by the payload.
        kind: String,
        /// Underlying field error.
        #[source]
        source: serde_json::Error,
    },
}
