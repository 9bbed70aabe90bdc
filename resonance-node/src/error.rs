//! Error types for resonance-node.

/// Main error type for node operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The hub could not bind its listening address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Envelope encode error.
    #[error("wire error: {0}")]
    Wire(#[from] resonance_types::WireError),

    /// Writing to a hub client failed.
    #[error("client send failed: {0}")]
    ClientSend(String),

    /// Bus error.
    #[error("bus error: {0}")]
    Bus(#[from] crate::bus::BusError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
