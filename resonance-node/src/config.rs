//! Configuration loading for resonance-node.
//!
//! Configuration is loaded from a TOML file given with `--config`.
//! Every section and field has a default, so an empty file is valid.

use resonance_core::{NodeEndpoint, NodeRegistry};
use resonance_types::{Origin, DEFAULT_SOURCE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::bus::OffsetReset;

/// Root configuration for a Resonance node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Message bus configuration.
    #[serde(default)]
    pub bus: BusConfig,
    /// Bus topic names.
    #[serde(default)]
    pub topics: TopicConfig,
    /// Socket hub and spoke configuration.
    #[serde(default)]
    pub socket: SocketConfig,
    /// Node identity and resonance parameters.
    #[serde(default)]
    pub resonance: ResonanceConfig,
    /// Peer registry (name → socket URI + topic).
    #[serde(default = "default_nodes")]
    pub nodes: NodeRegistry,
}

/// Which bus implementation backs the producer and consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// Process-local in-memory broker.
    Memory,
    /// Logging no-op.
    Simulated,
}

/// Message bus configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Backend (default: simulated).
    #[serde(default = "default_backend")]
    pub backend: BusBackend,
    /// Broker addresses (default: localhost:9092).
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: Vec<String>,
    /// Client identifier (default: resonance-node).
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Consumer group (default: resonance-group).
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Where a new consumer group starts reading (default: earliest).
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: OffsetReset,
    /// Bound on waiting for a publish acknowledgement (default: 10).
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Consumer poll timeout in milliseconds (default: 1000).
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Maximum messages handled per poll (default: 10).
    #[serde(default = "default_poll_batch")]
    pub poll_batch: usize,
    /// Pause between polls in milliseconds (default: 100).
    #[serde(default = "default_poll_idle_ms")]
    pub poll_idle_ms: u64,
}

/// Bus topic names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Untargeted repository events.
    #[serde(default = "default_outbound_topic")]
    pub outbound: String,
    /// Traffic addressed to this node.
    #[serde(default = "default_inbound_topic")]
    pub inbound: String,
    /// State snapshots, frequency syncs and heartbeats.
    #[serde(default = "default_state_sync_topic")]
    pub state_sync: String,
}

/// How the hub and spokes reach the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketMode {
    /// Real WebSocket listener and clients.
    Websocket,
    /// No sockets; log what would happen.
    Simulated,
}

/// Socket hub and spoke configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Transport mode (default: websocket).
    #[serde(default = "default_socket_mode")]
    pub mode: SocketMode,
    /// Hub listen host (default: 0.0.0.0).
    #[serde(default = "default_host")]
    pub host: String,
    /// Hub listen port (default: 8765).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keep-alive ping interval in seconds (default: 20).
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Grace period after a ping before a silent peer is dropped (default: 10).
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
    /// Delay between spoke reconnect attempts in seconds (default: 5).
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

/// Node identity and resonance parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResonanceConfig {
    /// Resonance frequency in Hz (default: 0.043).
    #[serde(default = "default_frequency")]
    pub frequency: f64,
    /// S-ROI threshold (default: 0.5020).
    #[serde(default = "default_s_roi_threshold")]
    pub s_roi_threshold: f64,
    /// This node's anchor identity (default: BOLZANO_71).
    #[serde(default = "default_anchor")]
    pub anchor: String,
    /// Source tag stamped on outgoing envelopes (default: resonance).
    #[serde(default = "default_source")]
    pub source: String,
    /// Seconds between sync cycles (default: 1.0).
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: f64,
}

// Default value functions
fn default_backend() -> BusBackend {
    BusBackend::Simulated
}

fn default_bootstrap_servers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_client_id() -> String {
    "resonance-node".to_string()
}

fn default_group_id() -> String {
    "resonance-group".to_string()
}

fn default_auto_offset_reset() -> OffsetReset {
    OffsetReset::Earliest
}

fn default_send_timeout_secs() -> u64 {
    10
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_poll_batch() -> usize {
    10
}

fn default_poll_idle_ms() -> u64 {
    100
}

fn default_outbound_topic() -> String {
    "resonance.outbound".to_string()
}

fn default_inbound_topic() -> String {
    "resonance.inbound".to_string()
}

fn default_state_sync_topic() -> String {
    "resonance.state.sync".to_string()
}

fn default_socket_mode() -> SocketMode {
    SocketMode::Websocket
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_ping_interval_secs() -> u64 {
    20
}

fn default_ping_timeout_secs() -> u64 {
    10
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_frequency() -> f64 {
    0.043
}

fn default_s_roi_threshold() -> f64 {
    0.5020
}

fn default_anchor() -> String {
    "BOLZANO_71".to_string()
}

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

fn default_sync_interval_secs() -> f64 {
    1.0
}

fn default_nodes() -> NodeRegistry {
    NodeRegistry::new()
        .with_node(
            "lexamoris",
            NodeEndpoint::new("ws://lexamoris-node:8766", "resonance.lexamoris"),
        )
        .with_node(
            "nexus",
            NodeEndpoint::new("ws://nexus-node:8767", "resonance.nexus"),
        )
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            bootstrap_servers: default_bootstrap_servers(),
            client_id: default_client_id(),
            group_id: default_group_id(),
            auto_offset_reset: default_auto_offset_reset(),
            send_timeout_secs: default_send_timeout_secs(),
            poll_timeout_ms: default_poll_timeout_ms(),
            poll_batch: default_poll_batch(),
            poll_idle_ms: default_poll_idle_ms(),
        }
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            outbound: default_outbound_topic(),
            inbound: default_inbound_topic(),
            state_sync: default_state_sync_topic(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            mode: default_socket_mode(),
            host: default_host(),
            port: default_port(),
            ping_interval_secs: default_ping_interval_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

impl Default for ResonanceConfig {
    fn default() -> Self {
        Self {
            frequency: default_frequency(),
            s_roi_threshold: default_s_roi_threshold(),
            anchor: default_anchor(),
            source: default_source(),
            sync_interval_secs: default_sync_interval_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            topics: TopicConfig::default(),
            socket: SocketConfig::default(),
            resonance: ResonanceConfig::default(),
            nodes: default_nodes(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Force the simulated bus and simulated sockets.
    pub fn simulated(mut self) -> Self {
        self.bus.backend = BusBackend::Simulated;
        self.socket.mode = SocketMode::Simulated;
        self
    }
}

impl BusConfig {
    /// Publish acknowledgement bound.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Consumer poll timeout.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Pause between polls.
    pub fn poll_idle(&self) -> Duration {
        Duration::from_millis(self.poll_idle_ms)
    }
}

impl SocketConfig {
    /// `host:port` for the hub listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Keep-alive ping interval.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Silence allowed before a connection is dropped.
    pub fn idle_limit(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.saturating_add(self.ping_timeout_secs))
    }

    /// Longest a single write to a hub connection may take (at least 1s).
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs.max(1))
    }

    /// Spoke reconnect delay.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl ResonanceConfig {
    /// Time between sync cycles. Falls back to one second if the
    /// configured value is negative or not finite.
    pub fn sync_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.sync_interval_secs).unwrap_or(Duration::from_secs(1))
    }

    /// Identity stamped on this node's envelopes.
    pub fn origin(&self) -> Origin {
        Origin::new(self.anchor.clone(), self.source.clone())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
