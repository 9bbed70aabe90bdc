//! Static peer table.
//!
//! Maps a node name to its socket URI and its bus topic. The table is
//! loaded once from configuration and never changes at runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Where a named peer can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoint {
    /// WebSocket URI (e.g. `ws://nexus-node:8767`)
    pub websocket: String,
    /// Bus topic targeted at this peer
    pub topic: String,
}

impl NodeEndpoint {
    /// Create an endpoint.
    pub fn new(websocket: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            websocket: websocket.into(),
            topic: topic.into(),
        }
    }
}

/// Name → endpoint map, iterated in name order.
///
/// Serializes as a plain table so it can sit under `[nodes]` in the
/// config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeRegistry {
    nodes: BTreeMap<String, NodeEndpoint>,
}

impl NodeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_node(mut self, name: impl Into<String>, endpoint: NodeEndpoint) -> Self {
        self.insert(name, endpoint);
        self
    }

    /// Add or replace a peer. Returns the previous endpoint, if any.
    pub fn insert(&mut self, name: impl Into<String>, endpoint: NodeEndpoint) -> Option<NodeEndpoint> {
        self.nodes.insert(name.into(), endpoint)
    }

    /// Endpoint for `name`.
    pub fn get(&self, name: &str) -> Option<&NodeEndpoint> {
        self.nodes.get(name)
    }

    /// Bus topic for `name`.
    pub fn topic_for(&self, name: &str) -> Option<&str> {
        self.nodes.get(name).map(|e| e.topic.as_str())
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// All entries, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &NodeEndpoint)> {
        self.nodes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of peers.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no peers are registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
