//! The router's eventually-consistent view of node load

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::NodeEndpoint;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Node '{0}' is not in the registry")]
    UnknownNode(String),
}

/// One configured node and the last load it reported
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeEntry {
    pub node_id: String,
    pub endpoint: String,
    pub last_known_load: f64,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl NodeEntry {
    fn new(node: &NodeEndpoint) -> Self {
        Self {
            node_id: node.node_id.clone(),
            endpoint: node.endpoint.clone(),
            last_known_load: 0.0,
            last_polled_at: None,
            consecutive_failures: 0,
        }
    }
}

/// Fixed, ordered set of nodes. Entries are never added or removed after
/// construction; only the poller mutates their load.
#[derive(Debug)]
pub struct Registry {
    entries: RwLock<Vec<NodeEntry>>,
}

impl Registry {
    pub fn new(nodes: &[NodeEndpoint]) -> Self {
        Self {
            entries: RwLock::new(nodes.iter().map(NodeEntry::new).collect()),
        }
    }

    /// Record a successful poll
    pub async fn record_load(&self, node_id: &str, load: f64) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.node_id == node_id)
            .ok_or_else(|| RegistryError::UnknownNode(node_id.to_string()))?;
        entry.last_known_load = load;
        entry.last_polled_at = Some(Utc::now());
        entry.consecutive_failures = 0;
        Ok(())
    }

    /// Record a failed poll; the last known load is kept
    pub async fn record_failure(&self, node_id: &str) -> Result<u32, RegistryError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.node_id == node_id)
            .ok_or_else(|| RegistryError::UnknownNode(node_id.to_string()))?;
        entry.consecutive_failures += 1;
        Ok(entry.consecutive_failures)
    }

    /// The entry with the lowest last known load; ties go to the earliest
    /// entry in configuration order
    pub async fn least_loaded(&self) -> Option<NodeEntry> {
        let entries = self.entries.read().await;
        select_least_loaded(&entries).cloned()
    }

    pub async fn snapshot(&self) -> Vec<NodeEntry> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Pure selection over an ordered slice
pub fn select_least_loaded(entries: &[NodeEntry]) -> Option<&NodeEntry> {
    let mut best: Option<&NodeEntry> = None;
    for entry in entries {
        match best {
            Some(b) if entry.last_known_load >= b.last_known_load => {}
            _ => best = Some(entry),
        }
    }
    best
}
