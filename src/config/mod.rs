//! Runtime configuration for the node, router and gateway
//!
//! Values arrive through CLI flags backed by environment variables (see
//! [`crate::cli`]); this module holds the validated shapes and the
//! compiled-in node list the router starts from.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::supervisor::SupervisorPolicy;

/// Default node capacity
pub const DEFAULT_MAX_CAPACITY: u32 = 100;

/// Default base charge time in seconds
pub const DEFAULT_PROCESSING_TIME_SECS: u64 = 10;

/// Upper bound accepted for the base charge duration (one day)
pub const MAX_PROCESSING_TIME_SECS: u64 = 86_400;

/// Default ports per component
pub const NODE_PORT: u16 = 8001;
pub const ROUTER_PORT: u16 = 8080;
pub const GATEWAY_PORT: u16 = 8000;

/// Timeout callers put on forwarded charge requests
pub const FORWARD_TIMEOUT_SECS: u64 = 30;

/// Timeout on a single metrics or health probe
pub const PROBE_TIMEOUT_SECS: u64 = 5;

/// Compiled-in node set consulted by the router
pub const DEFAULT_NODES: &[(&str, &str)] = &[
    ("node_1", "http://node_1:8001"),
    ("node_2", "http://node_2:8001"),
    ("node_3", "http://node_3:8001"),
];

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Node list is empty")]
    NoNodes,

    #[error("Duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("Invalid node spec '{0}': expected <node_id>=<url>")]
    InvalidNodeSpec(String),

    #[error("Invalid endpoint '{0}': must start with http:// or https://")]
    InvalidEndpoint(String),
}

/// One routable node: its id and base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEndpoint {
    pub node_id: String,
    pub endpoint: String,
}

impl NodeEndpoint {
    pub fn new(node_id: impl Into<String>, endpoint: impl Into<String>) -> Result<Self, ConfigError> {
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidEndpoint(endpoint));
        }
        Ok(Self {
            node_id: node_id.into(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

impl FromStr for NodeEndpoint {
    type Err = ConfigError;

    /// Parse `node_id=url`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, url) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidNodeSpec(s.to_string()))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(ConfigError::InvalidNodeSpec(s.to_string()));
        }
        NodeEndpoint::new(id, url.trim())
    }
}

/// The compiled-in node list
pub fn default_nodes() -> Vec<NodeEndpoint> {
    DEFAULT_NODES
        .iter()
        .map(|(id, url)| NodeEndpoint {
            node_id: id.to_string(),
            endpoint: url.to_string(),
        })
        .collect()
}

/// Delivery node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub max_capacity: u32,
    pub processing_time_secs: u64,
    pub reclaim: SupervisorPolicy,
}

impl NodeConfig {
    pub fn new(node_id: impl Into<String>, max_capacity: u32, processing_time_secs: u64) -> Self {
        Self {
            node_id: node_id.into(),
            max_capacity,
            processing_time_secs,
            reclaim: SupervisorPolicy::reclaimer(),
        }
    }

    pub fn with_reclaim_policy(mut self, policy: SupervisorPolicy) -> Self {
        self.reclaim = policy;
        self
    }
}

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub nodes: Vec<NodeEndpoint>,
    pub poll: SupervisorPolicy,
    pub probe_timeout: Duration,
    pub forward_timeout: Duration,
}

impl RouterConfig {
    /// Build from a fixed node list, rejecting empty or duplicate sets
    pub fn new(nodes: Vec<NodeEndpoint>) -> Result<Self, ConfigError> {
        if nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }
        let mut seen = HashSet::new();
        for node in &nodes {
            if !seen.insert(node.node_id.as_str()) {
                return Err(ConfigError::DuplicateNode(node.node_id.clone()));
            }
        }
        Ok(Self {
            nodes,
            poll: SupervisorPolicy::poller(),
            probe_timeout: Duration::from_secs(PROBE_TIMEOUT_SECS),
            forward_timeout: Duration::from_secs(FORWARD_TIMEOUT_SECS),
        })
    }

    pub fn with_poll_policy(mut self, policy: SupervisorPolicy) -> Self {
        self.poll = policy;
        self
    }
}

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub router_url: String,
    pub forward_timeout: Duration,
    pub probe_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(router_url: impl Into<String>) -> Self {
        Self {
            router_url: router_url.into().trim_end_matches('/').to_string(),
            forward_timeout: Duration::from_secs(FORWARD_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(PROBE_TIMEOUT_SECS),
        }
    }
}
