use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::{
    default_nodes, ConfigError, GatewayConfig, NodeConfig, NodeEndpoint, RouterConfig,
    DEFAULT_MAX_CAPACITY, DEFAULT_PROCESSING_TIME_SECS, GATEWAY_PORT, MAX_PROCESSING_TIME_SECS,
    NODE_PORT, ROUTER_PORT,
};
use crate::supervisor::SupervisorPolicy;

#[derive(Parser, Debug)]
#[command(name = "gridlink")]
#[command(about = "Route EV charging requests to the least-loaded delivery node")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to a .env file, loaded before env-backed options are read
    #[arg(long, value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a delivery node
    Node(NodeArgs),

    /// Run the least-loaded router
    Router(RouterArgs),

    /// Run the inbound request gateway
    Gateway(GatewayArgs),
}

/// Bind options shared by every component
#[derive(Args, Debug, Clone)]
pub struct BindArgs {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_addr: String,

    /// Port to listen on (default depends on the component)
    #[arg(short, long)]
    pub port: Option<u16>,
}

impl BindArgs {
    pub fn addr(&self, default_port: u16) -> String {
        format!("{}:{}", self.bind_addr, self.port.unwrap_or(default_port))
    }
}

#[derive(Args, Debug)]
pub struct NodeArgs {
    /// Identifier of this node
    #[arg(long, env = "NODE_ID")]
    pub node_id: Option<String>,

    /// Maximum concurrent charging load
    #[arg(long, env = "MAX_CAPACITY", default_value_t = DEFAULT_MAX_CAPACITY,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub max_capacity: u32,

    /// Base charge duration in seconds
    #[arg(long, env = "CHARGE_PROCESSING_TIME", default_value_t = DEFAULT_PROCESSING_TIME_SECS,
          value_parser = clap::value_parser!(u64).range(1..=MAX_PROCESSING_TIME_SECS))]
    pub processing_time: u64,

    /// How often finished sessions are reclaimed, in milliseconds
    #[arg(long, default_value = "2000", value_parser = clap::value_parser!(u64).range(1..))]
    pub reclaim_interval_ms: u64,

    #[command(flatten)]
    pub bind: BindArgs,
}

#[derive(Args, Debug)]
pub struct RouterArgs {
    /// Node to route to, as <node_id>=<url>; repeat for each node.
    /// Defaults to the compiled-in node list.
    #[arg(long = "node", value_name = "ID=URL")]
    pub nodes: Vec<String>,

    /// Seconds between poll rounds
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_secs: u64,

    /// Seconds to wait after a failed poll round
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_error_backoff_secs: u64,

    #[command(flatten)]
    pub bind: BindArgs,
}

#[derive(Args, Debug)]
pub struct GatewayArgs {
    /// Base URL of the router
    #[arg(long, env = "ROUTER_URL", default_value = "http://router:8080")]
    pub router_url: String,

    #[command(flatten)]
    pub bind: BindArgs,
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("NODE_ID is required (set --node-id or the NODE_ID environment variable)")]
    MissingNodeId,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ============================================================================
// SBIO: Pure conversion from parsed args to validated configuration
// ============================================================================

impl NodeArgs {
    pub fn to_config(&self) -> Result<NodeConfig, CliError> {
        let node_id = self
            .node_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(CliError::MissingNodeId)?;

        let reclaim = SupervisorPolicy::new(
            Duration::from_millis(self.reclaim_interval_ms),
            SupervisorPolicy::reclaimer().error_backoff,
        );
        Ok(NodeConfig::new(node_id, self.max_capacity, self.processing_time)
            .with_reclaim_policy(reclaim))
    }

    pub fn addr(&self) -> String {
        self.bind.addr(NODE_PORT)
    }
}

impl RouterArgs {
    pub fn to_config(&self) -> Result<RouterConfig, CliError> {
        let nodes = if self.nodes.is_empty() {
            default_nodes()
        } else {
            self.nodes
                .iter()
                .map(|spec| spec.parse::<NodeEndpoint>())
                .collect::<Result<Vec<_>, _>>()?
        };

        let policy = SupervisorPolicy::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.poll_error_backoff_secs),
        );
        Ok(RouterConfig::new(nodes)?.with_poll_policy(policy))
    }

    pub fn addr(&self) -> String {
        self.bind.addr(ROUTER_PORT)
    }
}

impl GatewayArgs {
    pub fn to_config(&self) -> GatewayConfig {
        GatewayConfig::new(&self.router_url)
    }

    pub fn addr(&self) -> String {
        self.bind.addr(GATEWAY_PORT)
    }
}
