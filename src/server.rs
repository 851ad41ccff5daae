//! Component assembly: state, background task and HTTP app per process

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{NodeConfig, RouterConfig};
use crate::node::{create_node_router, spawn_reclaimer, NodeAppState, NodeState};
use crate::router::{
    create_routing_router, spawn_poller, ClientError, HttpNodeClient, NodeClient, Registry,
    RouterAppState,
};
use crate::supervisor::TaskHandle;

/// A running delivery node: its state, HTTP app and reclaimer
pub struct NodeService {
    pub state: Arc<NodeState>,
    pub app: Router,
    reclaimer: TaskHandle,
}

impl NodeService {
    /// Build the node and start its reclaimer. Must be called inside a
    /// tokio runtime.
    pub fn start(config: &NodeConfig) -> Self {
        let state = Arc::new(NodeState::new(config));
        let reclaimer = spawn_reclaimer(state.clone(), config.reclaim);
        let app = create_node_router(NodeAppState::new(state.clone()));

        info!(
            "Starting node {} with capacity {}",
            config.node_id, config.max_capacity
        );

        Self {
            state,
            app,
            reclaimer,
        }
    }

    pub async fn shutdown(self) {
        self.reclaimer.shutdown().await;
    }
}

/// A running router: registry, HTTP app and poller
pub struct RouterService {
    pub registry: Arc<Registry>,
    pub app: Router,
    poller: TaskHandle,
}

impl RouterService {
    pub fn start(config: &RouterConfig) -> Result<Self, ClientError> {
        let client: Arc<dyn NodeClient> = Arc::new(HttpNodeClient::new(
            config.probe_timeout,
            config.forward_timeout,
        )?);
        Ok(Self::start_with_client(config, client))
    }

    /// Start against any [`NodeClient`] implementation
    pub fn start_with_client(config: &RouterConfig, client: Arc<dyn NodeClient>) -> Self {
        let registry = Arc::new(Registry::new(&config.nodes));
        let poller = spawn_poller(registry.clone(), client.clone(), config.poll);
        let app = create_routing_router(RouterAppState::new(registry.clone(), client));

        info!("Starting router with {} node(s)", config.nodes.len());
        for node in &config.nodes {
            info!("  {} -> {}", node.node_id, node.endpoint);
        }

        Self {
            registry,
            app,
            poller,
        }
    }

    pub async fn shutdown(self) {
        self.poller.shutdown().await;
    }
}

/// Serve `app` on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on Ctrl-C
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
