use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use super::session::ChargeRequest;
use super::state::{LoadSnapshot, NodeState};
use crate::error::GridError;
use crate::metrics::{Exposition, EXPOSITION_CONTENT_TYPE};

/// Gauge the router reads to learn a node's load
pub const CURRENT_LOAD_METRIC: &str = "node_current_load";

/// Shared state for the node's HTTP handlers
#[derive(Clone)]
pub struct NodeAppState {
    pub node: Arc<NodeState>,
}

impl NodeAppState {
    pub fn new(node: Arc<NodeState>) -> Self {
        Self { node }
    }
}

/// Render the node's gauges in exposition format
pub fn render_node_metrics(snapshot: &LoadSnapshot) -> String {
    let mut exp = Exposition::new();
    exp.gauge(
        CURRENT_LOAD_METRIC,
        "Current charging load of the node",
        snapshot.current_load,
    )
    .gauge(
        "node_max_capacity",
        "Maximum capacity of the node",
        snapshot.max_capacity,
    )
    .gauge(
        "node_active_sessions",
        "Number of active charging sessions",
        snapshot.active_sessions as f64,
    )
    .describe(
        "node_utilization_percent",
        "Capacity utilization percentage",
        crate::metrics::MetricKind::Gauge,
    )
    .sample_fixed("node_utilization_percent", snapshot.utilization_percent, 2);
    exp.finish()
}

async fn charge(
    State(state): State<NodeAppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, GridError> {
    let Json(body) =
        payload.map_err(|e| GridError::InvalidInput(format!("No data provided: {}", e)))?;
    let request = ChargeRequest::from_json(&body)?;
    let admission = state.node.admit(request).await?;
    Ok(Json(admission))
}

async fn metrics(State(state): State<NodeAppState>) -> impl IntoResponse {
    let snapshot = state.node.snapshot().await;
    (
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        render_node_metrics(&snapshot),
    )
}

async fn status(State(state): State<NodeAppState>) -> impl IntoResponse {
    Json(state.node.status().await)
}

async fn health(State(state): State<NodeAppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "node_id": state.node.node_id(),
    }))
}

/// Create the node's Axum router
pub fn create_node_router(state: NodeAppState) -> Router {
    Router::new()
        .route("/charge", post(charge))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
