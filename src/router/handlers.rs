use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::client::{NodeClient, NodeReply};
use super::registry::Registry;
use crate::error::GridError;
use crate::metrics::{Exposition, MetricKind, EXPOSITION_CONTENT_TYPE};

/// Value written into `routed_by` on every routed reply
pub const ROUTED_BY: &str = "router";

/// Shared state for the router's HTTP handlers
#[derive(Clone)]
pub struct RouterAppState {
    pub registry: Arc<Registry>,
    pub client: Arc<dyn NodeClient>,
    pub requests_total: Arc<AtomicU64>,
}

impl RouterAppState {
    pub fn new(registry: Arc<Registry>, client: Arc<dyn NodeClient>) -> Self {
        Self {
            registry,
            client,
            requests_total: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Route a charge request to the least-loaded node.
/// A failure from the chosen node is surfaced unchanged; no other node is tried.
async fn route_charge(
    State(state): State<RouterAppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, GridError> {
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let Json(body) =
        payload.map_err(|e| GridError::InvalidInput(format!("No data provided: {}", e)))?;
    if !body.is_object() {
        return Err(GridError::InvalidInput("No data provided".to_string()));
    }

    let target = state
        .registry
        .least_loaded()
        .await
        .ok_or_else(|| GridError::Internal("No nodes configured".to_string()))?;

    info!(
        "Routing charge request to {} (load: {})",
        target.node_id, target.last_known_load
    );

    let reply = state
        .client
        .forward_charge(&target.endpoint, &body)
        .await
        .map_err(|e| {
            error!("Connection error to node {}: {}", target.node_id, e);
            GridError::UpstreamUnavailable(format!("Node {} unavailable", target.node_id))
        })?;

    if !reply.is_success() {
        error!("Node {} returned error: {}", target.node_id, reply.status);
        return Ok(passthrough(reply));
    }

    let mut result: Value = serde_json::from_slice(&reply.body).map_err(|e| {
        GridError::Internal(format!("Invalid reply from node {}: {}", target.node_id, e))
    })?;
    let obj = result.as_object_mut().ok_or_else(|| {
        GridError::Internal(format!("Invalid reply from node {}: not an object", target.node_id))
    })?;
    obj.insert("routed_by".to_string(), json!(ROUTED_BY));
    obj.insert("node_id".to_string(), json!(target.node_id));
    obj.insert("node_load_before".to_string(), json!(target.last_known_load));

    Ok(Json(result).into_response())
}

/// Rebuild a node's reply verbatim: status, content type and body
fn passthrough(reply: NodeReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(Body::from(reply.body));
    *response.status_mut() = status;
    if let Some(value) = reply
        .content_type
        .and_then(|ct| header::HeaderValue::from_str(&ct).ok())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

/// Render the router's metrics in exposition format
pub async fn render_router_metrics(state: &RouterAppState) -> String {
    let entries = state.registry.snapshot().await;

    let mut exp = Exposition::new();
    exp.describe(
        "router_requests_total",
        "Total charge requests received by the router",
        MetricKind::Counter,
    )
    .sample(
        "router_requests_total",
        state.requests_total.load(Ordering::Relaxed) as f64,
    );

    exp.describe("node_load", "Last polled load of each node", MetricKind::Gauge);
    for entry in &entries {
        exp.labeled_sample(
            "node_load",
            &[("node_id", entry.node_id.as_str())],
            entry.last_known_load,
        );
    }
    exp.finish()
}

async fn metrics(State(state): State<RouterAppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        render_router_metrics(&state).await,
    )
}

async fn status(State(state): State<RouterAppState>) -> impl IntoResponse {
    let entries = state.registry.snapshot().await;
    let node_loads: BTreeMap<_, _> = entries
        .iter()
        .map(|e| (e.node_id.clone(), e.last_known_load))
        .collect();

    Json(json!({
        "service": "router",
        "node_loads": node_loads,
        "nodes": entries,
        "timestamp": Utc::now(),
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "healthy", "service": "router"}))
}

/// Create the router's Axum router
pub fn create_routing_router(state: RouterAppState) -> Router {
    Router::new()
        .route("/route_charge", post(route_charge))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::{body::to_bytes, http::Request};
    use tower::ServiceExt;

    use super::*;
    use crate::config::NodeEndpoint;
    use crate::metrics::parse_exposition;
    use crate::router::client::ClientError;

    /// Records which endpoint was hit and answers with a canned reply
    struct ScriptedClient {
        reply: Option<NodeReply>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedClient {
        fn replying(status: u16, body: Value) -> Self {
            Self {
                reply: Some(NodeReply {
                    status,
                    content_type: Some("application/json".to_string()),
                    body: serde_json::to_vec(&body).unwrap(),
                }),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn unreachable() -> Self {
            Self {
                reply: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NodeClient for ScriptedClient {
        async fn fetch_load(&self, _: &str) -> Result<f64, ClientError> {
            Ok(0.0)
        }

        async fn forward_charge(&self, endpoint: &str, body: &Value) -> Result<NodeReply, ClientError> {
            self.calls
                .lock()
                .unwrap()
                .push((endpoint.to_string(), body.clone()));
            self.reply.clone().ok_or(ClientError::Status(0))
        }
    }

    async fn setup(client: ScriptedClient, loads: &[(&str, f64)]) -> (Router, Arc<ScriptedClient>, RouterAppState) {
        let nodes: Vec<_> = loads
            .iter()
            .map(|(id, _)| NodeEndpoint::new(*id, format!("http://{}", id)).unwrap())
            .collect();
        let registry = Arc::new(Registry::new(&nodes));
        for (id, load) in loads {
            registry.record_load(id, *load).await.unwrap();
        }
        let client = Arc::new(client);
        let state = RouterAppState::new(registry, client.clone());
        (create_routing_router(state.clone()), client, state)
    }

    fn route_request(body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/route_charge")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_routes_to_least_loaded_and_augments() {
        let client = ScriptedClient::replying(
            200,
            json!({"status": "accepted", "session_id": "s1", "node_id": "B"}),
        );
        let (app, client, _) = setup(client, &[("A", 10.0), ("B", 5.0), ("C", 20.0)]).await;

        let request = json!({"vehicle_id": "EV_1", "charge_amount": 7, "priority": "high"});
        let response = app.oneshot(route_request(&request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["routed_by"], ROUTED_BY);
        assert_eq!(body["node_id"], "B");
        assert_eq!(body["node_load_before"], 5.0);
        assert_eq!(body["session_id"], "s1");

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "http://B");
        assert_eq!(calls[0].1, request);
    }

    #[tokio::test]
    async fn test_tie_routes_to_first_node() {
        let client = ScriptedClient::replying(200, json!({"status": "accepted"}));
        let (app, client, _) = setup(client, &[("A", 0.0), ("B", 0.0), ("C", 0.0)]).await;

        let response = app
            .oneshot(route_request(&json!({"vehicle_id": "EV_1", "charge_amount": 1, "priority": "low"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(client.calls.lock().unwrap()[0].0, "http://A");
    }

    #[tokio::test]
    async fn test_node_rejection_passes_through_without_failover() {
        let rejection = json!({
            "error": "Insufficient capacity",
            "code": "capacity_exceeded",
            "current_load": 95.0,
            "max_capacity": 100.0,
            "available_capacity": 5.0
        });
        let client = ScriptedClient::replying(503, rejection.clone());
        let (app, client, _) = setup(client, &[("A", 1.0), ("B", 2.0)]).await;

        let response = app
            .oneshot(route_request(&json!({"vehicle_id": "EV_1", "charge_amount": 10, "priority": "normal"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, rejection);

        // Exactly one attempt, on the selected node
        assert_eq!(client.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_node_is_upstream_unavailable() {
        let (app, _, _) = setup(ScriptedClient::unreachable(), &[("A", 0.0)]).await;

        let response = app
            .oneshot(route_request(&json!({"vehicle_id": "EV_1", "charge_amount": 10, "priority": "normal"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "upstream_unavailable");
    }

    #[tokio::test]
    async fn test_non_object_body_rejected() {
        let (app, client, _) = setup(ScriptedClient::unreachable(), &[("A", 0.0)]).await;
        let response = app.oneshot(route_request(&json!([1, 2, 3]))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_lists_every_node_and_counts_requests() {
        let client = ScriptedClient::replying(200, json!({"status": "accepted"}));
        let (app, _, state) = setup(client, &[("A", 4.0), ("B", 9.5)]).await;

        for _ in 0..3 {
            app.clone()
                .oneshot(route_request(&json!({"vehicle_id": "EV", "charge_amount": 1, "priority": "low"})))
                .await
                .unwrap();
        }

        let text = render_router_metrics(&state).await;
        let samples = parse_exposition(&text).unwrap();

        let total = samples.iter().find(|s| s.name == "router_requests_total").unwrap();
        assert_eq!(total.value, 3.0);

        let loads: Vec<_> = samples
            .iter()
            .filter(|s| s.name == "node_load")
            .map(|s| (s.label("node_id").unwrap().to_string(), s.value))
            .collect();
        assert_eq!(loads, vec![("A".to_string(), 4.0), ("B".to_string(), 9.5)]);
    }

    #[tokio::test]
    async fn test_status_shape() {
        let (app, _, _) = setup(ScriptedClient::unreachable(), &[("A", 3.0), ("B", 1.0)]).await;
        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["service"], "router");
        assert_eq!(body["node_loads"], json!({"A": 3.0, "B": 1.0}));
        assert_eq!(body["nodes"].as_array().unwrap().len(), 2);
        assert!(body["timestamp"].is_string());
    }
}
