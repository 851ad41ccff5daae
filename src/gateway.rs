//! Inbound gateway: validates that the required fields are present, stamps
//! a receive time, and forwards to the router's `/route_charge`.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::GatewayConfig;
use crate::error::GridError;

const REQUIRED_FIELDS: [&str; 3] = ["vehicle_id", "charge_amount", "priority"];

#[derive(Clone)]
pub struct GatewayState {
    pub config: GatewayConfig,
    http: Client,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            config,
            http: Client::builder().build()?,
        })
    }
}

/// Presence check only; the node validates types and ranges
pub fn check_required_fields(body: &Value) -> Result<(), GridError> {
    let obj = body
        .as_object()
        .ok_or_else(|| GridError::InvalidInput("No data provided".to_string()))?;
    for field in REQUIRED_FIELDS {
        if !obj.contains_key(field) {
            return Err(GridError::InvalidInput(format!(
                "Missing required field: {}",
                field
            )));
        }
    }
    Ok(())
}

async fn charge(
    State(state): State<GatewayState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, GridError> {
    let Json(mut body) =
        payload.map_err(|e| GridError::InvalidInput(format!("No data provided: {}", e)))?;
    check_required_fields(&body)?;

    if let Some(obj) = body.as_object_mut() {
        obj.insert("timestamp".to_string(), json!(Utc::now()));
    }
    info!("Received charge request for vehicle {}", body["vehicle_id"]);

    let response = state
        .http
        .post(format!("{}/route_charge", state.config.router_url))
        .timeout(state.config.forward_timeout)
        .json(&body)
        .send()
        .await
        .map_err(|e| {
            error!("Connection error to router: {}", e);
            GridError::UpstreamUnavailable("Router unavailable".to_string())
        })?;

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
    let bytes = response.bytes().await.map_err(|e| {
        error!("Failed reading router reply: {}", e);
        GridError::UpstreamUnavailable("Router unavailable".to_string())
    })?;

    if status.is_success() {
        info!("Charge request routed successfully");
    } else {
        error!("Router returned error: {}", status);
    }

    let mut reply = Response::new(Body::from(bytes));
    *reply.status_mut() = status;
    if let Some(ct) = content_type.and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok()) {
        reply.headers_mut().insert(header::CONTENT_TYPE, ct);
    }
    Ok(reply)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "healthy", "service": "gateway"}))
}

async fn status(State(state): State<GatewayState>) -> impl IntoResponse {
    let router_status = match state
        .http
        .get(format!("{}/health", state.config.router_url))
        .timeout(state.config.probe_timeout)
        .send()
        .await
    {
        Ok(r) if r.status().is_success() => "healthy",
        Ok(_) => "unhealthy",
        Err(_) => "unreachable",
    };

    Json(json!({
        "service": "gateway",
        "status": "running",
        "router_status": router_status,
        "timestamp": Utc::now(),
    }))
}

pub fn create_gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/charge", post(charge))
        .route("/health", get(health))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
