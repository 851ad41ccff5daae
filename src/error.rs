//! Request-path error taxonomy shared by the node, router and gateway.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced to HTTP callers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient capacity (current: {current_load}, max: {max_capacity})")]
    CapacityExceeded {
        current_load: f64,
        max_capacity: f64,
        available_capacity: f64,
    },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GridError {
    /// Machine-readable code carried in every error body
    pub fn code(&self) -> &'static str {
        match self {
            GridError::InvalidInput(_) => "invalid_input",
            GridError::CapacityExceeded { .. } => "capacity_exceeded",
            GridError::UpstreamUnavailable(_) => "upstream_unavailable",
            GridError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GridError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GridError::CapacityExceeded { .. } | GridError::UpstreamUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GridError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            GridError::CapacityExceeded {
                current_load,
                max_capacity,
                available_capacity,
            } => json!({
                "error": "Insufficient capacity",
                "code": self.code(),
                "current_load": current_load,
                "max_capacity": max_capacity,
                "available_capacity": available_capacity,
            }),
            other => json!({
                "error": other.to_string(),
                "code": other.code(),
            }),
        }
    }
}

impl IntoResponse for GridError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}

/// Result type for request handling
pub type GridResult<T> = Result<T, GridError>;
