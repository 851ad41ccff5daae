//! HTTP client for talking to delivery nodes
//!
//! The router only needs two things from a node: its current load (scraped
//! from `/metrics`) and the ability to forward a charge request. Both sit
//! behind [`NodeClient`] so routing and polling can be tested without sockets.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::Value;
use thiserror::Error;

use crate::metrics::{find_value, parse_exposition, ExpositionError};
use crate::node::CURRENT_LOAD_METRIC;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Node returned HTTP {0}")]
    Status(u16),

    #[error("Bad metrics: {0}")]
    Exposition(#[from] ExpositionError),

    #[error("Reported load {0} is not a finite non-negative number")]
    InvalidLoad(f64),
}

/// A node's raw reply to a forwarded charge request
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl NodeReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Current load as published on the node's `/metrics`
    async fn fetch_load(&self, endpoint: &str) -> Result<f64, ClientError>;

    /// Forward a charge body verbatim to `POST {endpoint}/charge`
    async fn forward_charge(&self, endpoint: &str, body: &Value) -> Result<NodeReply, ClientError>;
}

// ============================================================================
// SBIO: Pure parsing of the metrics reply
// ============================================================================

/// Extract the current load gauge from exposition text
pub fn load_from_exposition(text: &str) -> Result<f64, ClientError> {
    let samples = parse_exposition(text)?;
    let load = find_value(&samples, CURRENT_LOAD_METRIC)?;
    if !load.is_finite() || load < 0.0 {
        return Err(ClientError::InvalidLoad(load));
    }
    Ok(load)
}

// ============================================================================
// SBIO: reqwest-backed implementation
// ============================================================================

pub struct HttpNodeClient {
    http: Client,
    probe_timeout: Duration,
    forward_timeout: Duration,
}

impl HttpNodeClient {
    pub fn new(probe_timeout: Duration, forward_timeout: Duration) -> Result<Self, ClientError> {
        let http = Client::builder().build()?;
        Ok(Self {
            http,
            probe_timeout,
            forward_timeout,
        })
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn fetch_load(&self, endpoint: &str) -> Result<f64, ClientError> {
        let response = self
            .http
            .get(format!("{}/metrics", endpoint))
            .timeout(self.probe_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Status(response.status().as_u16()));
        }

        let text = response.text().await?;
        load_from_exposition(&text)
    }

    async fn forward_charge(&self, endpoint: &str, body: &Value) -> Result<NodeReply, ClientError> {
        let response = self
            .http
            .post(format!("{}/charge", endpoint))
            .timeout(self.forward_timeout)
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();

        Ok(NodeReply {
            status,
            content_type,
            body,
        })
    }
}
