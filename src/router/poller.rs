//! Periodic load polling
//!
//! Each round scrapes every configured node concurrently and writes the
//! results into the registry. A failing node keeps its previous load; it is
//! neither retried within the round nor removed.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use super::client::NodeClient;
use super::registry::{Registry, RegistryError};
use crate::supervisor::{spawn_supervised, SupervisorPolicy, TaskHandle};

/// Outcome of one poll round
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollReport {
    pub updated: Vec<String>,
    pub failed: Vec<String>,
}

/// Poll every node once
pub async fn poll_round(
    registry: &Registry,
    client: &dyn NodeClient,
) -> Result<PollReport, RegistryError> {
    let nodes = registry.snapshot().await;
    let start = Instant::now();

    let probes = nodes.iter().map(|node| async move {
        let result = client.fetch_load(&node.endpoint).await;
        (node.node_id.as_str(), result)
    });
    let results = futures::future::join_all(probes).await;

    let mut report = PollReport::default();
    for (node_id, result) in results {
        match result {
            Ok(load) => {
                registry.record_load(node_id, load).await?;
                debug!("Updated {} load: {}", node_id, load);
                report.updated.push(node_id.to_string());
            }
            Err(e) => {
                let failures = registry.record_failure(node_id).await?;
                warn!(
                    "Error polling {} (consecutive failures: {}): {}",
                    node_id, failures, e
                );
                report.failed.push(node_id.to_string());
            }
        }
    }

    trace!(
        "Poll round finished in {}ms: {} updated, {} failed",
        start.elapsed().as_millis(),
        report.updated.len(),
        report.failed.len()
    );
    Ok(report)
}

/// Start the router's polling loop
pub fn spawn_poller(
    registry: Arc<Registry>,
    client: Arc<dyn NodeClient>,
    policy: SupervisorPolicy,
) -> TaskHandle {
    spawn_supervised("poller", policy, move || {
        let registry = registry.clone();
        let client = client.clone();
        async move {
            poll_round(&registry, client.as_ref()).await?;
            Ok::<(), RegistryError>(())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::config::NodeEndpoint;
    use crate::metrics::ExpositionError;
    use crate::router::client::{ClientError, NodeReply};

    /// Serves canned loads keyed by endpoint; missing endpoints fail
    struct FakeClient {
        loads: Mutex<HashMap<String, f64>>,
    }

    impl FakeClient {
        fn new(loads: &[(&str, f64)]) -> Self {
            Self {
                loads: Mutex::new(
                    loads
                        .iter()
                        .map(|(e, l)| (e.to_string(), *l))
                        .collect(),
                ),
            }
        }

        fn set(&self, endpoint: &str, load: Option<f64>) {
            let mut loads = self.loads.lock().unwrap();
            match load {
                Some(l) => loads.insert(endpoint.to_string(), l),
                None => loads.remove(endpoint),
            };
        }
    }

    #[async_trait]
    impl NodeClient for FakeClient {
        async fn fetch_load(&self, endpoint: &str) -> Result<f64, ClientError> {
            self.loads
                .lock()
                .unwrap()
                .get(endpoint)
                .copied()
                .ok_or_else(|| {
                    ClientError::Exposition(ExpositionError::MissingMetric(endpoint.to_string()))
                })
        }

        async fn forward_charge(&self, _: &str, _: &Value) -> Result<NodeReply, ClientError> {
            Err(ClientError::Status(500))
        }
    }

    fn registry() -> Registry {
        Registry::new(&[
            NodeEndpoint::new("A", "http://a").unwrap(),
            NodeEndpoint::new("B", "http://b").unwrap(),
            NodeEndpoint::new("C", "http://c").unwrap(),
        ])
    }

    #[tokio::test]
    async fn test_round_updates_all_nodes() {
        let registry = registry();
        let client = FakeClient::new(&[("http://a", 10.0), ("http://b", 5.0), ("http://c", 20.0)]);

        let report = poll_round(&registry, &client).await.unwrap();
        assert_eq!(report.updated, vec!["A", "B", "C"]);
        assert!(report.failed.is_empty());
        assert_eq!(registry.least_loaded().await.unwrap().node_id, "B");
    }

    #[tokio::test]
    async fn test_failed_node_keeps_previous_value() {
        let registry = registry();
        let client = FakeClient::new(&[("http://a", 10.0), ("http://b", 5.0), ("http://c", 20.0)]);
        poll_round(&registry, &client).await.unwrap();

        client.set("http://b", None);
        client.set("http://a", Some(50.0));
        let report = poll_round(&registry, &client).await.unwrap();
        assert_eq!(report.failed, vec!["B"]);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[0].last_known_load, 50.0);
        assert_eq!(snapshot[1].last_known_load, 5.0);
        assert_eq!(snapshot[1].consecutive_failures, 1);
        // Stale B still wins selection
        assert_eq!(registry.least_loaded().await.unwrap().node_id, "B");
    }

    #[tokio::test]
    async fn test_poller_task_refreshes_registry() {
        let registry = Arc::new(registry());
        let client = Arc::new(FakeClient::new(&[
            ("http://a", 3.0),
            ("http://b", 2.0),
            ("http://c", 1.0),
        ]));

        let policy = SupervisorPolicy::new(Duration::from_millis(10), Duration::from_millis(10));
        let handle = spawn_poller(registry.clone(), client.clone(), policy);

        for _ in 0..100 {
            if registry.least_loaded().await.unwrap().node_id == "C" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert_eq!(registry.least_loaded().await.unwrap().node_id, "C");
    }
}
