//! Authoritative load state for a single delivery node
//!
//! All mutable state (the load counter and the session map) lives behind one
//! mutex so that the capacity check and the insertion happen as one unit, and
//! so that reclamation never interleaves with an admission.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::session::{charge_duration, ChargeRequest, ChargingSession, Priority, JITTER_RANGE};
use crate::config::NodeConfig;
use crate::error::GridError;

/// Load residue below this magnitude is floating-point noise, not underflow
const LOAD_EPSILON: f64 = 1e-9;

/// Errors raised by a reclamation pass
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReclaimError {
    #[error("Load underflow by {deficit} after reclaiming {reclaimed} session(s); clamped to zero")]
    LoadUnderflow { deficit: f64, reclaimed: usize },
}

/// Successful admission, returned to the caller as-is
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub status: &'static str,
    pub session_id: String,
    pub node_id: String,
    pub vehicle_id: String,
    pub charge_amount: f64,
    pub estimated_duration: f64,
    pub start_time: DateTime<Utc>,
    pub current_load: f64,
    pub max_capacity: f64,
}

/// Outcome of one reclamation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReclaimReport {
    pub completed: Vec<String>,
    pub released: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub vehicle_id: String,
    pub charge_amount: f64,
    pub priority: Priority,
    pub remaining_time: f64,
}

/// Point-in-time view of the node
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub current_load: f64,
    pub max_capacity: f64,
    pub utilization_percent: f64,
    pub active_sessions: usize,
    pub available_capacity: f64,
    pub sessions: BTreeMap<String, SessionView>,
    pub timestamp: DateTime<Utc>,
}

/// Gauge values published on `/metrics`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSnapshot {
    pub current_load: f64,
    pub max_capacity: f64,
    pub active_sessions: usize,
    pub utilization_percent: f64,
}

#[derive(Debug, Default)]
struct LoadState {
    current_load: f64,
    sessions: BTreeMap<String, ChargingSession>,
}

/// Owned state of one delivery node
#[derive(Debug)]
pub struct NodeState {
    node_id: String,
    max_capacity: f64,
    processing_time_secs: f64,
    inner: Mutex<LoadState>,
    sequence: AtomicU64,
}

pub fn utilization_percent(current_load: f64, max_capacity: f64) -> f64 {
    if max_capacity > 0.0 {
        current_load / max_capacity * 100.0
    } else {
        0.0
    }
}

impl NodeState {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            node_id: config.node_id.clone(),
            max_capacity: f64::from(config.max_capacity),
            processing_time_secs: config.processing_time_secs as f64,
            inner: Mutex::new(LoadState::default()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn max_capacity(&self) -> f64 {
        self.max_capacity
    }

    /// Admit a request now, drawing a fresh jitter
    pub async fn admit(&self, request: ChargeRequest) -> Result<Admission, GridError> {
        let jitter = rand::thread_rng().gen_range(JITTER_RANGE);
        self.admit_at(request, Utc::now(), jitter).await
    }

    /// Admit a request with an explicit start time and jitter
    pub async fn admit_at(
        &self,
        request: ChargeRequest,
        start_time: DateTime<Utc>,
        jitter: f64,
    ) -> Result<Admission, GridError> {
        if !request.charge_amount.is_finite() || request.charge_amount <= 0.0 {
            return Err(GridError::InvalidInput(format!(
                "Invalid charge amount: {}",
                request.charge_amount
            )));
        }

        let mut state = self.inner.lock().await;

        if state.current_load + request.charge_amount > self.max_capacity {
            warn!(
                "Charge request rejected - would exceed capacity (current: {}, requested: {}, max: {})",
                state.current_load, request.charge_amount, self.max_capacity
            );
            return Err(GridError::CapacityExceeded {
                current_load: state.current_load,
                max_capacity: self.max_capacity,
                available_capacity: self.max_capacity - state.current_load,
            });
        }

        let duration = charge_duration(request.priority, self.processing_time_secs, jitter);
        let session_id = self.next_session_id(&request.vehicle_id, start_time);
        let session = ChargingSession::new(session_id.clone(), &request, start_time, duration)?;

        state.current_load += request.charge_amount;
        state.sessions.insert(session_id.clone(), session);

        info!(
            "Started charging session {} for vehicle {}, amount: {}, duration: {:.1}s, new load: {}",
            session_id, request.vehicle_id, request.charge_amount, duration, state.current_load
        );

        Ok(Admission {
            status: "accepted",
            session_id,
            node_id: self.node_id.clone(),
            vehicle_id: request.vehicle_id,
            charge_amount: request.charge_amount,
            estimated_duration: duration,
            start_time,
            current_load: state.current_load,
            max_capacity: self.max_capacity,
        })
    }

    fn next_session_id(&self, vehicle_id: &str, start_time: DateTime<Utc>) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}_{}_{}_{}",
            self.node_id,
            vehicle_id,
            start_time.timestamp_micros(),
            seq
        )
    }

    /// Reclaim every session whose end time has passed
    pub async fn reclaim(&self) -> Result<ReclaimReport, ReclaimError> {
        self.reclaim_at(Utc::now()).await
    }

    pub async fn reclaim_at(&self, now: DateTime<Utc>) -> Result<ReclaimReport, ReclaimError> {
        let mut state = self.inner.lock().await;

        let completed: Vec<String> = state
            .sessions
            .iter()
            .filter(|(_, s)| s.is_complete(now))
            .map(|(id, _)| id.clone())
            .collect();

        let mut report = ReclaimReport::default();
        for id in completed {
            if let Some(session) = state.sessions.remove(&id) {
                state.current_load -= session.charge_amount;
                report.released += session.charge_amount;
                info!(
                    "Charging completed for session {}, load reduced by {}",
                    id, session.charge_amount
                );
                report.completed.push(id);
            }
        }

        if state.current_load < 0.0 {
            let deficit = -state.current_load;
            state.current_load = 0.0;
            if deficit > LOAD_EPSILON {
                return Err(ReclaimError::LoadUnderflow {
                    deficit,
                    reclaimed: report.completed.len(),
                });
            }
        }

        Ok(report)
    }

    pub async fn current_load(&self) -> f64 {
        self.inner.lock().await.current_load
    }

    pub async fn snapshot(&self) -> LoadSnapshot {
        let state = self.inner.lock().await;
        LoadSnapshot {
            current_load: state.current_load,
            max_capacity: self.max_capacity,
            active_sessions: state.sessions.len(),
            utilization_percent: utilization_percent(state.current_load, self.max_capacity),
        }
    }

    pub async fn status(&self) -> NodeStatus {
        let state = self.inner.lock().await;
        let now = Utc::now();

        let sessions = state
            .sessions
            .iter()
            .map(|(id, s)| {
                (
                    id.clone(),
                    SessionView {
                        vehicle_id: s.vehicle_id.clone(),
                        charge_amount: s.charge_amount,
                        priority: s.priority,
                        remaining_time: s.remaining_secs(now),
                    },
                )
            })
            .collect();

        NodeStatus {
            node_id: self.node_id.clone(),
            current_load: state.current_load,
            max_capacity: self.max_capacity,
            utilization_percent: utilization_percent(state.current_load, self.max_capacity),
            active_sessions: state.sessions.len(),
            available_capacity: self.max_capacity - state.current_load,
            sessions,
            timestamp: now,
        }
    }

    /// Load must always equal the sum over active sessions
    #[cfg(test)]
    async fn conserved(&self) -> bool {
        let state = self.inner.lock().await;
        let sum: f64 = state.sessions.values().map(|s| s.charge_amount).sum();
        (state.current_load - sum).abs() < LOAD_EPSILON
    }

    #[cfg(test)]
    async fn force_load(&self, load: f64) {
        self.inner.lock().await.current_load = load;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use chrono::TimeDelta;

    use super::*;

    fn node(max_capacity: u32) -> NodeState {
        NodeState::new(&NodeConfig::new("node_test", max_capacity, 10))
    }

    fn req(vehicle: &str, amount: f64, priority: Priority) -> ChargeRequest {
        ChargeRequest::new(vehicle, amount, priority)
    }

    #[tokio::test]
    async fn test_admit_updates_load() {
        let node = node(100);
        let admission = node.admit(req("EV_1", 22.0, Priority::Normal)).await.unwrap();

        assert_eq!(admission.status, "accepted");
        assert_eq!(admission.node_id, "node_test");
        assert_eq!(admission.current_load, 22.0);
        assert_eq!(admission.max_capacity, 100.0);
        assert!(admission.session_id.starts_with("node_test_EV_1_"));
        assert!((8.0..=12.0).contains(&admission.estimated_duration));
        assert_eq!(node.current_load().await, 22.0);
    }

    #[tokio::test]
    async fn test_admission_boundary() {
        let node = node(100);
        node.admit(req("EV_1", 95.0, Priority::Normal)).await.unwrap();

        let err = node.admit(req("EV_2", 10.0, Priority::Normal)).await.unwrap_err();
        assert_eq!(
            err,
            GridError::CapacityExceeded {
                current_load: 95.0,
                max_capacity: 100.0,
                available_capacity: 5.0,
            }
        );
        assert_eq!(node.current_load().await, 95.0);
        assert_eq!(node.snapshot().await.active_sessions, 1);

        // Exactly filling the node is allowed
        node.admit(req("EV_3", 5.0, Priority::Normal)).await.unwrap();
        assert_eq!(node.current_load().await, 100.0);
    }

    #[tokio::test]
    async fn test_rejects_invalid_amount() {
        let node = node(100);
        for amount in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let result = node.admit(req("EV_1", amount, Priority::Normal)).await;
            assert!(matches!(result, Err(GridError::InvalidInput(_))));
        }
        assert_eq!(node.current_load().await, 0.0);
    }

    #[tokio::test]
    async fn test_duration_policy_applied() {
        let node = node(1000);
        let start = Utc::now();

        let high = node.admit_at(req("EV_1", 1.0, Priority::High), start, 0.8).await.unwrap();
        assert!((high.estimated_duration - 5.6).abs() < 1e-9);

        let low = node.admit_at(req("EV_2", 1.0, Priority::Low), start, 1.2).await.unwrap();
        assert!((low.estimated_duration - 15.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_random_durations_within_bounds() {
        let node = node(10_000);
        for i in 0..200 {
            let high = node.admit(req(&format!("H{}", i), 1.0, Priority::High)).await.unwrap();
            assert!((5.6 - 1e-9..=8.4 + 1e-9).contains(&high.estimated_duration));

            let low = node.admit(req(&format!("L{}", i), 1.0, Priority::Low)).await.unwrap();
            assert!((10.4 - 1e-9..=15.6 + 1e-9).contains(&low.estimated_duration));
        }
    }

    #[tokio::test]
    async fn test_reclaim_removes_expired_only() {
        let node = node(100);
        let start = Utc::now();
        let short = node.admit_at(req("EV_1", 10.0, Priority::High), start, 1.0).await.unwrap();
        node.admit_at(req("EV_2", 20.0, Priority::Low), start, 1.0).await.unwrap();

        // High priority finishes at +7s, low at +13s
        let report = node.reclaim_at(start + TimeDelta::seconds(8)).await.unwrap();
        assert_eq!(report.completed, vec![short.session_id]);
        assert_eq!(report.released, 10.0);
        assert_eq!(node.current_load().await, 20.0);
        assert!(node.conserved().await);
    }

    #[tokio::test]
    async fn test_reclaim_is_single_transition() {
        let node = node(100);
        let start = Utc::now();
        node.admit_at(req("EV_1", 30.0, Priority::Normal), start, 1.0).await.unwrap();
        node.admit_at(req("EV_2", 40.0, Priority::Normal), start, 1.0).await.unwrap();

        let later = start + TimeDelta::seconds(60);
        let first = node.reclaim_at(later).await.unwrap();
        assert_eq!(first.completed.len(), 2);
        assert_eq!(node.current_load().await, 0.0);

        let second = node.reclaim_at(later).await.unwrap();
        assert!(second.completed.is_empty());
        assert_eq!(second.released, 0.0);
        assert_eq!(node.current_load().await, 0.0);
    }

    #[tokio::test]
    async fn test_reclaim_at_exact_end_time() {
        let node = node(100);
        let start = Utc::now();
        node.admit_at(req("EV_1", 5.0, Priority::Normal), start, 1.0).await.unwrap();

        let report = node.reclaim_at(start + TimeDelta::seconds(10)).await.unwrap();
        assert_eq!(report.completed.len(), 1);
    }

    #[tokio::test]
    async fn test_underflow_is_clamped_and_reported() {
        let node = node(100);
        let start = Utc::now();
        node.admit_at(req("EV_1", 10.0, Priority::Normal), start, 1.0).await.unwrap();
        node.force_load(4.0).await;

        let err = node.reclaim_at(start + TimeDelta::seconds(60)).await.unwrap_err();
        assert_eq!(
            err,
            ReclaimError::LoadUnderflow {
                deficit: 6.0,
                reclaimed: 1
            }
        );
        assert_eq!(node.current_load().await, 0.0);
    }

    #[tokio::test]
    async fn test_float_residue_is_not_underflow() {
        let node = node(100);
        let start = Utc::now();
        for (i, amount) in [0.1, 0.2, 0.3, 0.7].iter().enumerate() {
            node.admit_at(req(&format!("EV_{}", i), *amount, Priority::Normal), start, 1.0)
                .await
                .unwrap();
        }
        node.reclaim_at(start + TimeDelta::seconds(60)).await.unwrap();
        assert!(node.current_load().await >= 0.0);
        assert!(node.current_load().await < LOAD_EPSILON);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admits_respect_capacity() {
        let node = Arc::new(node(100));

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let node = node.clone();
                tokio::spawn(async move {
                    let amount = [7.0, 11.0, 22.0, 50.0][i % 4];
                    node.admit(req(&format!("EV_{}", i), amount, Priority::Normal)).await
                })
            })
            .collect();

        let mut accepted = 0.0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(admission) => {
                    assert!(admission.current_load <= 100.0);
                    accepted += admission.charge_amount;
                }
                Err(GridError::CapacityExceeded { current_load, .. }) => {
                    assert!(current_load <= 100.0);
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert!(node.current_load().await <= 100.0);
        assert_eq!(node.current_load().await, accepted);
        assert!(node.conserved().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_vehicle_same_instant_gets_unique_ids() {
        let node = Arc::new(node(10_000));
        let start = Utc::now();

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let node = node.clone();
                tokio::spawn(async move {
                    node.admit_at(req("EV_SAME", 1.0, Priority::Normal), start, 1.0)
                        .await
                        .map(|a| a.session_id)
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().unwrap());
        }
        assert_eq!(ids.len(), 32);
        assert_eq!(node.snapshot().await.active_sessions, 32);
    }

    #[tokio::test]
    async fn test_status_reports_sessions() {
        let node = node(200);
        let admission = node.admit(req("EV_1", 50.0, Priority::High)).await.unwrap();

        let status = node.status().await;
        assert_eq!(status.node_id, "node_test");
        assert_eq!(status.current_load, 50.0);
        assert_eq!(status.utilization_percent, 25.0);
        assert_eq!(status.available_capacity, 150.0);
        assert_eq!(status.active_sessions, 1);

        let view = &status.sessions[&admission.session_id];
        assert_eq!(view.vehicle_id, "EV_1");
        assert!(view.remaining_time > 0.0 && view.remaining_time <= 8.4);
    }

    #[test]
    fn test_oversized_processing_time_is_rejected() {
        let node = NodeState::new(&NodeConfig::new("node_test", 100, 10_000_000_000_000));
        let err = tokio_test::assert_err!(tokio_test::block_on(
            node.admit(req("EV_1", 1.0, Priority::Low))
        ));
        assert_eq!(err.code(), "internal_error");

        // Nothing was admitted
        assert_eq!(tokio_test::block_on(node.current_load()), 0.0);
        assert_eq!(tokio_test::block_on(node.status()).active_sessions, 0);
    }

    #[test]
    fn test_utilization_zero_capacity() {
        assert_eq!(utilization_percent(10.0, 0.0), 0.0);
        assert_eq!(utilization_percent(25.0, 50.0), 50.0);
    }
}
