//! Supervised background tasks
//!
//! Each component owns exactly one long-lived maintenance loop (the node's
//! reclaimer, the router's poller). The loop runs every iteration inside its
//! own spawned task so an error or a panic is contained to that iteration,
//! logged, and followed by the error backoff instead of the normal period.
//! The loop stops when [`TaskHandle::shutdown`] is called or the handle is
//! dropped.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Scheduling policy for a supervised loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorPolicy {
    /// Delay after a successful iteration
    pub period: Duration,
    /// Delay after a failed or panicked iteration
    pub error_backoff: Duration,
}

impl SupervisorPolicy {
    pub fn new(period: Duration, error_backoff: Duration) -> Self {
        Self {
            period,
            error_backoff,
        }
    }

    /// Node reclamation: every 2s, 5s after an error
    pub fn reclaimer() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(5))
    }

    /// Router polling: every 5s, 10s after an error
    pub fn poller() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(10))
    }

    pub fn next_delay(&self, outcome: &IterationOutcome) -> Duration {
        match outcome {
            IterationOutcome::Completed => self.period,
            IterationOutcome::Failed(_) | IterationOutcome::Panicked(_) => self.error_backoff,
        }
    }
}

/// Result of a single iteration, as seen by the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    Completed,
    Failed(String),
    Panicked(String),
}

/// Counters exposed for inspection
#[derive(Debug, Default)]
pub struct TaskStats {
    iterations: AtomicU64,
    failures: AtomicU64,
}

impl TaskStats {
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }
}

/// Owner handle for a supervised loop
pub struct TaskHandle {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<TaskStats>,
}

impl TaskHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stats(&self) -> Arc<TaskStats> {
        self.stats.clone()
    }

    /// Signal the loop to stop and wait until it has exited.
    /// An iteration already in flight runs to completion first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            error!("{} task ended abnormally: {}", self.name, e);
        }
    }
}

/// Spawn a supervised loop running `iteration` under `policy`.
/// The first iteration runs immediately.
pub fn spawn_supervised<F, Fut, E>(
    name: &'static str,
    policy: SupervisorPolicy,
    mut iteration: F,
) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let stats = Arc::new(TaskStats::default());
    let task_stats = stats.clone();

    let join = tokio::spawn(async move {
        info!(
            "{} started: period={:?}, error_backoff={:?}",
            name, policy.period, policy.error_backoff
        );

        loop {
            let outcome = match tokio::spawn(iteration()).await {
                Ok(Ok(())) => IterationOutcome::Completed,
                Ok(Err(e)) => IterationOutcome::Failed(e.to_string()),
                Err(e) => IterationOutcome::Panicked(e.to_string()),
            };

            task_stats.iterations.fetch_add(1, Ordering::SeqCst);
            match &outcome {
                IterationOutcome::Completed => debug!("{} iteration completed", name),
                IterationOutcome::Failed(e) => {
                    task_stats.failures.fetch_add(1, Ordering::SeqCst);
                    error!("Error in {} iteration: {}", name, e);
                }
                IterationOutcome::Panicked(e) => {
                    task_stats.failures.fetch_add(1, Ordering::SeqCst);
                    error!("{} iteration panicked: {}", name, e);
                }
            }

            let delay = policy.next_delay(&outcome);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => {
                    info!("{} shutting down", name);
                    break;
                }
            }
        }
    });

    TaskHandle {
        name,
        shutdown_tx,
        join,
        stats,
    }
}
