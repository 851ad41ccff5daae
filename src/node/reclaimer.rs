//! Background expiry of completed charging sessions

use std::sync::Arc;

use tracing::debug;

use super::state::NodeState;
use crate::supervisor::{spawn_supervised, SupervisorPolicy, TaskHandle};

/// Start the node's reclamation loop
pub fn spawn_reclaimer(state: Arc<NodeState>, policy: SupervisorPolicy) -> TaskHandle {
    spawn_supervised("reclaimer", policy, move || {
        let state = state.clone();
        async move {
            let report = state.reclaim().await?;
            if !report.completed.is_empty() {
                debug!(
                    "Reclaimed {} session(s), released {}",
                    report.completed.len(),
                    report.released
                );
            }
            Ok::<(), super::state::ReclaimError>(())
        }
    })
}
