//! Delivery node: admission control and charging-session lifecycle
//!
//! A node owns its load counter and session map ([`NodeState`]), serves
//! `/charge`, `/metrics`, `/status` and `/health`, and runs one supervised
//! reclamation loop that expires finished sessions.

pub mod handlers;
pub mod reclaimer;
pub mod session;
pub mod state;

pub use handlers::{create_node_router, render_node_metrics, NodeAppState, CURRENT_LOAD_METRIC};
pub use reclaimer::spawn_reclaimer;
pub use session::{charge_duration, ChargeRequest, ChargingSession, Priority};
pub use state::{Admission, LoadSnapshot, NodeState, NodeStatus, ReclaimError, ReclaimReport};
