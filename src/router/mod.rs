//! Router: load aggregation and least-loaded selection
//!
//! The [`Registry`] is an eventually-consistent cache of node load, written
//! only by the poller and read by the routing handler. Routing always uses
//! the most recently polled snapshot, never a live value.

pub mod client;
pub mod handlers;
pub mod poller;
pub mod registry;

pub use client::{load_from_exposition, ClientError, HttpNodeClient, NodeClient, NodeReply};
pub use handlers::{create_routing_router, render_router_metrics, RouterAppState, ROUTED_BY};
pub use poller::{poll_round, spawn_poller, PollReport};
pub use registry::{select_least_loaded, NodeEntry, Registry, RegistryError};
