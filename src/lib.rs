//! # gridlink
//!
//! A small distributed charging grid. Delivery nodes admit EV charging
//! sessions against a fixed capacity; a router polls every node's load and
//! forwards each request to the least-loaded one; a gateway sits in front of
//! the router.
//!
//! ```text
//!   client ──► gateway ──► router ──► node_1 / node_2 / node_3
//!                            ▲  poll /metrics  │
//!                            └─────────────────┘
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod node;
pub mod router;
pub mod server;
pub mod supervisor;

pub use error::{GridError, GridResult};
