//! Rollcall Simulation
//!
//! Stand-ins for the collaborators a rollcall peer relies on but does not
//! implement: a session layer that announces arrivals and departures, and a
//! transport that delivers envelopes eventually and in no particular order.
//!
//! # Architecture
//!
//! - **Mesh**: every peer in one process, stepped deterministically. Delivery
//!   order across records is shuffled from a seed, so any interleaving seen
//!   in a failure can be replayed.
//! - **Workload**: seeded random joins, departures, toggles and deliveries.
//! - **Cluster**: one tokio task per peer with its own inbox, envelopes
//!   routed as JSON, for exercising the protocol under real concurrency.
//!
//! # Usage
//!
//! ```
//! use rollcall_core::RosterConfig;
//! use rollcall_sim::Mesh;
//!
//! let mut mesh = Mesh::new(RosterConfig::with_capacity(4), 7, true);
//! let host = mesh.join();
//! let guest = mesh.join();
//! mesh.settle().unwrap();
//!
//! mesh.toggle(guest);
//! mesh.settle().unwrap();
//!
//! assert!(mesh.converged());
//! assert!(mesh.peer(host).unwrap().roster().contains(guest));
//! ```

mod config;
mod error;
mod mesh;
mod runtime;
mod workload;

pub use config::SimConfig;
pub use error::{InvariantViolation, Result, SimError};
pub use mesh::{Delivery, Mesh};
pub use runtime::{Cluster, Command};
pub use workload::{Action, Workload};
