#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # fleetkeeper
//!
//! Bookkeeping for cluster reconciliation: runs and their per-component
//! operations, orphan reaping and the cluster status history.
//!
//! The daemon `fleetkeeperd` wires the SurrealDB-backed repository and
//! inventory into a [`fleetkeeper_scheduler::Bookkeeper`] and runs it until
//! SIGTERM or SIGINT.

pub mod cli;
pub mod daemon;

pub use fleetkeeper_persistence;
pub use fleetkeeper_scheduler;
