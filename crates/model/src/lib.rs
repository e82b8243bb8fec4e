//! Typed entities for cluster reconciliation.
//!
//! This crate is the entity store of fleetkeeper:
//!
//! - **Entities**: [`ReconciliationEntity`], [`OperationEntity`],
//!   [`ClusterStatusEntity`] and the inventory's [`ClusterConfigEntity`]
//! - **State machine**: [`OperationState`] and its transition graph,
//!   [`ClusterStatus`]
//! - **Marshalling**: the [`DatabaseEntity`] contract converting entities to
//!   and from stored [`Row`]s, failing with [`UnmarshalError`]

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod cluster;
pub mod cluster_status;
pub mod error;
pub mod ids;
pub mod marshal;
pub mod operation;
pub mod reconciliation;
pub mod state;
pub mod timestamp;

// Re-export main types
pub use cluster::{ClusterConfig, ClusterConfigEntity, ClusterState, ComponentSpec, DEFAULT_NAMESPACE};
pub use cluster_status::ClusterStatusEntity;
pub use error::UnmarshalError;
pub use ids::{CorrelationId, LockToken, SchedulingId, StatusId};
pub use marshal::{DatabaseEntity, Row, RowReader, RowWriter};
pub use operation::OperationEntity;
pub use reconciliation::ReconciliationEntity;
pub use state::{ClusterStatus, OperationState};
