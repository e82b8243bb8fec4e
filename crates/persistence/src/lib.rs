//! Persistence for fleetkeeper reconciliation.
//!
//! - **Repository**: [`ReconciliationRepository`] stores runs, their
//!   operations and the per-config-version run lock
//! - **Inventory**: [`Inventory`] stores versioned cluster configurations and
//!   their status history
//! - **Stores**: SurrealDB through [`StoreClient`], or the in-memory
//!   [`InMemoryStore`] shared by the in-memory implementations
//!
//! # Example
//!
//! ```ignore
//! use fleetkeeper_persistence::{StoreClient, StoreConfig, SurrealReconciliationRepository};
//!
//! let client = StoreClient::connect(StoreConfig::in_memory()).await?;
//! client.initialize_schema().await?;
//! let repository = SurrealReconciliationRepository::new(client);
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod client;
pub mod clock;
pub mod error;
pub mod filter;
pub mod inventory;
pub mod iter;
pub mod memory;
pub mod repository;

pub use client::{Credentials, StoreClient, StoreConfig};
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use error::{from_surrealdb_error, PersistenceError, PersistenceResult};
pub use filter::Filter;
pub use inventory::{InMemoryInventory, Inventory, SurrealInventory};
pub use iter::EntityIter;
pub use memory::InMemoryStore;
pub use repository::{
    FinishOutcome, InMemoryReconciliationRepository, OrphanReap, ReconciliationOptions,
    ReconciliationRepository, SurrealReconciliationRepository, MAX_UPDATE_ATTEMPTS,
};
