//! Scheduling side of fleetkeeper.
//!
//! - [`ClusterStatusTransition`] opens runs as `Running` and closes them with
//!   their final cluster status
//! - [`Bookkeeper`] watches unfinished runs, reaps orphaned operations and
//!   finishes runs whose operations are all terminal
//! - [`SummaryPublisher`] mirrors component statuses into the managed cluster
//!
//! # Example
//!
//! ```ignore
//! use fleetkeeper_scheduler::{stop_channel, Bookkeeper, BookkeeperConfig, ClusterStatusTransition};
//!
//! let transition = ClusterStatusTransition::new(inventory, repository);
//! let bookkeeper = Bookkeeper::new(transition, config.bookkeeper);
//! let (handle, signal) = stop_channel();
//! tokio::spawn(async move { bookkeeper.run(signal).await });
//! handle.stop();
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod bookkeeper;
pub mod config;
pub mod error;
pub mod publisher;
pub mod stop;
pub mod transition;

pub use bookkeeper::{Bookkeeper, TickReport};
pub use config::{AppConfig, BookkeeperConfig};
pub use error::{Error, Result};
pub use publisher::{
    Artifact, ArtifactTarget, ComponentSummary, InMemoryArtifactTarget, StatusPublisher, SummaryPublisher,
};
pub use stop::{stop_channel, StopHandle, StopSignal};
pub use transition::ClusterStatusTransition;
