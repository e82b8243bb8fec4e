//! Cluster inventory: versioned desired configurations and status history.
//!
//! Every change of a cluster's desired configuration gets a new config
//! version from one global, monotonic sequence. Status rows are appended per
//! config version; the latest row is the current status.

mod memory;
mod surreal;

use async_trait::async_trait;
use fleetkeeper_model::{ClusterConfig, ClusterState, ClusterStatusEntity, DatabaseEntity, Row};
use serde_json::Value;

use crate::error::{PersistenceError, PersistenceResult};

pub use memory::InMemoryInventory;
pub use surreal::SurrealInventory;

/// Source of cluster configurations consumed by the scheduler.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Store `config`; a new config version is created only if it changed.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::InvalidInput`] for an empty runtime id.
    async fn create_or_update(&self, config: &ClusterConfig) -> PersistenceResult<ClusterState>;

    /// A specific, non-deleted config version of a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    async fn get(&self, runtime_id: &str, config_version: i64) -> PersistenceResult<Option<ClusterState>>;

    /// The newest non-deleted config version of a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    async fn get_latest(&self, runtime_id: &str) -> PersistenceResult<Option<ClusterState>>;

    /// Mark every config version of a cluster deleted.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::NotFound`] if the cluster is unknown.
    async fn delete(&self, runtime_id: &str) -> PersistenceResult<()>;

    /// Status rows of a config version, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    async fn status_history(&self, config_version: i64) -> PersistenceResult<Vec<ClusterStatusEntity>>;

    /// Current status of a config version.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    async fn latest_status(&self, config_version: i64) -> PersistenceResult<Option<ClusterStatusEntity>> {
        Ok(self.status_history(config_version).await?.pop())
    }
}

pub(crate) fn validate_config(config: &ClusterConfig) -> PersistenceResult<()> {
    if config.runtime_id.trim().is_empty() {
        return Err(PersistenceError::invalid_input("cluster configuration without runtime id"));
    }
    Ok(())
}

/// Row field holding the store-assigned append position of a status row.
pub(crate) const STATUS_SEQUENCE: &str = "seq";

/// Unmarshal status rows in append order.
///
/// Rows are ordered by the append position the store stamped on them, so two
/// statuses recorded within the same microsecond keep the order they were
/// written in. Rows without a position sort by creation time.
pub(crate) fn ordered_statuses<'a>(
    rows: impl IntoIterator<Item = &'a Row>,
) -> PersistenceResult<Vec<ClusterStatusEntity>> {
    let mut keyed = rows
        .into_iter()
        .map(|row| {
            let seq = row.get(STATUS_SEQUENCE).and_then(Value::as_i64).unwrap_or(0);
            ClusterStatusEntity::unmarshal(row)
                .map(|status| (seq, status))
                .map_err(PersistenceError::from)
        })
        .collect::<PersistenceResult<Vec<_>>>()?;
    keyed.sort_by(|(a_seq, a), (b_seq, b)| a_seq.cmp(b_seq).then_with(|| a.created.cmp(&b.created)));
    Ok(keyed.into_iter().map(|(_, status)| status).collect())
}
