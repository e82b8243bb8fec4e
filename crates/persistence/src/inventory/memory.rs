//! In-memory inventory sharing tables with the in-memory repository.

use std::sync::Arc;

use async_trait::async_trait;
use fleetkeeper_model::{ClusterConfig, ClusterConfigEntity, ClusterState, ClusterStatusEntity, DatabaseEntity, Row};
use tracing::info;

use super::{ordered_statuses, validate_config, Inventory};
use crate::clock::{system_clock, SharedClock};
use crate::error::{PersistenceError, PersistenceResult};
use crate::memory::{field_i64, field_str, InMemoryStore, Tables};

/// Inventory over an [`InMemoryStore`].
#[derive(Clone)]
pub struct InMemoryInventory {
    store: Arc<InMemoryStore>,
    clock: SharedClock,
}

impl InMemoryInventory {
    /// Create an inventory over `store` using the wall clock.
    pub fn new(store: Arc<InMemoryStore>) -> Self {
        Self::with_clock(store, system_clock())
    }

    /// Create an inventory over `store` using `clock`.
    pub fn with_clock(store: Arc<InMemoryStore>, clock: SharedClock) -> Self {
        Self { store, clock }
    }
}

impl std::fmt::Debug for InMemoryInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryInventory").finish_non_exhaustive()
    }
}

fn is_live_config(row: &Row, runtime_id: &str) -> bool {
    field_str(row, "runtime_id") == Some(runtime_id)
        && row.get("deleted").and_then(serde_json::Value::as_bool) == Some(false)
}

fn latest_config_row<'a>(tables: &'a Tables, runtime_id: &str) -> Option<&'a Row> {
    tables
        .cluster_configs
        .iter()
        .filter(|row| is_live_config(row, runtime_id))
        .max_by_key(|row| field_i64(row, "config_version"))
}

fn statuses_of(tables: &Tables, config_version: i64) -> PersistenceResult<Vec<ClusterStatusEntity>> {
    ordered_statuses(
        tables
            .cluster_statuses
            .iter()
            .filter(|row| field_i64(row, "config_version") == Some(config_version)),
    )
}

fn state_of(tables: &Tables, row: &Row) -> PersistenceResult<ClusterState> {
    let config = ClusterConfigEntity::unmarshal(row)?;
    let status = statuses_of(tables, config.config_version)?.pop();
    Ok(ClusterState { config, status })
}

#[async_trait]
impl Inventory for InMemoryInventory {
    async fn create_or_update(&self, config: &ClusterConfig) -> PersistenceResult<ClusterState> {
        validate_config(config)?;
        let now = self.clock.now();

        let (state, created) = self
            .store
            .transaction(|tables| {
                if let Some(row) = latest_config_row(tables, &config.runtime_id) {
                    let state = state_of(tables, row)?;
                    if state.config.describes(config) {
                        return Ok((state, false));
                    }
                }

                let version = tables.config_version_sequence.saturating_add(1);
                tables.config_version_sequence = version;
                let entity = ClusterConfigEntity::from_config(config, version, now);
                tables.cluster_configs.push(entity.marshal());
                Ok((ClusterState { config: entity, status: None }, true))
            })
            .await?;

        if created {
            info!(
                runtime_id = %config.runtime_id,
                config_version = state.config_version(),
                "Stored new cluster configuration version"
            );
        }
        Ok(state)
    }

    async fn get(&self, runtime_id: &str, config_version: i64) -> PersistenceResult<Option<ClusterState>> {
        self.store
            .read(|tables| {
                tables
                    .cluster_configs
                    .iter()
                    .find(|row| {
                        is_live_config(row, runtime_id) && field_i64(row, "config_version") == Some(config_version)
                    })
                    .map(|row| state_of(tables, row))
                    .transpose()
            })
            .await?
    }

    async fn get_latest(&self, runtime_id: &str) -> PersistenceResult<Option<ClusterState>> {
        self.store
            .read(|tables| {
                latest_config_row(tables, runtime_id)
                    .map(|row| state_of(tables, row))
                    .transpose()
            })
            .await?
    }

    async fn delete(&self, runtime_id: &str) -> PersistenceResult<()> {
        self.store
            .transaction(|tables| {
                let mut deleted = 0_usize;
                for row in tables
                    .cluster_configs
                    .iter_mut()
                    .filter(|row| is_live_config(row, runtime_id))
                {
                    row.insert("deleted".to_string(), serde_json::Value::Bool(true));
                    deleted = deleted.saturating_add(1);
                }
                if deleted == 0 {
                    return Err(PersistenceError::not_found("cluster", runtime_id));
                }
                Ok(())
            })
            .await?;

        info!(runtime_id = %runtime_id, "Deleted cluster from inventory");
        Ok(())
    }

    async fn status_history(&self, config_version: i64) -> PersistenceResult<Vec<ClusterStatusEntity>> {
        self.store.read(|tables| statuses_of(tables, config_version)).await?
    }
}
