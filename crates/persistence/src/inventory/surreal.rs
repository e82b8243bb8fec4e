//! SurrealDB inventory.

use async_trait::async_trait;
use fleetkeeper_model::{ClusterConfig, ClusterConfigEntity, ClusterState, ClusterStatusEntity, DatabaseEntity, Row};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{ordered_statuses, validate_config, Inventory};
use crate::client::{statement_errors, StoreClient};
use crate::clock::{system_clock, SharedClock};
use crate::error::{from_surrealdb_error, PersistenceError, PersistenceResult};
use crate::repository::MAX_UPDATE_ATTEMPTS;

const MARK_CONFIG_CHANGED: &str = "fleetkeeper:config_changed";

/// Inventory over a [`StoreClient`].
#[derive(Clone)]
pub struct SurrealInventory {
    client: StoreClient,
    clock: SharedClock,
}

impl SurrealInventory {
    /// Create an inventory using the wall clock.
    pub fn new(client: StoreClient) -> Self {
        Self::with_clock(client, system_clock())
    }

    /// Create an inventory using `clock`.
    pub fn with_clock(client: StoreClient, clock: SharedClock) -> Self {
        Self { client, clock }
    }

    async fn state_of(&self, row: &Row) -> PersistenceResult<ClusterState> {
        let config = ClusterConfigEntity::unmarshal(row)?;
        let status = self.latest_status(config.config_version).await?;
        Ok(ClusterState { config, status })
    }

    /// Take the next value of the global config version sequence.
    async fn next_config_version(&self) -> PersistenceResult<i64> {
        let mut response = self
            .client
            .execute_checked(
                "UPSERT sequence:config_version SET value = (value OR 0) + 1 RETURN value;",
                Vec::new(),
            )
            .await?;
        let rows: Vec<Value> = response.take(0).map_err(from_surrealdb_error)?;
        rows.first()
            .and_then(|row| row.get("value"))
            .and_then(Value::as_i64)
            .ok_or_else(|| PersistenceError::query_failed("config version sequence returned no value"))
    }

    /// Insert `entity` if the newest live version of its cluster is still `seen`.
    ///
    /// Every insert for a cluster writes its head record, so two racing
    /// inserts conflict and only one commits.
    async fn insert_version(&self, entity: &ClusterConfigEntity, seen: &[i64]) -> PersistenceResult<()> {
        let sql = format!(
            "BEGIN TRANSACTION;\n\
             LET $latest = (SELECT config_version FROM cluster_config \
             WHERE runtime_id = $runtime_id AND deleted = false ORDER BY config_version DESC LIMIT 1).config_version;\n\
             IF $latest != $seen {{ THROW \"{MARK_CONFIG_CHANGED}\" }};\n\
             UPSERT type::thing('cluster_head', $runtime_id) SET config_version = $config.config_version;\n\
             CREATE cluster_config CONTENT $config;\n\
             COMMIT TRANSACTION;"
        );
        let bindings = vec![
            runtime_binding(&entity.runtime_id),
            ("seen".to_string(), Value::from(seen.to_vec())),
            ("config".to_string(), Value::Object(entity.marshal())),
        ];

        let mut response = self.client.execute(&sql, bindings).await?;
        let errors = statement_errors(&mut response);
        if errors.iter().any(|err| err.contains(MARK_CONFIG_CHANGED)) {
            return Err(PersistenceError::transaction_failed(format!(
                "configuration of {} changed concurrently",
                entity.runtime_id
            )));
        }
        match errors.iter().find(|err| !err.contains("not executed")).or_else(|| errors.first()) {
            Some(err) => Err(from_surrealdb_error(err)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for SurrealInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealInventory")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

fn runtime_binding(runtime_id: &str) -> (String, Value) {
    ("runtime_id".to_string(), Value::from(runtime_id))
}

#[async_trait]
impl Inventory for SurrealInventory {
    async fn create_or_update(&self, config: &ClusterConfig) -> PersistenceResult<ClusterState> {
        validate_config(config)?;

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let latest = self.get_latest(&config.runtime_id).await?;
            if let Some(latest) = &latest {
                if latest.config.describes(config) {
                    return Ok(latest.clone());
                }
            }
            let seen: Vec<i64> = latest.iter().map(ClusterState::config_version).collect();

            let inserted = match self.next_config_version().await {
                Ok(version) => {
                    let entity = ClusterConfigEntity::from_config(config, version, self.clock.now());
                    self.insert_version(&entity, &seen).await.map(|()| entity)
                }
                Err(err) => Err(err),
            };
            match inserted {
                Ok(entity) => {
                    info!(
                        runtime_id = %config.runtime_id,
                        config_version = entity.config_version,
                        "Stored new cluster configuration version"
                    );
                    return Ok(ClusterState {
                        config: entity,
                        status: None,
                    });
                }
                Err(PersistenceError::TransactionFailed { reason }) => {
                    debug!(runtime_id = %config.runtime_id, attempt, reason = %reason, "Configuration changed concurrently, re-reading");
                }
                Err(err) => return Err(err),
            }
        }

        warn!(runtime_id = %config.runtime_id, "Giving up configuration update after concurrent changes");
        Err(PersistenceError::transaction_failed(format!(
            "configuration of {} kept changing after {MAX_UPDATE_ATTEMPTS} attempts",
            config.runtime_id
        )))
    }

    async fn get(&self, runtime_id: &str, config_version: i64) -> PersistenceResult<Option<ClusterState>> {
        let rows = self
            .client
            .select_rows(
                "SELECT * OMIT id FROM cluster_config \
                 WHERE runtime_id = $runtime_id AND config_version = $config_version AND deleted = false;",
                vec![
                    runtime_binding(runtime_id),
                    ("config_version".to_string(), Value::from(config_version)),
                ],
            )
            .await?;
        match rows.first() {
            Some(row) => Ok(Some(self.state_of(row).await?)),
            None => Ok(None),
        }
    }

    async fn get_latest(&self, runtime_id: &str) -> PersistenceResult<Option<ClusterState>> {
        let rows = self
            .client
            .select_rows(
                "SELECT * OMIT id FROM cluster_config WHERE runtime_id = $runtime_id AND deleted = false \
                 ORDER BY config_version DESC LIMIT 1;",
                vec![runtime_binding(runtime_id)],
            )
            .await?;
        match rows.first() {
            Some(row) => Ok(Some(self.state_of(row).await?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, runtime_id: &str) -> PersistenceResult<()> {
        let mut response = self
            .client
            .execute_checked(
                "UPDATE cluster_config SET deleted = true WHERE runtime_id = $runtime_id AND deleted = false \
                 RETURN config_version;",
                vec![runtime_binding(runtime_id)],
            )
            .await?;
        let updated: Vec<Value> = response.take(0).map_err(from_surrealdb_error)?;
        if updated.is_empty() {
            return Err(PersistenceError::not_found("cluster", runtime_id));
        }

        info!(runtime_id = %runtime_id, versions = updated.len(), "Deleted cluster from inventory");
        Ok(())
    }

    async fn status_history(&self, config_version: i64) -> PersistenceResult<Vec<ClusterStatusEntity>> {
        let rows = self
            .client
            .select_rows(
                "SELECT * OMIT id FROM cluster_status WHERE config_version = $config_version \
                 ORDER BY seq ASC, created ASC;",
                vec![("config_version".to_string(), Value::from(config_version))],
            )
            .await?;
        ordered_statuses(&rows)
    }
}
