//! In-memory reconciliation repository.

use std::sync::Arc;

use async_trait::async_trait;
use fleetkeeper_model::{
    ClusterState, ClusterStatusEntity, CorrelationId, DatabaseEntity, OperationEntity, OperationState,
    ReconciliationEntity, Row, SchedulingId,
};
use tracing::{debug, info};

use super::{
    check_reap, check_transition, plan_operations, reaped, sort_operations, FinishOutcome, OrphanReap,
    ReconciliationOptions, ReconciliationRepository,
};
use crate::clock::{system_clock, SharedClock};
use crate::error::{PersistenceError, PersistenceResult};
use crate::filter::Filter;
use crate::iter::EntityIter;
use crate::memory::{field_i64, field_str, InMemoryStore, Tables};

/// Repository over an [`InMemoryStore`].
#[derive(Clone)]
pub struct InMemoryReconciliationRepository {
    store: Arc<InMemoryStore>,
    clock: SharedClock,
}

impl InMemoryReconciliationRepository {
    /// Create a repository over `store` using the wall clock.
    pub fn new(store: Arc<InMemoryStore>) -> Self {
        Self::with_clock(store, system_clock())
    }

    /// Create a repository over `store` using `clock`.
    pub fn with_clock(store: Arc<InMemoryStore>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }
}

impl std::fmt::Debug for InMemoryReconciliationRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryReconciliationRepository").finish_non_exhaustive()
    }
}

fn is_run(row: &Row, scheduling_id: &str) -> bool {
    field_str(row, "scheduling_id") == Some(scheduling_id)
}

fn is_operation(row: &Row, scheduling_id: &str, correlation_id: &str) -> bool {
    is_run(row, scheduling_id) && field_str(row, "correlation_id") == Some(correlation_id)
}

fn operation_index(tables: &Tables, scheduling_id: SchedulingId, correlation_id: CorrelationId) -> PersistenceResult<usize> {
    let sid = scheduling_id.to_string();
    let cid = correlation_id.to_string();
    tables
        .operations
        .iter()
        .position(|row| is_operation(row, &sid, &cid))
        .ok_or_else(|| PersistenceError::not_found("operation", format!("{sid}/{cid}")))
}

fn read_operation(tables: &Tables, index: usize) -> PersistenceResult<OperationEntity> {
    let row = tables
        .operations
        .get(index)
        .ok_or_else(|| PersistenceError::query_failed("operation row vanished inside transaction"))?;
    Ok(OperationEntity::unmarshal(row)?)
}

fn write_operation(tables: &mut Tables, index: usize, operation: &OperationEntity) {
    if let Some(row) = tables.operations.get_mut(index) {
        *row = operation.marshal();
    }
}

#[async_trait]
impl ReconciliationRepository for InMemoryReconciliationRepository {
    async fn create_reconciliation(
        &self,
        state: &ClusterState,
        options: &ReconciliationOptions,
    ) -> PersistenceResult<ReconciliationEntity> {
        let now = self.clock.now();
        let reconciliation = ReconciliationEntity::new(state.runtime_id(), state.config_version(), now);
        let operations = plan_operations(state, options, reconciliation.scheduling_id, now)?;
        let status = options
            .initial_status
            .map(|status| ClusterStatusEntity::new(state.config_version(), status, now));

        self.store
            .transaction(|tables| {
                let version = reconciliation.cluster_config_version;
                if let Some(holder) = tables.locks.get(&version) {
                    return Err(PersistenceError::duplicate_lock(version, holder.to_string()));
                }
                tables.locks.insert(version, reconciliation.scheduling_id);
                tables.reconciliations.push(reconciliation.marshal());
                tables.operations.extend(operations.iter().map(DatabaseEntity::marshal));
                if let Some(status) = &status {
                    tables.append_status(status.marshal());
                }
                Ok(())
            })
            .await?;

        info!(
            scheduling_id = %reconciliation.scheduling_id,
            runtime_id = %reconciliation.runtime_id,
            config_version = reconciliation.cluster_config_version,
            operations = operations.len(),
            "Created reconciliation"
        );
        Ok(reconciliation)
    }

    async fn get_reconciliation(&self, scheduling_id: SchedulingId) -> PersistenceResult<ReconciliationEntity> {
        let sid = scheduling_id.to_string();
        let row = self
            .store
            .read(|tables| tables.reconciliations.iter().find(|row| is_run(row, &sid)).cloned())
            .await?
            .ok_or_else(|| PersistenceError::not_found("reconciliation", sid))?;
        Ok(ReconciliationEntity::unmarshal(&row)?)
    }

    async fn get_reconciliations(&self, filter: &Filter) -> PersistenceResult<EntityIter<ReconciliationEntity>> {
        let mut rows: Vec<Row> = self
            .store
            .read(|tables| {
                tables
                    .reconciliations
                    .iter()
                    .filter(|row| filter.matches(row))
                    .cloned()
                    .collect()
            })
            .await?;
        rows.sort_by_key(|row| field_i64(row, "created"));
        Ok(EntityIter::new(rows))
    }

    async fn get_operations(&self, scheduling_id: SchedulingId) -> PersistenceResult<Vec<OperationEntity>> {
        let sid = scheduling_id.to_string();
        let rows: Vec<Row> = self
            .store
            .read(|tables| tables.operations.iter().filter(|row| is_run(row, &sid)).cloned().collect())
            .await?;
        let mut operations = rows
            .iter()
            .map(|row| OperationEntity::unmarshal(row).map_err(PersistenceError::from))
            .collect::<PersistenceResult<Vec<_>>>()?;
        sort_operations(&mut operations);
        Ok(operations)
    }

    async fn get_operation(
        &self,
        scheduling_id: SchedulingId,
        correlation_id: CorrelationId,
    ) -> PersistenceResult<OperationEntity> {
        self.store
            .read(|tables| {
                operation_index(tables, scheduling_id, correlation_id).and_then(|index| read_operation(tables, index))
            })
            .await?
    }

    async fn update_operation_state(
        &self,
        scheduling_id: SchedulingId,
        correlation_id: CorrelationId,
        state: OperationState,
        reason: Option<&str>,
    ) -> PersistenceResult<OperationEntity> {
        let now = self.clock.now();
        let updated = self
            .store
            .transaction(|tables| {
                let index = operation_index(tables, scheduling_id, correlation_id)?;
                let mut operation = read_operation(tables, index)?;
                check_transition(operation.state, state)?;
                operation.state = state;
                if let Some(reason) = reason {
                    operation.reason = reason.to_string();
                }
                operation.updated = now;
                write_operation(tables, index, &operation);
                Ok(operation)
            })
            .await?;

        debug!(
            scheduling_id = %scheduling_id,
            correlation_id = %correlation_id,
            state = %state,
            "Updated operation state"
        );
        Ok(updated)
    }

    async fn reap_orphans(
        &self,
        scheduling_id: SchedulingId,
        reaps: &[OrphanReap],
        reason: &str,
    ) -> PersistenceResult<Vec<OperationEntity>> {
        let now = self.clock.now();
        self.store
            .transaction(|tables| {
                reaps
                    .iter()
                    .map(|reap| {
                        let index = operation_index(tables, scheduling_id, reap.correlation_id)?;
                        let operation = read_operation(tables, index)?;
                        if operation.state != reap.expected {
                            return Err(PersistenceError::transaction_failed(format!(
                                "operation {} moved from {} to {} before it was reaped",
                                reap.correlation_id, reap.expected, operation.state
                            )));
                        }
                        check_reap(operation.state)?;
                        let operation = reaped(operation, reason, now);
                        write_operation(tables, index, &operation);
                        Ok(operation)
                    })
                    .collect()
            })
            .await
    }

    async fn finish_reconciliation(
        &self,
        scheduling_id: SchedulingId,
        outcome: &FinishOutcome,
    ) -> PersistenceResult<ReconciliationEntity> {
        let now = self.clock.now();
        let sid = scheduling_id.to_string();
        self.store
            .transaction(|tables| {
                let index = tables
                    .reconciliations
                    .iter()
                    .position(|row| is_run(row, &sid))
                    .ok_or_else(|| PersistenceError::not_found("reconciliation", sid.as_str()))?;
                let row = tables
                    .reconciliations
                    .get_mut(index)
                    .ok_or_else(|| PersistenceError::not_found("reconciliation", sid.as_str()))?;

                let mut reconciliation = ReconciliationEntity::unmarshal(row)?;
                if reconciliation.finished {
                    return Err(PersistenceError::already_finished(sid.as_str()));
                }
                reconciliation.finished = true;
                reconciliation.finished_at = Some(now);
                reconciliation.reason.clone_from(&outcome.reason);
                *row = reconciliation.marshal();

                tables.locks.retain(|_, holder| *holder != scheduling_id);
                if let Some(status) = outcome.status {
                    let entity = ClusterStatusEntity::new(reconciliation.cluster_config_version, status, now);
                    tables.append_status(entity.marshal());
                }
                Ok(reconciliation)
            })
            .await
    }

    async fn remove_reconciliation(&self, scheduling_id: SchedulingId) -> PersistenceResult<()> {
        let sid = scheduling_id.to_string();
        self.store
            .transaction(|tables| {
                let before = tables.reconciliations.len();
                tables.reconciliations.retain(|row| !is_run(row, &sid));
                if tables.reconciliations.len() == before {
                    return Err(PersistenceError::not_found("reconciliation", sid.as_str()));
                }
                tables.operations.retain(|row| !is_run(row, &sid));
                tables.locks.retain(|_, holder| *holder != scheduling_id);
                Ok(())
            })
            .await?;

        info!(scheduling_id = %scheduling_id, "Removed reconciliation");
        Ok(())
    }
}
