//! Cluster status transitions at the start and end of a reconciliation run.

use std::sync::Arc;

use fleetkeeper_model::{
    ClusterState, ClusterStatus, OperationEntity, OperationState, ReconciliationEntity, SchedulingId,
};
use fleetkeeper_persistence::{FinishOutcome, Inventory, ReconciliationOptions, ReconciliationRepository};
use tracing::{info, warn};

use crate::error::Result;
use crate::publisher::{ComponentSummary, StatusPublisher};

/// Writes cluster statuses and closes runs.
#[derive(Clone)]
pub struct ClusterStatusTransition {
    inventory: Arc<dyn Inventory>,
    repository: Arc<dyn ReconciliationRepository>,
    publisher: Option<Arc<dyn StatusPublisher>>,
}

impl ClusterStatusTransition {
    /// Create a transition without status publishing.
    pub fn new(inventory: Arc<dyn Inventory>, repository: Arc<dyn ReconciliationRepository>) -> Self {
        Self {
            inventory,
            repository,
            publisher: None,
        }
    }

    /// Publish component statuses after each transition.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn StatusPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// The inventory used to resolve cluster configurations.
    pub fn inventory(&self) -> &Arc<dyn Inventory> {
        &self.inventory
    }

    /// The repository runs are written to.
    pub fn repository(&self) -> &Arc<dyn ReconciliationRepository> {
        &self.repository
    }

    /// Create a run for `state` and mark the cluster `Running`.
    ///
    /// The run and the status row are written in one transaction.
    ///
    /// # Errors
    ///
    /// Returns the repository error, e.g. `DuplicateLock` when the config
    /// version is already being reconciled.
    pub async fn start_reconciliation(
        &self,
        state: &ClusterState,
        options: ReconciliationOptions,
    ) -> Result<ReconciliationEntity> {
        let options = options.with_initial_status(ClusterStatus::Running);
        let reconciliation = self.repository.create_reconciliation(state, &options).await?;

        info!(
            scheduling_id = %reconciliation.scheduling_id,
            runtime_id = %reconciliation.runtime_id,
            config_version = reconciliation.cluster_config_version,
            "Cluster status changed to running"
        );

        let operations = self.operations_to_publish(reconciliation.scheduling_id).await;
        let summaries = operations
            .iter()
            .map(|op| summary_for(state, op, ClusterStatus::Running))
            .collect::<Vec<_>>();
        self.publish_all(&summaries).await;

        Ok(reconciliation)
    }

    /// Close a run whose operations are all terminal.
    ///
    /// If the run's configuration still exists in the inventory, `status` is
    /// appended to its history in the same transaction that marks the run
    /// finished. Otherwise the run is finished with a diagnostic reason and
    /// no status is written.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyFinished` if another bookkeeper closed the run first,
    /// or any other repository or inventory error.
    pub async fn finish(
        &self,
        reconciliation: &ReconciliationEntity,
        status: ClusterStatus,
    ) -> Result<ReconciliationEntity> {
        let version = reconciliation.cluster_config_version;
        let state = self.inventory.get(&reconciliation.runtime_id, version).await?;

        let outcome = match &state {
            Some(_) => FinishOutcome::recorded(status),
            None => {
                warn!(
                    scheduling_id = %reconciliation.scheduling_id,
                    config_version = version,
                    "Cluster configuration no longer in inventory, finishing without status"
                );
                FinishOutcome::skipped(format!(
                    "cluster configuration {version} no longer exists in inventory"
                ))
            }
        };

        let finished = self
            .repository
            .finish_reconciliation(reconciliation.scheduling_id, &outcome)
            .await?;

        if let Some(state) = state {
            info!(
                scheduling_id = %reconciliation.scheduling_id,
                runtime_id = %reconciliation.runtime_id,
                config_version = version,
                status = %status,
                "Cluster status changed"
            );
            let operations = self.operations_to_publish(reconciliation.scheduling_id).await;
            let summaries = operations
                .iter()
                .map(|op| summary_for(&state, op, component_status(op.state)))
                .collect::<Vec<_>>();
            self.publish_all(&summaries).await;
        }

        Ok(finished)
    }

    /// Cluster status for a set of terminal operations: `Ready` iff all `Done`.
    #[must_use]
    pub fn outcome_for(operations: &[OperationEntity]) -> ClusterStatus {
        if operations.iter().all(|op| op.state == OperationState::Done) {
            ClusterStatus::Ready
        } else {
            ClusterStatus::Error
        }
    }

    /// Operations of a run whose statuses are published. A failed read only
    /// skips publishing; the transition itself is already committed.
    async fn operations_to_publish(&self, scheduling_id: SchedulingId) -> Vec<OperationEntity> {
        if self.publisher.is_none() {
            return Vec::new();
        }
        match self.repository.get_operations(scheduling_id).await {
            Ok(operations) => operations,
            Err(e) => {
                warn!(
                    scheduling_id = %scheduling_id,
                    error = %e,
                    "Failed to load operations, component statuses not published"
                );
                Vec::new()
            }
        }
    }

    async fn publish_all(&self, summaries: &[ComponentSummary]) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        for summary in summaries {
            if let Err(e) = publisher.publish(summary).await {
                warn!(component = %summary.component, error = %e, "Failed to publish component status");
            }
        }
    }
}

impl std::fmt::Debug for ClusterStatusTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterStatusTransition")
            .field("publisher", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}

fn component_status(state: OperationState) -> ClusterStatus {
    match state {
        OperationState::Done => ClusterStatus::Ready,
        OperationState::Error | OperationState::Failed => ClusterStatus::Error,
        OperationState::New => ClusterStatus::NotStarted,
        OperationState::Pending | OperationState::InProgress | OperationState::Orphan => ClusterStatus::Running,
    }
}

fn summary_for(state: &ClusterState, operation: &OperationEntity, status: ClusterStatus) -> ComponentSummary {
    let version = state
        .components()
        .iter()
        .find(|component| component.name == operation.component)
        .map(|component| component.version.clone())
        .unwrap_or_default();
    ComponentSummary {
        component: operation.component.clone(),
        namespace: operation.namespace.clone(),
        version,
        status,
    }
}
