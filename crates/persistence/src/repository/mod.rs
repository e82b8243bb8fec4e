//! Reconciliation repository: runs, their operations and run locks.
//!
//! The repository is the only writer of reconciliation rows. Lock acquisition
//! and every state-dependent write run inside one store transaction (or a
//! compare-and-set on the stored state), so concurrent schedulers, workers and
//! bookkeepers in different processes cannot corrupt a run.

mod memory;
mod surreal;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetkeeper_model::{
    ClusterState, ClusterStatus, CorrelationId, OperationEntity, OperationState,
    ReconciliationEntity, SchedulingId,
};

use crate::error::{PersistenceError, PersistenceResult};
use crate::filter::Filter;
use crate::iter::EntityIter;

pub use memory::InMemoryReconciliationRepository;
pub use surreal::SurrealReconciliationRepository;

/// Attempts of a compare-and-set operation update before giving up.
pub const MAX_UPDATE_ATTEMPTS: usize = 5;

/// Options for creating a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationOptions {
    /// Restrict the run to these component names; `None` means all.
    pub components: Option<Vec<String>>,
    /// Status row written in the creation transaction.
    pub initial_status: Option<ClusterStatus>,
}

impl ReconciliationOptions {
    /// Reconcile all components without writing a status.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only reconcile the named components.
    #[must_use]
    pub fn with_components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.components = Some(components.into_iter().map(Into::into).collect());
        self
    }

    /// Record `status` together with the run.
    #[must_use]
    pub const fn with_initial_status(mut self, status: ClusterStatus) -> Self {
        self.initial_status = Some(status);
        self
    }
}

/// An operation the bookkeeper found orphaned, with the state it was seen in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrphanReap {
    pub correlation_id: CorrelationId,
    pub expected: OperationState,
}

impl OrphanReap {
    /// Reap `operation` as last observed.
    pub const fn of(operation: &OperationEntity) -> Self {
        Self {
            correlation_id: operation.correlation_id,
            expected: operation.state,
        }
    }
}

/// What finishing a run writes besides the finished flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinishOutcome {
    /// Status appended to the history of the run's config version.
    pub status: Option<ClusterStatus>,
    /// Diagnostic stored on the run.
    pub reason: Option<String>,
}

impl FinishOutcome {
    /// Finish and record `status`.
    pub const fn recorded(status: ClusterStatus) -> Self {
        Self {
            status: Some(status),
            reason: None,
        }
    }

    /// Finish without a status, keeping `reason` on the run.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: None,
            reason: Some(reason.into()),
        }
    }
}

/// Storage of reconciliation runs and their operations.
#[async_trait]
pub trait ReconciliationRepository: Send + Sync {
    /// Create a run for `state`, acquiring the lock of its config version.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::DuplicateLock`] if an unfinished run exists
    /// for the config version, [`PersistenceError::InvalidInput`] if no
    /// component is left to reconcile.
    async fn create_reconciliation(
        &self,
        state: &ClusterState,
        options: &ReconciliationOptions,
    ) -> PersistenceResult<ReconciliationEntity>;

    /// Fetch one run.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::NotFound`] if the run does not exist.
    async fn get_reconciliation(&self, scheduling_id: SchedulingId) -> PersistenceResult<ReconciliationEntity>;

    /// Runs matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    async fn get_reconciliations(&self, filter: &Filter) -> PersistenceResult<EntityIter<ReconciliationEntity>>;

    /// Operations of a run; empty for unknown runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried or a row is malformed.
    async fn get_operations(&self, scheduling_id: SchedulingId) -> PersistenceResult<Vec<OperationEntity>>;

    /// Fetch one operation.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::NotFound`] if the operation does not exist.
    async fn get_operation(
        &self,
        scheduling_id: SchedulingId,
        correlation_id: CorrelationId,
    ) -> PersistenceResult<OperationEntity>;

    /// Move an operation to `state`, optionally replacing its reason.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::InvalidTransition`] if the state graph does
    /// not allow the move from the current state,
    /// [`PersistenceError::TransactionFailed`] if concurrent writers kept
    /// winning.
    async fn update_operation_state(
        &self,
        scheduling_id: SchedulingId,
        correlation_id: CorrelationId,
        state: OperationState,
        reason: Option<&str>,
    ) -> PersistenceResult<OperationEntity>;

    /// Move orphaned operations through `Orphan` to `Error` in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::TransactionFailed`] and changes nothing if
    /// any operation left its expected state.
    async fn reap_orphans(
        &self,
        scheduling_id: SchedulingId,
        reaps: &[OrphanReap],
        reason: &str,
    ) -> PersistenceResult<Vec<OperationEntity>>;

    /// Mark a run finished, release its lock and append the outcome status.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::NotFound`] if the run does not exist,
    /// [`PersistenceError::AlreadyFinished`] if it was finished before.
    async fn finish_reconciliation(
        &self,
        scheduling_id: SchedulingId,
        outcome: &FinishOutcome,
    ) -> PersistenceResult<ReconciliationEntity>;

    /// Delete a run with its operations and lock.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::NotFound`] if the run does not exist.
    async fn remove_reconciliation(&self, scheduling_id: SchedulingId) -> PersistenceResult<()>;
}

/// Operations to materialise for a new run.
pub(crate) fn plan_operations(
    state: &ClusterState,
    options: &ReconciliationOptions,
    scheduling_id: SchedulingId,
    now: DateTime<Utc>,
) -> PersistenceResult<Vec<OperationEntity>> {
    let subset: Option<HashSet<&str>> = options
        .components
        .as_ref()
        .map(|names| names.iter().map(String::as_str).collect());

    let operations: Vec<OperationEntity> = state
        .components()
        .iter()
        .filter(|component| {
            subset
                .as_ref()
                .is_none_or(|names| names.contains(component.name.as_str()))
        })
        .map(|component| {
            OperationEntity::new(
                scheduling_id,
                state.runtime_id(),
                component.name.as_str(),
                component.effective_namespace(),
                now,
            )
        })
        .collect();

    if operations.is_empty() {
        return Err(PersistenceError::invalid_input(format!(
            "cluster '{}' config version {} has no components to reconcile",
            state.runtime_id(),
            state.config_version()
        )));
    }
    Ok(operations)
}

/// Check a single move in the state graph.
pub(crate) fn check_transition(from: OperationState, to: OperationState) -> PersistenceResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(PersistenceError::invalid_transition(from, to))
    }
}

/// Check that an operation seen in `expected` may be reaped to `Error`.
pub(crate) fn check_reap(expected: OperationState) -> PersistenceResult<()> {
    if expected != OperationState::Orphan {
        check_transition(expected, OperationState::Orphan)?;
    }
    check_transition(OperationState::Orphan, OperationState::Error)
}

/// Apply a reap to an operation.
pub(crate) fn reaped(mut operation: OperationEntity, reason: &str, now: DateTime<Utc>) -> OperationEntity {
    operation.state = OperationState::Error;
    operation.reason = reason.to_string();
    operation.updated = now;
    operation
}

/// Order operations by creation, then correlation id.
pub(crate) fn sort_operations(operations: &mut [OperationEntity]) {
    operations.sort_by(|a, b| {
        a.created
            .cmp(&b.created)
            .then_with(|| a.correlation_id.to_string().cmp(&b.correlation_id.to_string()))
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use fleetkeeper_model::{ClusterConfig, ClusterConfigEntity, ComponentSpec};

    fn state() -> ClusterState {
        let config = ClusterConfig::new("runtime-1", "2.0.0")
            .with_component(ComponentSpec::new("cluster-essentials"))
            .with_component(ComponentSpec::new("istio").with_namespace("istio-system"));
        ClusterState {
            config: ClusterConfigEntity::from_config(&config, 5, Utc::now()),
            status: None,
        }
    }

    #[test]
    fn test_plan_all_components() {
        let ops = plan_operations(&state(), &ReconciliationOptions::new(), SchedulingId::new(), Utc::now()).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].namespace, "default");
        assert_eq!(ops[1].namespace, "istio-system");
        assert!(ops.iter().all(|op| op.state == OperationState::New));
    }

    #[test]
    fn test_plan_component_subset_ignores_unknown() {
        let options = ReconciliationOptions::new().with_components(["istio", "unknown"]);
        let ops = plan_operations(&state(), &options, SchedulingId::new(), Utc::now()).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].component, "istio");
    }

    #[test]
    fn test_plan_empty_subset_is_rejected() {
        let options = ReconciliationOptions::new().with_components(["unknown"]);
        let err = plan_operations(&state(), &options, SchedulingId::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidInput { .. }));
    }

    #[test]
    fn test_check_reap_paths() {
        for state in [
            OperationState::New,
            OperationState::Pending,
            OperationState::InProgress,
            OperationState::Orphan,
        ] {
            assert!(check_reap(state).is_ok(), "{state} should be reapable");
        }
        for state in [OperationState::Done, OperationState::Error, OperationState::Failed] {
            assert!(check_reap(state).is_err(), "{state} should not be reapable");
        }
    }

    #[test]
    fn test_finish_outcome_constructors() {
        assert_eq!(FinishOutcome::recorded(ClusterStatus::Ready).status, Some(ClusterStatus::Ready));
        let skipped = FinishOutcome::skipped("gone");
        assert!(skipped.status.is_none());
        assert_eq!(skipped.reason.as_deref(), Some("gone"));
    }
}
