//! Bookkeeper and cluster status transition behaviour over the in-memory store.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use fleetkeeper_model::{
    ClusterConfig, ClusterState, ClusterStatus, ComponentSpec, OperationEntity, OperationState, ReconciliationEntity,
};
use fleetkeeper_persistence::{
    Filter, InMemoryInventory, InMemoryReconciliationRepository, InMemoryStore, Inventory, ManualClock,
    ReconciliationOptions, ReconciliationRepository, SharedClock,
};
use fleetkeeper_scheduler::{
    stop_channel, ArtifactTarget, Bookkeeper, BookkeeperConfig, ClusterStatusTransition, InMemoryArtifactTarget,
    SummaryPublisher, TickReport,
};

const ORPHAN_TIMEOUT_SECS: u64 = 60;

struct Harness {
    store: Arc<InMemoryStore>,
    repository: Arc<dyn ReconciliationRepository>,
    inventory: Arc<dyn Inventory>,
    transition: ClusterStatusTransition,
    bookkeeper: Bookkeeper,
    clock: ManualClock,
}

fn harness_with(interval: Duration, publisher: Option<Arc<InMemoryArtifactTarget>>) -> Harness {
    let clock = ManualClock::starting_now();
    let shared: SharedClock = Arc::new(clock.clone());
    let store = InMemoryStore::new_arc();
    let repository: Arc<dyn ReconciliationRepository> = Arc::new(InMemoryReconciliationRepository::with_clock(
        Arc::clone(&store),
        Arc::clone(&shared),
    ));
    let inventory: Arc<dyn Inventory> = Arc::new(InMemoryInventory::with_clock(Arc::clone(&store), Arc::clone(&shared)));

    let mut transition = ClusterStatusTransition::new(Arc::clone(&inventory), Arc::clone(&repository));
    if let Some(target) = publisher {
        let target: Arc<dyn ArtifactTarget> = target;
        transition = transition.with_publisher(Arc::new(SummaryPublisher::with_clock(target, Arc::clone(&shared))));
    }

    let config = BookkeeperConfig::new(interval, Duration::from_secs(ORPHAN_TIMEOUT_SECS)).unwrap();
    let bookkeeper = Bookkeeper::with_clock(transition.clone(), config, shared);

    Harness {
        store,
        repository,
        inventory,
        transition,
        bookkeeper,
        clock,
    }
}

fn harness() -> Harness {
    harness_with(Duration::from_secs(1), None)
}

fn cluster(runtime_id: &str) -> ClusterConfig {
    ClusterConfig::new(runtime_id, "2.4.0")
        .with_component(ComponentSpec::new("cluster-essentials").with_version("2.4.0"))
        .with_component(
            ComponentSpec::new("istio")
                .with_namespace("istio-system")
                .with_version("1.11.4"),
        )
        .with_component(ComponentSpec::new("serverless").with_version("2.4.0"))
}

impl Harness {
    async fn start(&self, runtime_id: &str) -> (ClusterState, ReconciliationEntity) {
        let state = self.inventory.create_or_update(&cluster(runtime_id)).await.unwrap();
        let run = self
            .transition
            .start_reconciliation(&state, ReconciliationOptions::new())
            .await
            .unwrap();
        (state, run)
    }

    async fn operations(&self, run: &ReconciliationEntity) -> Vec<OperationEntity> {
        self.repository.get_operations(run.scheduling_id).await.unwrap()
    }

    async fn drive(&self, op: &OperationEntity, path: &[OperationState]) {
        for state in path {
            self.repository
                .update_operation_state(op.scheduling_id, op.correlation_id, *state, None)
                .await
                .unwrap();
        }
    }

    async fn complete(&self, op: &OperationEntity, last: OperationState) {
        self.drive(op, &[OperationState::InProgress, last]).await;
    }

    fn advance_past_timeout(&self) {
        self.clock
            .advance(chrono::Duration::seconds(i64::try_from(ORPHAN_TIMEOUT_SECS).unwrap() + 1));
    }
}

#[tokio::test]
async fn given_all_operations_done_when_ticked_then_run_finished_ready() {
    let h = harness();
    let (state, run) = h.start("runtime-1").await;
    for op in h.operations(&run).await {
        h.complete(&op, OperationState::Done).await;
    }

    let report = h.bookkeeper.tick().await.unwrap();

    assert_eq!(
        report,
        TickReport {
            inspected: 1,
            reaped: 0,
            finished: 1,
            failed: 0,
        }
    );
    let run = h.repository.get_reconciliation(run.scheduling_id).await.unwrap();
    assert!(run.finished);
    assert!(run.finished_at.is_some());
    let latest = h.inventory.latest_status(state.config_version()).await.unwrap().unwrap();
    assert_eq!(latest.status, ClusterStatus::Ready);
}

#[tokio::test]
async fn given_failed_operation_when_ticked_then_run_finished_error() {
    let h = harness();
    let (state, run) = h.start("runtime-1").await;
    let ops = h.operations(&run).await;
    h.complete(&ops[0], OperationState::Done).await;
    h.complete(&ops[1], OperationState::Failed).await;
    h.complete(&ops[2], OperationState::Done).await;

    let report = h.bookkeeper.tick().await.unwrap();

    assert_eq!(report.finished, 1);
    let latest = h.inventory.latest_status(state.config_version()).await.unwrap().unwrap();
    assert_eq!(latest.status, ClusterStatus::Error);
}

#[tokio::test]
async fn given_running_operations_when_ticked_then_run_left_open() {
    let h = harness();
    let (state, run) = h.start("runtime-1").await;
    let ops = h.operations(&run).await;
    h.complete(&ops[0], OperationState::Done).await;
    h.drive(&ops[1], &[OperationState::InProgress]).await;

    let report = h.bookkeeper.tick().await.unwrap();

    assert_eq!(report.inspected, 1);
    assert_eq!(report.finished, 0);
    assert_eq!(report.reaped, 0);
    assert!(!h.repository.get_reconciliation(run.scheduling_id).await.unwrap().finished);
    let latest = h.inventory.latest_status(state.config_version()).await.unwrap().unwrap();
    assert_eq!(latest.status, ClusterStatus::Running);
}

#[tokio::test]
async fn given_stale_pending_operation_when_ticked_then_reaped_and_run_finishes_with_error() {
    let h = harness();
    let (state, run) = h.start("runtime-1").await;
    let ops = h.operations(&run).await;
    h.complete(&ops[0], OperationState::Done).await;
    h.drive(&ops[1], &[OperationState::Pending]).await;

    h.advance_past_timeout();
    // Fresh progress on the third operation keeps it alive.
    h.drive(&ops[2], &[OperationState::InProgress]).await;

    let report = h.bookkeeper.tick().await.unwrap();
    assert_eq!(report.reaped, 1);
    assert_eq!(report.finished, 0);

    let reaped = h
        .repository
        .get_operation(run.scheduling_id, ops[1].correlation_id)
        .await
        .unwrap();
    assert_eq!(reaped.state, OperationState::Error);
    assert!(reaped.reason.starts_with("orphaned"));
    assert!(!h.repository.get_reconciliation(run.scheduling_id).await.unwrap().finished);

    h.drive(&ops[2], &[OperationState::Done]).await;
    let report = h.bookkeeper.tick().await.unwrap();
    assert_eq!(report.finished, 1);

    let latest = h.inventory.latest_status(state.config_version()).await.unwrap().unwrap();
    assert_eq!(latest.status, ClusterStatus::Error);
}

#[tokio::test]
async fn given_all_operations_stale_when_ticked_then_reaped_and_finished_in_one_tick() {
    let h = harness();
    let (state, run) = h.start("runtime-1").await;

    h.advance_past_timeout();
    let report = h.bookkeeper.tick().await.unwrap();

    assert_eq!(report.reaped, 3);
    assert_eq!(report.finished, 1);
    assert!(h
        .operations(&run)
        .await
        .iter()
        .all(|op| op.state == OperationState::Error));
    let latest = h.inventory.latest_status(state.config_version()).await.unwrap().unwrap();
    assert_eq!(latest.status, ClusterStatus::Error);
}

#[tokio::test]
async fn given_leftover_orphan_when_ticked_then_resolved_to_error() {
    let h = harness();
    let (_, run) = h.start("runtime-1").await;
    let ops = h.operations(&run).await;
    h.drive(&ops[0], &[OperationState::Orphan]).await;
    h.complete(&ops[1], OperationState::Done).await;
    h.complete(&ops[2], OperationState::Done).await;

    let report = h.bookkeeper.tick().await.unwrap();

    assert_eq!(report.reaped, 1);
    assert_eq!(report.finished, 1);
    let op = h
        .repository
        .get_operation(run.scheduling_id, ops[0].correlation_id)
        .await
        .unwrap();
    assert_eq!(op.state, OperationState::Error);
}

#[tokio::test]
async fn given_deleted_cluster_when_finished_then_reason_set_and_no_status_written() {
    let h = harness();
    let (state, run) = h.start("runtime-1").await;
    for op in h.operations(&run).await {
        h.complete(&op, OperationState::Done).await;
    }
    h.inventory.delete("runtime-1").await.unwrap();

    let report = h.bookkeeper.tick().await.unwrap();

    assert_eq!(report.finished, 1);
    let run = h.repository.get_reconciliation(run.scheduling_id).await.unwrap();
    assert!(run.finished);
    let reason = run.reason.unwrap();
    assert!(reason.contains("no longer exists in inventory"));
    assert!(reason.contains(&state.config_version().to_string()));

    let history = h.inventory.status_history(state.config_version()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ClusterStatus::Running);
}

#[tokio::test]
async fn given_finished_run_when_ticked_again_then_not_inspected() {
    let h = harness();
    let (_, run) = h.start("runtime-1").await;
    for op in h.operations(&run).await {
        h.complete(&op, OperationState::Done).await;
    }
    assert_eq!(h.bookkeeper.tick().await.unwrap().finished, 1);

    let report = h.bookkeeper.tick().await.unwrap();
    assert_eq!(report, TickReport::default());
}

#[tokio::test]
async fn given_run_finished_elsewhere_when_finished_again_then_already_finished() {
    let h = harness();
    let (_, run) = h.start("runtime-1").await;
    for op in h.operations(&run).await {
        h.complete(&op, OperationState::Done).await;
    }
    h.transition.finish(&run, ClusterStatus::Ready).await.unwrap();

    let err = h.transition.finish(&run, ClusterStatus::Ready).await.unwrap_err();
    assert!(err.is_already_finished());
}

#[tokio::test]
async fn given_several_runs_when_ticked_then_each_processed() {
    let h = harness();
    let (_, done_run) = h.start("runtime-1").await;
    let (_, open_run) = h.start("runtime-2").await;
    for op in h.operations(&done_run).await {
        h.complete(&op, OperationState::Done).await;
    }

    let report = h.bookkeeper.tick().await.unwrap();

    assert_eq!(report.inspected, 2);
    assert_eq!(report.finished, 1);
    let active = h
        .repository
        .get_reconciliations(&Filter::active())
        .await
        .unwrap()
        .map(Result::unwrap)
        .map(|run| run.scheduling_id)
        .collect::<Vec<_>>();
    assert_eq!(active, vec![open_run.scheduling_id]);
}

#[tokio::test]
async fn given_unavailable_store_when_running_then_loop_returns_error() {
    let h = harness_with(Duration::from_millis(20), None);
    h.store.set_unavailable(true);
    let (_handle, signal) = stop_channel();

    let result = tokio::time::timeout(Duration::from_secs(2), h.bookkeeper.run(signal))
        .await
        .expect("run should end on its own");

    assert!(result.is_err());
}

#[tokio::test]
async fn given_running_loop_when_stopped_then_returns_within_one_interval() {
    let h = harness_with(Duration::from_millis(50), None);
    let (handle, signal) = stop_channel();
    let bookkeeper = h.bookkeeper.clone();
    let task = tokio::spawn(async move { bookkeeper.run(signal).await });

    tokio::time::sleep(Duration::from_millis(120)).await;
    handle.stop();

    let joined = tokio::time::timeout(Duration::from_millis(500), task).await;
    assert!(matches!(joined, Ok(Ok(Ok(())))));
}

#[tokio::test]
async fn given_workers_and_running_loop_then_run_completes() {
    let h = harness_with(Duration::from_millis(20), None);
    let (state, run) = h.start("runtime-1").await;

    let workers = h
        .operations(&run)
        .await
        .into_iter()
        .map(|op| {
            let repository = Arc::clone(&h.repository);
            tokio::spawn(async move {
                for next in [OperationState::InProgress, OperationState::Done] {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    repository
                        .update_operation_state(op.scheduling_id, op.correlation_id, next, None)
                        .await
                        .unwrap();
                }
            })
        })
        .collect::<Vec<_>>();

    let (handle, signal) = stop_channel();
    let bookkeeper = h.bookkeeper.clone();
    let looped = tokio::spawn(async move { bookkeeper.run(signal).await });

    for worker in workers {
        worker.await.unwrap();
    }

    let repository = Arc::clone(&h.repository);
    let finished = tokio::time::timeout(Duration::from_secs(2), async move {
        loop {
            if repository.get_reconciliation(run.scheduling_id).await.unwrap().finished {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(finished.is_ok());

    handle.stop();
    looped.await.unwrap().unwrap();

    let latest = h.inventory.latest_status(state.config_version()).await.unwrap().unwrap();
    assert_eq!(latest.status, ClusterStatus::Ready);
}

#[tokio::test]
async fn given_publisher_when_run_starts_and_finishes_then_summaries_follow() {
    let target = Arc::new(InMemoryArtifactTarget::with_namespaces(["default", "istio-system"]));
    let h = harness_with(Duration::from_secs(1), Some(Arc::clone(&target)));
    let (_, run) = h.start("runtime-1").await;

    let istio = target.artifact("istio-system", "istio-status").await.unwrap();
    assert_eq!(istio.data["status"], "running");
    assert_eq!(istio.data["version"], "1.11.4");
    assert_eq!(target.len().await, 3);

    for op in h.operations(&run).await {
        let last = if op.component == "istio" {
            OperationState::Error
        } else {
            OperationState::Done
        };
        h.complete(&op, last).await;
    }
    h.bookkeeper.tick().await.unwrap();

    let istio = target.artifact("istio-system", "istio-status").await.unwrap();
    assert_eq!(istio.data["status"], "error");
    assert!(!istio.data["last-reconciliation"].is_empty());
    let serverless = target.artifact("default", "serverless-status").await.unwrap();
    assert_eq!(serverless.data["status"], "ready");
}

#[tokio::test]
async fn given_active_run_when_started_again_then_duplicate_lock() {
    let h = harness();
    let (state, _) = h.start("runtime-1").await;

    let err = h
        .transition
        .start_reconciliation(&state, ReconciliationOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        fleetkeeper_scheduler::Error::Persistence(fleetkeeper_persistence::PersistenceError::DuplicateLock { .. })
    ));
}
