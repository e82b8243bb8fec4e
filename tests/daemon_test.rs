//! Daemon wiring against SurrealDB's in-memory engine.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use fleetkeeper::daemon::Daemon;
use fleetkeeper::fleetkeeper_persistence::{
    Inventory, ReconciliationOptions, ReconciliationRepository, SurrealInventory, SurrealReconciliationRepository,
};
use fleetkeeper::fleetkeeper_scheduler::{AppConfig, stop_channel};
use fleetkeeper_model::{ClusterConfig, ClusterStatus, ComponentSpec, OperationState};

const CONFIG: &str = r#"
[store]
url = "mem://"
namespace = "fleetkeeper"
database = "daemon_test"

[bookkeeper]
operations_watch_interval_secs = 1
orphan_operation_timeout_secs = 600
"#;

macro_rules! require_daemon {
    () => {
        match Daemon::connect(&AppConfig::from_toml_str(CONFIG).unwrap(), false).await {
            Ok(daemon) => daemon,
            Err(e) => {
                eprintln!("Skipping test: store setup failed: {e:#}");
                return;
            }
        }
    };
}

#[tokio::test]
async fn given_memory_store_when_connected_then_schema_ready_and_tick_is_empty() {
    let daemon = require_daemon!();

    let report = daemon.bookkeeper().tick().await.unwrap();
    assert_eq!(report.inspected, 0);
}

#[tokio::test]
async fn given_completed_run_when_ticked_then_finished_with_ready_status() {
    let daemon = require_daemon!();
    let client = daemon.client().clone();
    let repository = SurrealReconciliationRepository::new(client.clone());
    let inventory = SurrealInventory::new(client);

    let config = ClusterConfig::new("runtime-1", "2.4.0")
        .with_component(ComponentSpec::new("istio").with_namespace("istio-system"))
        .with_component(ComponentSpec::new("serverless"));
    let state = inventory.create_or_update(&config).await.unwrap();
    let run = repository
        .create_reconciliation(&state, &ReconciliationOptions::new().with_initial_status(ClusterStatus::Running))
        .await
        .unwrap();

    for op in repository.get_operations(run.scheduling_id).await.unwrap() {
        for next in [OperationState::InProgress, OperationState::Done] {
            repository
                .update_operation_state(op.scheduling_id, op.correlation_id, next, None)
                .await
                .unwrap();
        }
    }

    let report = daemon.bookkeeper().tick().await.unwrap();
    assert_eq!(report.finished, 1);

    let run = repository.get_reconciliation(run.scheduling_id).await.unwrap();
    assert!(run.finished);
    let latest = inventory.latest_status(state.config_version()).await.unwrap().unwrap();
    assert_eq!(latest.status, ClusterStatus::Ready);
}

#[tokio::test]
async fn given_running_daemon_when_stopped_then_run_returns_ok() {
    let daemon = require_daemon!();
    let (handle, signal) = stop_channel();

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop();
    });

    let result = tokio::time::timeout(Duration::from_secs(3), daemon.run(signal)).await;
    stopper.await.unwrap();
    assert!(matches!(result, Ok(Ok(()))));
}

#[tokio::test]
async fn given_unreachable_store_when_connecting_then_error_names_url() {
    let config = AppConfig::from_toml_str(
        r#"
        [store]
        url = "unknown://nowhere"

        [bookkeeper]
        operations_watch_interval_secs = 1
        orphan_operation_timeout_secs = 1
        "#,
    )
    .unwrap();

    let err = Daemon::connect(&config, false).await.unwrap_err();
    assert!(format!("{err:#}").contains("unknown://nowhere"));
}
