//! SurrealDB reconciliation repository.
//!
//! Multi-statement writes run as one `BEGIN TRANSACTION ... COMMIT
//! TRANSACTION` query. Guards inside a transaction `THROW` a marker string;
//! the markers are mapped back to typed errors after the query returns.

use async_trait::async_trait;
use fleetkeeper_model::{
    timestamp, ClusterState, ClusterStatusEntity, CorrelationId, DatabaseEntity, OperationEntity,
    OperationState, ReconciliationEntity, SchedulingId,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    check_reap, check_transition, plan_operations, reaped, sort_operations, FinishOutcome, OrphanReap,
    ReconciliationOptions, ReconciliationRepository, MAX_UPDATE_ATTEMPTS,
};
use crate::client::{statement_errors, Bindings, StoreClient};
use crate::clock::{system_clock, SharedClock};
use crate::error::{from_surrealdb_error, PersistenceError, PersistenceResult};
use crate::filter::Filter;
use crate::iter::EntityIter;

const MARK_NOT_FOUND: &str = "fleetkeeper:not_found";
const MARK_ALREADY_FINISHED: &str = "fleetkeeper:already_finished";
const MARK_STATE_CHANGED: &str = "fleetkeeper:state_changed";

/// Append the status bound to `$status`, stamped with the next append
/// position of its config version.
const APPEND_STATUS: &str = "LET $seq = (UPSERT type::thing('status_sequence', $status.config_version) \
     SET value = (value OR 0) + 1 RETURN VALUE value)[0];\n\
     CREATE cluster_status CONTENT $status;\n\
     UPDATE cluster_status SET seq = $seq WHERE status_id = $status.status_id;\n";

/// Repository over a [`StoreClient`].
#[derive(Clone)]
pub struct SurrealReconciliationRepository {
    client: StoreClient,
    clock: SharedClock,
}

impl SurrealReconciliationRepository {
    /// Create a repository using the wall clock.
    pub fn new(client: StoreClient) -> Self {
        Self::with_clock(client, system_clock())
    }

    /// Create a repository using `clock`.
    pub fn with_clock(client: StoreClient, clock: SharedClock) -> Self {
        Self { client, clock }
    }

    /// Run holding the lock of `config_version`, if any.
    async fn lock_holder(&self, config_version: i64) -> PersistenceResult<Option<String>> {
        let rows = self
            .client
            .select_rows(
                "SELECT scheduling_id FROM reconciliation_lock WHERE config_version = $config_version;",
                vec![("config_version".to_string(), Value::from(config_version))],
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("scheduling_id"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

impl std::fmt::Debug for SurrealReconciliationRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealReconciliationRepository")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

fn run_binding(scheduling_id: SchedulingId) -> (String, Value) {
    ("scheduling_id".to_string(), Value::from(scheduling_id.to_string()))
}

fn row_value(row: fleetkeeper_model::Row) -> Value {
    Value::Object(row)
}

/// The statement error that caused a transaction to fail.
fn root_error(errors: &[String]) -> Option<&String> {
    errors
        .iter()
        .find(|err| !err.contains("not executed"))
        .or_else(|| errors.first())
}

/// Map the failed statements of a transaction to a typed error.
fn transaction_error(errors: &[String], entity: &str, id: &str) -> Option<PersistenceError> {
    let first = root_error(errors)?;
    let err = if errors.iter().any(|e| e.contains(MARK_NOT_FOUND)) {
        PersistenceError::not_found(entity, id)
    } else if errors.iter().any(|e| e.contains(MARK_ALREADY_FINISHED)) {
        PersistenceError::already_finished(id)
    } else if errors.iter().any(|e| e.contains(MARK_STATE_CHANGED)) {
        PersistenceError::transaction_failed(format!("operation state of {id} changed concurrently"))
    } else {
        from_surrealdb_error(first)
    };
    Some(err)
}

#[async_trait]
impl ReconciliationRepository for SurrealReconciliationRepository {
    async fn create_reconciliation(
        &self,
        state: &ClusterState,
        options: &ReconciliationOptions,
    ) -> PersistenceResult<ReconciliationEntity> {
        let now = self.clock.now();
        let reconciliation = ReconciliationEntity::new(state.runtime_id(), state.config_version(), now);
        let operations = plan_operations(state, options, reconciliation.scheduling_id, now)?;
        let version = reconciliation.cluster_config_version;

        let mut sql = String::from(
            "BEGIN TRANSACTION;\n\
             CREATE type::thing('reconciliation_lock', $config_version) CONTENT $lock;\n\
             CREATE reconciliation CONTENT $reconciliation;\n\
             INSERT INTO operation $operations;\n",
        );
        let mut bindings: Bindings = vec![
            ("config_version".to_string(), Value::from(version)),
            (
                "lock".to_string(),
                json!({
                    "config_version": version,
                    "scheduling_id": reconciliation.scheduling_id.to_string(),
                    "lock": reconciliation.lock.as_str(),
                    "created": timestamp::to_micros(now),
                }),
            ),
            ("reconciliation".to_string(), row_value(reconciliation.marshal())),
            (
                "operations".to_string(),
                Value::Array(operations.iter().map(|op| row_value(op.marshal())).collect()),
            ),
        ];
        if let Some(status) = options.initial_status {
            sql.push_str(APPEND_STATUS);
            let entity = ClusterStatusEntity::new(version, status, now);
            bindings.push(("status".to_string(), row_value(entity.marshal())));
        }
        sql.push_str("COMMIT TRANSACTION;");

        let failure = match self.client.execute(&sql, bindings).await {
            Ok(mut response) => {
                let errors = statement_errors(&mut response);
                root_error(&errors).map(|first| {
                    let lock_taken = errors
                        .iter()
                        .any(|err| err.contains("reconciliation_lock") && err.contains("already exists"));
                    (from_surrealdb_error(first), lock_taken)
                })
            }
            Err(err) => Some((err, false)),
        };
        if let Some((err, lock_taken)) = failure {
            // A creator racing another one for the same version may see a
            // commit conflict instead of the duplicate record.
            if let Some(holder) = self.lock_holder(version).await? {
                debug!(config_version = version, holder = %holder, error = %err, "Lost the race for the run lock");
                return Err(PersistenceError::duplicate_lock(version, holder));
            }
            if lock_taken {
                return Err(PersistenceError::duplicate_lock(version, "unknown"));
            }
            return Err(err);
        }

        info!(
            scheduling_id = %reconciliation.scheduling_id,
            runtime_id = %reconciliation.runtime_id,
            config_version = version,
            operations = operations.len(),
            "Created reconciliation"
        );
        Ok(reconciliation)
    }

    async fn get_reconciliation(&self, scheduling_id: SchedulingId) -> PersistenceResult<ReconciliationEntity> {
        let rows = self
            .client
            .select_rows(
                "SELECT * OMIT id FROM reconciliation WHERE scheduling_id = $scheduling_id;",
                vec![run_binding(scheduling_id)],
            )
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| PersistenceError::not_found("reconciliation", scheduling_id.to_string()))?;
        Ok(ReconciliationEntity::unmarshal(row)?)
    }

    async fn get_reconciliations(&self, filter: &Filter) -> PersistenceResult<EntityIter<ReconciliationEntity>> {
        let mut bindings = Bindings::new();
        let condition = filter.to_surql(&mut bindings);
        let sql = format!("SELECT * OMIT id FROM reconciliation WHERE {condition} ORDER BY created ASC;");
        let rows = self.client.select_rows(&sql, bindings).await?;
        Ok(EntityIter::new(rows))
    }

    async fn get_operations(&self, scheduling_id: SchedulingId) -> PersistenceResult<Vec<OperationEntity>> {
        let rows = self
            .client
            .select_rows(
                "SELECT * OMIT id FROM operation WHERE scheduling_id = $scheduling_id \
                 ORDER BY created ASC, correlation_id ASC;",
                vec![run_binding(scheduling_id)],
            )
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
        let rows = self
            .client
            .select_rows(
                "SELECT * OMIT id FROM operation \
                 WHERE scheduling_id = $scheduling_id AND correlation_id = $correlation_id;",
                vec![
                    run_binding(scheduling_id),
                    ("correlation_id".to_string(), Value::from(correlation_id.to_string())),
                ],
            )
            .await?;
        let row = rows.first().ok_or_else(|| {
            PersistenceError::not_found("operation", format!("{scheduling_id}/{correlation_id}"))
        })?;
        Ok(OperationEntity::unmarshal(row)?)
    }

    async fn update_operation_state(
        &self,
        scheduling_id: SchedulingId,
        correlation_id: CorrelationId,
        state: OperationState,
        reason: Option<&str>,
    ) -> PersistenceResult<OperationEntity> {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let mut operation = self.get_operation(scheduling_id, correlation_id).await?;
            check_transition(operation.state, state)?;

            let expected = operation.state;
            operation.state = state;
            if let Some(reason) = reason {
                operation.reason = reason.to_string();
            }
            operation.updated = self.clock.now();

            let mut response = self
                .client
                .execute_checked(
                    "UPDATE operation SET state = $state, reason = $reason, updated = $updated \
                     WHERE scheduling_id = $scheduling_id AND correlation_id = $correlation_id \
                     AND state = $expected RETURN correlation_id;",
                    vec![
                        run_binding(scheduling_id),
                        ("correlation_id".to_string(), Value::from(correlation_id.to_string())),
                        ("state".to_string(), Value::from(state.as_str())),
                        ("expected".to_string(), Value::from(expected.as_str())),
                        ("reason".to_string(), Value::from(operation.reason.as_str())),
                        ("updated".to_string(), Value::from(timestamp::to_micros(operation.updated))),
                    ],
                )
                .await?;
            let matched: Vec<Value> = response.take(0).map_err(from_surrealdb_error)?;

            if !matched.is_empty() {
                debug!(
                    scheduling_id = %scheduling_id,
                    correlation_id = %correlation_id,
                    from = %expected,
                    to = %state,
                    "Updated operation state"
                );
                return Ok(operation);
            }
            debug!(
                correlation_id = %correlation_id,
                attempt,
                "Operation state changed concurrently, re-reading"
            );
        }

        warn!(correlation_id = %correlation_id, "Giving up operation update after concurrent changes");
        Err(PersistenceError::transaction_failed(format!(
            "operation {correlation_id} kept changing after {MAX_UPDATE_ATTEMPTS} attempts"
        )))
    }

    async fn reap_orphans(
        &self,
        scheduling_id: SchedulingId,
        reaps: &[OrphanReap],
        reason: &str,
    ) -> PersistenceResult<Vec<OperationEntity>> {
        if reaps.is_empty() {
            return Ok(Vec::new());
        }
        for reap in reaps {
            check_reap(reap.expected)?;
        }

        // Reaping changes only state, reason and update time. The guards below
        // make these derived rows exactly what the transaction commits.
        let current = self.get_operations(scheduling_id).await?;
        let now = self.clock.now();
        let reaped_operations = reaps
            .iter()
            .map(|reap| {
                current
                    .iter()
                    .find(|op| op.correlation_id == reap.correlation_id)
                    .cloned()
                    .map(|operation| reaped(operation, reason, now))
                    .ok_or_else(|| {
                        PersistenceError::not_found("operation", format!("{scheduling_id}/{}", reap.correlation_id))
                    })
            })
            .collect::<PersistenceResult<Vec<_>>>()?;

        let mut sql = String::from("BEGIN TRANSACTION;\n");
        let mut bindings: Bindings = vec![
            run_binding(scheduling_id),
            ("reason".to_string(), Value::from(reason)),
            ("updated".to_string(), Value::from(timestamp::to_micros(now))),
            ("error".to_string(), Value::from(OperationState::Error.as_str())),
        ];
        for (i, reap) in reaps.iter().enumerate() {
            sql.push_str(&format!(
                "LET $r{i} = (UPDATE operation SET state = $error, reason = $reason, updated = $updated \
                 WHERE scheduling_id = $scheduling_id AND correlation_id = $c{i} AND state = $e{i} \
                 RETURN correlation_id);\n\
                 IF array::len($r{i}) = 0 {{ THROW \"{MARK_STATE_CHANGED}\" }};\n"
            ));
            bindings.push((format!("c{i}"), Value::from(reap.correlation_id.to_string())));
            bindings.push((format!("e{i}"), Value::from(reap.expected.as_str())));
        }
        sql.push_str("COMMIT TRANSACTION;");

        let mut response = self.client.execute(&sql, bindings).await?;
        if let Some(err) = transaction_error(&statement_errors(&mut response), "operation", &scheduling_id.to_string()) {
            return Err(err);
        }

        debug!(scheduling_id = %scheduling_id, reaped = reaped_operations.len(), "Reaped orphaned operations");
        Ok(reaped_operations)
    }

    async fn finish_reconciliation(
        &self,
        scheduling_id: SchedulingId,
        outcome: &FinishOutcome,
    ) -> PersistenceResult<ReconciliationEntity> {
        // The config version never changes, so it can be read up front.
        let current = self.get_reconciliation(scheduling_id).await?;
        if current.finished {
            return Err(PersistenceError::already_finished(scheduling_id.to_string()));
        }

        let now = self.clock.now();
        let mut bindings: Bindings = vec![
            run_binding(scheduling_id),
            ("finished_at".to_string(), Value::from(timestamp::to_micros(now))),
        ];

        let set_reason = match &outcome.reason {
            Some(reason) => {
                bindings.push(("reason".to_string(), Value::from(reason.as_str())));
                ", reason = $reason"
            }
            None => "",
        };
        let mut sql = format!(
            "BEGIN TRANSACTION;\n\
             LET $existing = (SELECT scheduling_id FROM reconciliation WHERE scheduling_id = $scheduling_id);\n\
             IF array::len($existing) = 0 {{ THROW \"{MARK_NOT_FOUND}\" }};\n\
             LET $updated = (UPDATE reconciliation SET finished = true, finished_at = $finished_at{set_reason} \
             WHERE scheduling_id = $scheduling_id AND finished = false RETURN scheduling_id);\n\
             IF array::len($updated) = 0 {{ THROW \"{MARK_ALREADY_FINISHED}\" }};\n\
             DELETE reconciliation_lock WHERE scheduling_id = $scheduling_id;\n"
        );
        if let Some(status) = outcome.status {
            sql.push_str(APPEND_STATUS);
            let entity = ClusterStatusEntity::new(current.cluster_config_version, status, now);
            bindings.push(("status".to_string(), row_value(entity.marshal())));
        }
        sql.push_str("COMMIT TRANSACTION;");

        let mut response = self.client.execute(&sql, bindings).await?;
        let sid = scheduling_id.to_string();
        if let Some(err) = transaction_error(&statement_errors(&mut response), "reconciliation", &sid) {
            return Err(err);
        }

        let reconciliation = self.get_reconciliation(scheduling_id).await?;
        info!(
            scheduling_id = %scheduling_id,
            config_version = reconciliation.cluster_config_version,
            status = ?outcome.status,
            "Finished reconciliation"
        );
        Ok(reconciliation)
    }

    async fn remove_reconciliation(&self, scheduling_id: SchedulingId) -> PersistenceResult<()> {
        let sql = format!(
            "BEGIN TRANSACTION;\n\
             LET $removed = (DELETE reconciliation WHERE scheduling_id = $scheduling_id RETURN BEFORE);\n\
             IF array::len($removed) = 0 {{ THROW \"{MARK_NOT_FOUND}\" }};\n\
             DELETE operation WHERE scheduling_id = $scheduling_id;\n\
             DELETE reconciliation_lock WHERE scheduling_id = $scheduling_id;\n\
             COMMIT TRANSACTION;"
        );
        let mut response = self.client.execute(&sql, vec![run_binding(scheduling_id)]).await?;
        if let Some(err) = transaction_error(
            &statement_errors(&mut response),
            "reconciliation",
            &scheduling_id.to_string(),
        ) {
            return Err(err);
        }

        info!(scheduling_id = %scheduling_id, "Removed reconciliation");
        Ok(())
    }
}
