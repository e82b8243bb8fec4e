//! Bookkeeper loop: reaps orphaned operations and closes completed runs.
//!
//! Every `operations_watch_interval` the bookkeeper lists unfinished runs and,
//! one run at a time:
//!
//! 1. reaps non-terminal operations that made no progress within
//!    `orphan_operation_timeout` (and any leftover `Orphan`) to `Error`;
//! 2. finishes the run through [`ClusterStatusTransition`] once every
//!    operation is terminal.
//!
//! A failure on one run is logged and the tick moves on. Failing to list runs
//! ends the loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetkeeper_model::{OperationEntity, OperationState, ReconciliationEntity};
use fleetkeeper_persistence::{system_clock, Filter, OrphanReap, ReconciliationRepository, SharedClock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::BookkeeperConfig;
use crate::error::Result;
use crate::stop::StopSignal;
use crate::transition::ClusterStatusTransition;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Unfinished runs looked at.
    pub inspected: usize,
    /// Operations moved to `Error` as orphans.
    pub reaped: usize,
    /// Runs finished.
    pub finished: usize,
    /// Runs whose processing failed.
    pub failed: usize,
}

/// Outcome of processing one run.
#[derive(Debug, Clone, Copy, Default)]
struct RunOutcome {
    reaped: usize,
    finished: bool,
}

/// Periodic watcher of unfinished reconciliation runs.
#[derive(Clone)]
pub struct Bookkeeper {
    repository: Arc<dyn ReconciliationRepository>,
    transition: ClusterStatusTransition,
    config: BookkeeperConfig,
    clock: SharedClock,
}

impl Bookkeeper {
    /// Create a bookkeeper using the wall clock.
    pub fn new(transition: ClusterStatusTransition, config: BookkeeperConfig) -> Self {
        Self::with_clock(transition, config, system_clock())
    }

    /// Create a bookkeeper reading time from `clock`.
    pub fn with_clock(transition: ClusterStatusTransition, config: BookkeeperConfig, clock: SharedClock) -> Self {
        Self {
            repository: Arc::clone(transition.repository()),
            transition,
            config,
            clock,
        }
    }

    /// The loop timing.
    #[must_use]
    pub const fn config(&self) -> &BookkeeperConfig {
        &self.config
    }

    /// Tick until `stop` fires.
    ///
    /// The first tick runs immediately. A stop request is honoured between
    /// ticks, never in the middle of one.
    ///
    /// # Errors
    ///
    /// Returns the error of a tick that could not list unfinished runs.
    pub async fn run(&self, mut stop: StopSignal) -> Result<()> {
        let interval = self.config.operations_watch_interval();
        info!(
            interval_secs = interval.as_secs_f64(),
            orphan_timeout_secs = self.config.orphan_operation_timeout().as_secs(),
            "Bookkeeper started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = stop.stopped() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "Bookkeeper tick failed, stopping");
                return Err(e);
            }
        }

        info!("Bookkeeper stopped");
        Ok(())
    }

    /// Inspect every unfinished run once.
    ///
    /// # Errors
    ///
    /// Returns an error only if unfinished runs cannot be listed; failures on
    /// individual runs are logged and counted in [`TickReport::failed`].
    pub async fn tick(&self) -> Result<TickReport> {
        let now = self.clock.now();
        let reconciliations = self.repository.get_reconciliations(&Filter::active()).await?;

        let mut report = TickReport::default();
        for reconciliation in reconciliations {
            let reconciliation = match reconciliation {
                Ok(reconciliation) => reconciliation,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable reconciliation");
                    report.failed = report.failed.saturating_add(1);
                    continue;
                }
            };
            report.inspected = report.inspected.saturating_add(1);

            match self.process(&reconciliation, now).await {
                Ok(outcome) => {
                    report.reaped = report.reaped.saturating_add(outcome.reaped);
                    if outcome.finished {
                        report.finished = report.finished.saturating_add(1);
                    }
                }
                Err(e) if e.is_already_finished() => {
                    debug!(
                        scheduling_id = %reconciliation.scheduling_id,
                        "Reconciliation already finished by another bookkeeper"
                    );
                }
                Err(e) => {
                    warn!(
                        scheduling_id = %reconciliation.scheduling_id,
                        error = %e,
                        "Failed to process reconciliation"
                    );
                    report.failed = report.failed.saturating_add(1);
                }
            }
        }

        if report != TickReport::default() {
            debug!(
                inspected = report.inspected,
                reaped = report.reaped,
                finished = report.finished,
                failed = report.failed,
                "Bookkeeper tick done"
            );
        }
        Ok(report)
    }

    async fn process(&self, reconciliation: &ReconciliationEntity, now: DateTime<Utc>) -> Result<RunOutcome> {
        let scheduling_id = reconciliation.scheduling_id;
        let mut operations = self.repository.get_operations(scheduling_id).await?;

        let orphans = operations
            .iter()
            .filter(|op| self.is_orphaned(op, now))
            .map(OrphanReap::of)
            .collect::<Vec<_>>();

        let mut outcome = RunOutcome::default();
        if !orphans.is_empty() {
            let reason = format!(
                "orphaned: no progress within {}s",
                self.config.orphan_operation_timeout().as_secs()
            );
            let reaped = self.repository.reap_orphans(scheduling_id, &orphans, &reason).await?;
            for op in &reaped {
                info!(
                    scheduling_id = %scheduling_id,
                    correlation_id = %op.correlation_id,
                    component = %op.component,
                    "Reaped orphaned operation"
                );
            }
            outcome.reaped = reaped.len();
            replace_operations(&mut operations, reaped);
        }

        if let Some(pending) = operations.iter().find(|op| !op.state.is_terminal()) {
            debug!(
                scheduling_id = %scheduling_id,
                correlation_id = %pending.correlation_id,
                state = %pending.state,
                "Reconciliation still in progress"
            );
            return Ok(outcome);
        }

        let status = ClusterStatusTransition::outcome_for(&operations);
        self.transition.finish(reconciliation, status).await?;
        outcome.finished = true;
        Ok(outcome)
    }

    fn is_orphaned(&self, operation: &OperationEntity, now: DateTime<Utc>) -> bool {
        match operation.state {
            OperationState::Orphan => true,
            state if state.is_terminal() => false,
            _ => operation.age(now) > self.config.orphan_timeout_signed(),
        }
    }
}

impl std::fmt::Debug for Bookkeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bookkeeper")
            .field("config", &self.config)
            .field("transition", &self.transition)
            .finish_non_exhaustive()
    }
}

fn replace_operations(operations: &mut [OperationEntity], updated: Vec<OperationEntity>) {
    for op in updated {
        if let Some(slot) = operations
            .iter_mut()
            .find(|existing| existing.correlation_id == op.correlation_id)
        {
            *slot = op;
        }
    }
}
