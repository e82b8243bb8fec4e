//! In-memory store shared by the in-memory repository and inventory.
//!
//! Tables hold marshalled rows, so every read goes through `unmarshal` just
//! like the database-backed implementations. A transaction runs against a
//! copy of the tables and is committed only if it returns `Ok`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fleetkeeper_model::{Row, SchedulingId};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{PersistenceError, PersistenceResult};
use crate::inventory::STATUS_SEQUENCE;

/// Tables of the in-memory store.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub reconciliations: Vec<Row>,
    pub operations: Vec<Row>,
    /// Active config version to the run holding its lock.
    pub locks: HashMap<i64, SchedulingId>,
    pub cluster_statuses: Vec<Row>,
    pub cluster_configs: Vec<Row>,
    pub config_version_sequence: i64,
    pub status_sequence: i64,
}

impl Tables {
    /// Append a status row, stamping it with the next append position.
    pub fn append_status(&mut self, mut row: Row) {
        self.status_sequence = self.status_sequence.saturating_add(1);
        row.insert(STATUS_SEQUENCE.to_string(), Value::from(self.status_sequence));
        self.cluster_statuses.push(row);
    }
}

/// Mutex-guarded tables standing in for a transactional store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make every subsequent call fail with `StoreUnavailable` (or recover).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> PersistenceResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(PersistenceError::store_unavailable("in-memory store marked unavailable"))
        } else {
            Ok(())
        }
    }

    /// Run `f` atomically; changes are discarded when it fails.
    pub(crate) async fn transaction<T>(
        &self,
        f: impl FnOnce(&mut Tables) -> PersistenceResult<T>,
    ) -> PersistenceResult<T> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let mut working = tables.clone();
        let result = f(&mut working)?;
        *tables = working;
        Ok(result)
    }

    /// Run a read-only closure over the tables.
    pub(crate) async fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> PersistenceResult<T> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(f(&tables))
    }
}

/// String field of a stored row.
pub(crate) fn field_str<'a>(row: &'a Row, field: &str) -> Option<&'a str> {
    row.get(field).and_then(Value::as_str)
}

/// Integer field of a stored row.
pub(crate) fn field_i64(row: &Row, field: &str) -> Option<i64> {
    row.get(field).and_then(Value::as_i64)
}
