//! Reconciliation run entity.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::UnmarshalError;
use crate::ids::{LockToken, SchedulingId};
use crate::marshal::{DatabaseEntity, Row, RowReader, RowWriter};
use crate::timestamp;

/// Table name for reconciliation runs.
pub const TABLE_RECONCILIATION: &str = "reconciliation";

/// One orchestration run for a cluster configuration version.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconciliationEntity {
    /// Run identifier.
    pub scheduling_id: SchedulingId,
    /// Cluster the run belongs to.
    pub runtime_id: String,
    /// Configuration version being reconciled.
    pub cluster_config_version: i64,
    /// Ownership token acquired at creation.
    pub lock: LockToken,
    /// Flips to true exactly once.
    pub finished: bool,
    /// Diagnostic set when the run was closed without recording a status.
    pub reason: Option<String>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// When the run was marked finished.
    pub finished_at: Option<DateTime<Utc>>,
}

impl ReconciliationEntity {
    /// Create a new, unfinished run with a fresh scheduling id and lock.
    pub fn new(runtime_id: impl Into<String>, cluster_config_version: i64, created: DateTime<Utc>) -> Self {
        Self {
            scheduling_id: SchedulingId::new(),
            runtime_id: runtime_id.into(),
            cluster_config_version,
            lock: LockToken::generate(),
            finished: false,
            reason: None,
            created: timestamp::truncate(created),
            finished_at: None,
        }
    }
}

impl fmt::Display for ReconciliationEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReconciliationEntity [SchedulingID={},RuntimeID={},ConfigVersion={},Finished={}]",
            self.scheduling_id, self.runtime_id, self.cluster_config_version, self.finished
        )
    }
}

impl DatabaseEntity for ReconciliationEntity {
    const TABLE: &'static str = TABLE_RECONCILIATION;

    fn new_entity() -> Self {
        Self::default()
    }

    fn marshal(&self) -> Row {
        RowWriter::new()
            .string("scheduling_id", self.scheduling_id.to_string())
            .string("runtime_id", self.runtime_id.as_str())
            .int("cluster_config_version", self.cluster_config_version)
            .string("lock", self.lock.as_str())
            .bool("finished", self.finished)
            .opt_string("reason", self.reason.as_deref())
            .timestamp("created", self.created)
            .opt_timestamp("finished_at", self.finished_at)
            .build()
    }

    fn unmarshal(row: &Row) -> Result<Self, UnmarshalError> {
        let r = RowReader::new(Self::TABLE, row);
        Ok(Self {
            scheduling_id: r.parse("scheduling_id")?,
            runtime_id: r.string("runtime_id")?,
            cluster_config_version: r.int("cluster_config_version")?,
            lock: LockToken::from_stored(r.string("lock")?),
            finished: r.bool("finished")?,
            reason: r.opt_string("reason")?,
            created: r.timestamp("created")?,
            finished_at: r.opt_timestamp("finished_at")?,
        })
    }

    fn equal(&self, other: &Self) -> bool {
        self.scheduling_id == other.scheduling_id
            && self.runtime_id == other.runtime_id
            && self.cluster_config_version == other.cluster_config_version
            && self.lock == other.lock
            && self.finished == other.finished
    }
}
