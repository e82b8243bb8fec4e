//! Append-only cluster status history entity.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::UnmarshalError;
use crate::ids::StatusId;
use crate::marshal::{DatabaseEntity, Row, RowReader, RowWriter};
use crate::state::ClusterStatus;
use crate::timestamp;

/// Table name for cluster status history.
pub const TABLE_CLUSTER_STATUS: &str = "cluster_status";

/// One recorded status of a configuration version. Never updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClusterStatusEntity {
    pub id: StatusId,
    pub config_version: i64,
    pub status: ClusterStatus,
    pub created: DateTime<Utc>,
}

impl ClusterStatusEntity {
    /// Create a status row for a configuration version.
    pub fn new(config_version: i64, status: ClusterStatus, created: DateTime<Utc>) -> Self {
        Self {
            id: StatusId::new(),
            config_version,
            status,
            created: timestamp::truncate(created),
        }
    }
}

impl fmt::Display for ClusterStatusEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClusterStatusEntity [ConfigVersion={},Status={}]",
            self.config_version, self.status
        )
    }
}

impl DatabaseEntity for ClusterStatusEntity {
    const TABLE: &'static str = TABLE_CLUSTER_STATUS;

    fn new_entity() -> Self {
        Self::default()
    }

    // The surrogate id is stored as `status_id`; `id` belongs to the store.
    fn marshal(&self) -> Row {
        RowWriter::new()
            .string("status_id", self.id.to_string())
            .int("config_version", self.config_version)
            .string("status", self.status.as_str())
            .timestamp("created", self.created)
            .build()
    }

    fn unmarshal(row: &Row) -> Result<Self, UnmarshalError> {
        let r = RowReader::new(Self::TABLE, row);
        Ok(Self {
            id: r.parse("status_id")?,
            config_version: r.int("config_version")?,
            status: r.parse("status")?,
            created: r.timestamp("created")?,
        })
    }

    fn equal(&self, other: &Self) -> bool {
        self.config_version == other.config_version && self.status == other.status
    }
}
