//! Operation entity: one component's unit of work inside a run.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::UnmarshalError;
use crate::ids::{CorrelationId, SchedulingId};
use crate::marshal::{DatabaseEntity, Row, RowReader, RowWriter};
use crate::state::OperationState;
use crate::timestamp;

/// Table name for operations.
pub const TABLE_OPERATION: &str = "operation";

/// Unit of work identified by `(scheduling_id, correlation_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperationEntity {
    pub scheduling_id: SchedulingId,
    pub correlation_id: CorrelationId,
    pub runtime_id: String,
    pub component: String,
    pub namespace: String,
    pub state: OperationState,
    /// Free-text diagnostic, empty until a worker or the reaper sets one.
    pub reason: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl OperationEntity {
    /// Create a `New` operation for a component of a run.
    pub fn new(
        scheduling_id: SchedulingId,
        runtime_id: impl Into<String>,
        component: impl Into<String>,
        namespace: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Self {
        let created = timestamp::truncate(created);
        Self {
            scheduling_id,
            correlation_id: CorrelationId::new(),
            runtime_id: runtime_id.into(),
            component: component.into(),
            namespace: namespace.into(),
            state: OperationState::New,
            reason: String::new(),
            created,
            updated: created,
        }
    }

    /// Time since the last state change.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.updated)
    }
}

impl fmt::Display for OperationEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OperationEntity [SchedulingID={},CorrelationID={},Component={},State={}]",
            self.scheduling_id, self.correlation_id, self.component, self.state
        )
    }
}

impl DatabaseEntity for OperationEntity {
    const TABLE: &'static str = TABLE_OPERATION;

    fn new_entity() -> Self {
        Self::default()
    }

    fn marshal(&self) -> Row {
        RowWriter::new()
            .string("scheduling_id", self.scheduling_id.to_string())
            .string("correlation_id", self.correlation_id.to_string())
            .string("runtime_id", self.runtime_id.as_str())
            .string("component", self.component.as_str())
            .string("namespace", self.namespace.as_str())
            .string("state", self.state.as_str())
            .string("reason", self.reason.as_str())
            .timestamp("created", self.created)
            .timestamp("updated", self.updated)
            .build()
    }

    fn unmarshal(row: &Row) -> Result<Self, UnmarshalError> {
        let r = RowReader::new(Self::TABLE, row);
        Ok(Self {
            scheduling_id: r.parse("scheduling_id")?,
            correlation_id: r.parse("correlation_id")?,
            runtime_id: r.string("runtime_id")?,
            component: r.string("component")?,
            namespace: r.string("namespace")?,
            state: r.parse("state")?,
            reason: r.opt_string("reason")?.unwrap_or_default(),
            created: r.timestamp("created")?,
            updated: r.timestamp("updated")?,
        })
    }

    fn equal(&self, other: &Self) -> bool {
        self.scheduling_id == other.scheduling_id
            && self.correlation_id == other.correlation_id
            && self.runtime_id == other.runtime_id
            && self.component == other.component
            && self.namespace == other.namespace
            && self.state == other.state
            && self.reason == other.reason
    }
}
