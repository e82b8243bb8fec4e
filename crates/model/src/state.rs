//! Closed enumerations stored as strings: cluster status and operation state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UnmarshalError;

/// Overall status of a cluster configuration version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    /// No reconciliation has been scheduled yet.
    #[default]
    NotStarted,
    /// A reconciliation run is active.
    Running,
    /// The last run finished and every operation succeeded.
    Ready,
    /// The last run finished with at least one failed operation.
    Error,
}

impl ClusterStatus {
    /// All values, in declaration order.
    pub const ALL: [Self; 4] = [Self::NotStarted, Self::Running, Self::Ready, Self::Error];

    /// Stored representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    /// Whether the status closes a run.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ClusterStatus {
    type Err = UnmarshalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnmarshalError::invalid_value("", "", s, "unknown cluster status"))
    }
}

/// Lifecycle of one operation.
///
/// ```text
/// New ──► Pending ──► InProgress ──► Done | Error | Failed
///  │         │            │
///  └─────────┴────────────┴──► Orphan ──► Error
/// ```
///
/// Workers may also claim a `New` operation directly into `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Created with its run, not yet picked up.
    #[default]
    New,
    /// Queued for a worker.
    Pending,
    /// A worker is applying the component.
    InProgress,
    /// Terminal: the component was reconciled.
    Done,
    /// Terminal: the component could not be reconciled.
    Error,
    /// Terminal: the worker gave up after retries.
    Failed,
    /// Marker for an operation without progress beyond the orphan timeout.
    Orphan,
}

impl OperationState {
    /// All values, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::New,
        Self::Pending,
        Self::InProgress,
        Self::Done,
        Self::Error,
        Self::Failed,
        Self::Orphan,
    ];

    /// Stored representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Error => "error",
            Self::Failed => "failed",
            Self::Orphan => "orphan",
        }
    }

    /// Check if this is a terminal state.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Failed)
    }

    /// Check if this is a terminal failure.
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Error | Self::Failed)
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: Self) -> bool {
        use OperationState::*;
        matches!(
            (self, target),
            // From New
            (New, Pending)
                | (New, InProgress) // Claimed directly
                | (New, Orphan)
                // From Pending
                | (Pending, InProgress)
                | (Pending, Orphan)
                // From InProgress
                | (InProgress, Done)
                | (InProgress, Error)
                | (InProgress, Failed)
                | (InProgress, Orphan)
                // From Orphan
                | (Orphan, Error)
        )
    }

    /// Get valid transitions from this state.
    pub fn valid_transitions(&self) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|target| self.can_transition_to(*target))
            .collect()
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = UnmarshalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnmarshalError::invalid_value("", "", s, "unknown operation state"))
    }
}
