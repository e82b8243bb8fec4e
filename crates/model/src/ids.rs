//! Identifier newtypes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;
use uuid::Uuid;

use crate::error::UnmarshalError;

/// Unique identifier of one reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchedulingId(Uuid);

impl SchedulingId {
    /// Create a new random scheduling ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The nil ID, used by zero-value entities.
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Get the inner UUID.
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SchedulingId {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for SchedulingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SchedulingId {
    type Err = UnmarshalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| UnmarshalError::invalid_value("", "", s, e.to_string()))
    }
}

/// Identifier of one operation inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Create a new random correlation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The nil ID, used by zero-value entities.
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = UnmarshalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| UnmarshalError::invalid_value("", "", s, e.to_string()))
    }
}

/// Surrogate identifier of a cluster status history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatusId(Ulid);

impl StatusId {
    /// Create a new status ID. ULIDs sort by creation time.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// The nil ID, used by zero-value entities.
    pub const fn nil() -> Self {
        Self(Ulid::nil())
    }
}

impl Default for StatusId {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for StatusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StatusId {
    type Err = UnmarshalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| UnmarshalError::invalid_value("", "", s, e.to_string()))
    }
}

/// Opaque token proving exclusive ownership of a run.
///
/// Generated randomly at creation; never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LockToken(String);

impl LockToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wrap a stored token.
    pub fn from_stored(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the token is empty (zero-value entities only).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduling_id_parse_roundtrip() {
        let id = SchedulingId::new();
        let parsed: SchedulingId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_scheduling_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<SchedulingId>().is_err());
    }

    #[test]
    fn test_status_id_rejects_garbage() {
        assert!("???".parse::<StatusId>().is_err());
    }

    #[test]
    fn test_lock_tokens_are_unique() {
        let a = LockToken::generate();
        let b = LockToken::generate();
        assert_ne!(a, b);
        assert!(!a.is_empty());
        assert!(LockToken::default().is_empty());
    }
}
