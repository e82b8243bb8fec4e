//! Error types for the scheduler crate.

use fleetkeeper_persistence::PersistenceError;
use thiserror::Error;

/// Result type alias for scheduler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Scheduler error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Repository or inventory call failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Publishing a component status failed.
    #[error("publishing status of component '{component}' failed: {reason}")]
    Publish { component: String, reason: String },

    /// Configuration file could not be read or parsed.
    #[error("configuration parse error: {reason}")]
    ConfigParse { reason: String },
}

impl Error {
    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a publish error.
    pub fn publish(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Publish {
            component: component.into(),
            reason: reason.into(),
        }
    }

    /// Create a config parse error.
    pub fn config_parse(reason: impl Into<String>) -> Self {
        Self::ConfigParse {
            reason: reason.into(),
        }
    }

    /// Another bookkeeper finished the run first.
    #[must_use]
    pub const fn is_already_finished(&self) -> bool {
        matches!(self, Self::Persistence(PersistenceError::AlreadyFinished { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_config("interval must be positive");
        assert_eq!(err.to_string(), "invalid configuration: interval must be positive");

        let err = Error::publish("istio", "namespace lookup failed");
        assert_eq!(
            err.to_string(),
            "publishing status of component 'istio' failed: namespace lookup failed"
        );
    }

    #[test]
    fn test_persistence_error_is_transparent() {
        let err: Error = PersistenceError::not_found("reconciliation", "run-1").into();
        assert_eq!(err.to_string(), "record not found: reconciliation with id 'run-1'");
        assert!(!err.is_already_finished());

        let err: Error = PersistenceError::already_finished("run-1").into();
        assert!(err.is_already_finished());
    }
}
