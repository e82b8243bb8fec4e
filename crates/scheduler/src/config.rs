//! Configuration of the bookkeeper and the daemon.
//!
//! ```toml
//! [store]
//! url = "mem://"
//!
//! [bookkeeper]
//! operations_watch_interval_secs = 30
//! orphan_operation_timeout_secs = 600
//! ```

use std::path::Path;
use std::time::Duration;

use fleetkeeper_persistence::StoreConfig;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Timing of the bookkeeper loop. Both values are required and non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawBookkeeperConfig")]
pub struct BookkeeperConfig {
    operations_watch_interval: Duration,
    orphan_operation_timeout: Duration,
}

impl BookkeeperConfig {
    /// Create a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if either duration is zero or the
    /// timeout is too large to compare with timestamps.
    pub fn new(operations_watch_interval: Duration, orphan_operation_timeout: Duration) -> Result<Self> {
        if operations_watch_interval.is_zero() {
            return Err(Error::invalid_config("operations watch interval must be greater than zero"));
        }
        if orphan_operation_timeout.is_zero() {
            return Err(Error::invalid_config("orphan operation timeout must be greater than zero"));
        }
        chrono::Duration::from_std(orphan_operation_timeout)
            .map_err(|e| Error::invalid_config(format!("orphan operation timeout out of range: {e}")))?;

        Ok(Self {
            operations_watch_interval,
            orphan_operation_timeout,
        })
    }

    /// How often the bookkeeper inspects active runs.
    #[must_use]
    pub const fn operations_watch_interval(&self) -> Duration {
        self.operations_watch_interval
    }

    /// How long an operation may go without progress.
    #[must_use]
    pub const fn orphan_operation_timeout(&self) -> Duration {
        self.orphan_operation_timeout
    }

    /// The timeout as a signed duration; validated in [`Self::new`].
    pub(crate) fn orphan_timeout_signed(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.orphan_operation_timeout).unwrap_or(chrono::Duration::MAX)
    }
}

/// Seconds-based form used in configuration files.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBookkeeperConfig {
    operations_watch_interval_secs: u64,
    orphan_operation_timeout_secs: u64,
}

impl TryFrom<RawBookkeeperConfig> for BookkeeperConfig {
    type Error = Error;

    fn try_from(raw: RawBookkeeperConfig) -> Result<Self> {
        Self::new(
            Duration::from_secs(raw.operations_watch_interval_secs),
            Duration::from_secs(raw.orphan_operation_timeout_secs),
        )
    }
}

/// Daemon configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    /// Store connection.
    pub store: StoreConfig,
    /// Bookkeeper timing.
    pub bookkeeper: BookkeeperConfig,
}

impl AppConfig {
    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] if the text is not valid configuration.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::config_parse(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config_parse(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_durations() {
        assert!(BookkeeperConfig::new(Duration::from_secs(30), Duration::from_secs(600)).is_ok());
        assert!(matches!(
            BookkeeperConfig::new(Duration::ZERO, Duration::from_secs(600)),
            Err(Error::InvalidConfig { .. })
        ));
        assert!(matches!(
            BookkeeperConfig::new(Duration::from_secs(30), Duration::ZERO),
            Err(Error::InvalidConfig { .. })
        ));
        assert!(BookkeeperConfig::new(Duration::from_secs(30), Duration::MAX).is_err());
    }

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::from_toml_str(
            r#"
            [store]
            url = "ws://localhost:8000"
            namespace = "ops"

            [bookkeeper]
            operations_watch_interval_secs = 15
            orphan_operation_timeout_secs = 300
            "#,
        )
        .unwrap();

        assert_eq!(config.store.url, "ws://localhost:8000");
        assert_eq!(config.store.namespace, "ops");
        assert_eq!(config.bookkeeper.operations_watch_interval(), Duration::from_secs(15));
        assert_eq!(config.bookkeeper.orphan_operation_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_missing_durations_are_rejected() {
        let err = AppConfig::from_toml_str(
            r#"
            [store]
            url = "mem://"

            [bookkeeper]
            operations_watch_interval_secs = 15
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }

    #[test]
    fn test_zero_duration_in_file_is_rejected() {
        let err = AppConfig::from_toml_str(
            r#"
            [store]
            url = "mem://"

            [bookkeeper]
            operations_watch_interval_secs = 0
            orphan_operation_timeout_secs = 300
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetkeeper.toml");
        std::fs::write(
            &path,
            "[store]\nurl = \"mem://\"\n\n[bookkeeper]\noperations_watch_interval_secs = 1\norphan_operation_timeout_secs = 2\n",
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.store, StoreConfig { database: "reconciler".to_string(), ..StoreConfig::in_memory() });

        let missing = AppConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, Error::ConfigParse { .. }));
    }
}
