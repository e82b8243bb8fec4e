//! Cluster inventory types: desired configuration and versioned state.
//!
//! The core treats a [`ClusterState`] as an opaque bundle of runtime id,
//! configuration version and components. The inventory owns how versions are
//! assigned.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster_status::ClusterStatusEntity;
use crate::error::UnmarshalError;
use crate::marshal::{DatabaseEntity, Row, RowReader, RowWriter};
use crate::timestamp;

/// Table name for cluster configuration versions.
pub const TABLE_CLUSTER_CONFIG: &str = "cluster_config";

/// Namespace used when a component does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// One component to reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Component name.
    pub name: String,
    /// Target namespace; empty means [`DEFAULT_NAMESPACE`].
    #[serde(default)]
    pub namespace: String,
    /// Component version.
    #[serde(default)]
    pub version: String,
}

impl ComponentSpec {
    /// Create a component in the default namespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            version: String::new(),
        }
    }

    /// Set the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Namespace with the default applied.
    pub fn effective_namespace(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.namespace
        }
    }
}

/// Desired configuration submitted to the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster identity.
    pub runtime_id: String,
    /// Release version applied to the cluster.
    pub version: String,
    /// Components in reconciliation order.
    pub components: Vec<ComponentSpec>,
}

impl ClusterConfig {
    /// Create an empty configuration for a cluster.
    pub fn new(runtime_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            runtime_id: runtime_id.into(),
            version: version.into(),
            components: Vec::new(),
        }
    }

    /// Add a component.
    #[must_use]
    pub fn with_component(mut self, component: ComponentSpec) -> Self {
        self.components.push(component);
        self
    }
}

/// A stored configuration version of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClusterConfigEntity {
    pub runtime_id: String,
    pub config_version: i64,
    pub version: String,
    pub components: Vec<ComponentSpec>,
    /// Set when the cluster was removed from the inventory.
    pub deleted: bool,
    pub created: DateTime<Utc>,
}

impl ClusterConfigEntity {
    /// Create a configuration version from a desired configuration.
    pub fn from_config(config: &ClusterConfig, config_version: i64, created: DateTime<Utc>) -> Self {
        Self {
            runtime_id: config.runtime_id.clone(),
            config_version,
            version: config.version.clone(),
            components: config.components.clone(),
            deleted: false,
            created: timestamp::truncate(created),
        }
    }

    /// Whether this version already describes `config`.
    pub fn describes(&self, config: &ClusterConfig) -> bool {
        self.runtime_id == config.runtime_id
            && self.version == config.version
            && self.components == config.components
    }
}

impl fmt::Display for ClusterConfigEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClusterConfigEntity [RuntimeID={},ConfigVersion={},Version={}]",
            self.runtime_id, self.config_version, self.version
        )
    }
}

impl DatabaseEntity for ClusterConfigEntity {
    const TABLE: &'static str = TABLE_CLUSTER_CONFIG;

    fn new_entity() -> Self {
        Self::default()
    }

    fn marshal(&self) -> Row {
        RowWriter::new()
            .string("runtime_id", self.runtime_id.as_str())
            .int("config_version", self.config_version)
            .string("version", self.version.as_str())
            .json(
                "components",
                serde_json::to_value(&self.components).unwrap_or_default(),
            )
            .bool("deleted", self.deleted)
            .timestamp("created", self.created)
            .build()
    }

    fn unmarshal(row: &Row) -> Result<Self, UnmarshalError> {
        let r = RowReader::new(Self::TABLE, row);
        Ok(Self {
            runtime_id: r.string("runtime_id")?,
            config_version: r.int("config_version")?,
            version: r.string("version")?,
            components: r.json("components")?,
            deleted: r.bool("deleted")?,
            created: r.timestamp("created")?,
        })
    }

    fn equal(&self, other: &Self) -> bool {
        self.runtime_id == other.runtime_id
            && self.config_version == other.config_version
            && self.version == other.version
            && self.components == other.components
            && self.deleted == other.deleted
    }
}

/// Versioned cluster configuration with its latest recorded status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterState {
    pub config: ClusterConfigEntity,
    pub status: Option<ClusterStatusEntity>,
}

impl ClusterState {
    /// Cluster identity.
    pub fn runtime_id(&self) -> &str {
        &self.config.runtime_id
    }

    /// Configuration version.
    pub const fn config_version(&self) -> i64 {
        self.config.config_version
    }

    /// Components of this version.
    pub fn components(&self) -> &[ComponentSpec] {
        &self.config.components
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn config() -> ClusterConfig {
        ClusterConfig::new("runtime-1", "2.4.0")
            .with_component(ComponentSpec::new("cluster-essentials"))
            .with_component(ComponentSpec::new("istio").with_namespace("istio-system").with_version("1.11"))
    }

    #[test]
    fn test_roundtrip() {
        let entity = ClusterConfigEntity::from_config(&config(), 4, Utc::now());
        let reloaded = ClusterConfigEntity::unmarshal(&entity.marshal()).unwrap();
        assert_eq!(entity, reloaded);
        assert!(entity.describes(&config()));
    }

    #[test]
    fn test_effective_namespace() {
        assert_eq!(ComponentSpec::new("a").effective_namespace(), "default");
        assert_eq!(
            ComponentSpec::new("a").with_namespace("kyma-system").effective_namespace(),
            "kyma-system"
        );
    }

    #[test]
    fn test_malformed_components() {
        let mut row = ClusterConfigEntity::from_config(&config(), 4, Utc::now()).marshal();
        row.insert("components".to_string(), Value::from("istio"));
        let err = ClusterConfigEntity::unmarshal(&row).unwrap_err();
        assert!(matches!(err, UnmarshalError::InvalidValue { .. }));
    }
}
