//! Per-component status summaries written into the managed cluster.
//!
//! A summary is a small key/value artifact named `<component>-status` in the
//! component's namespace. Publishing is best-effort: callers log failures and
//! carry on.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use fleetkeeper_model::{ClusterStatus, DEFAULT_NAMESPACE};
use fleetkeeper_persistence::{system_clock, SharedClock};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

/// Label marking artifacts owned by the reconciler.
pub const LABEL_MANAGED_BY: &str = "reconciler.kyma-project.io/managed-by";
/// Label carrying the component version that produced the artifact.
pub const LABEL_ORIGIN_VERSION: &str = "reconciler.kyma-project.io/origin-version";
/// Label marking reconciliation summaries.
pub const LABEL_SUMMARY: &str = "reconciler.kyma-project.io/reconciliation-summary";

/// Status of one component to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSummary {
    pub component: String,
    /// Empty means the default namespace.
    pub namespace: String,
    pub version: String,
    pub status: ClusterStatus,
}

impl ComponentSummary {
    /// Name of the summary artifact.
    pub fn artifact_name(&self) -> String {
        format!("{}-status", self.component.to_lowercase())
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

/// Receives component statuses.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    /// Publish one component status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Publish`] if the target rejected the write.
    async fn publish(&self, summary: &ComponentSummary) -> Result<()>;
}

/// Key/value object in the managed cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub namespace: String,
    pub data: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

/// Where summary artifacts are stored.
#[async_trait]
pub trait ArtifactTarget: Send + Sync {
    /// Whether `namespace` exists.
    async fn namespace_exists(&self, namespace: &str) -> Result<bool>;

    /// Fetch an artifact.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Artifact>>;

    /// Create an artifact.
    async fn create(&self, artifact: Artifact) -> Result<()>;

    /// Replace an artifact.
    async fn update(&self, artifact: Artifact) -> Result<()>;
}

/// [`StatusPublisher`] writing summaries into an [`ArtifactTarget`].
#[derive(Clone)]
pub struct SummaryPublisher {
    target: Arc<dyn ArtifactTarget>,
    clock: SharedClock,
}

impl SummaryPublisher {
    /// Publish into `target` using the wall clock.
    pub fn new(target: Arc<dyn ArtifactTarget>) -> Self {
        Self::with_clock(target, system_clock())
    }

    /// Publish into `target` using `clock`.
    pub fn with_clock(target: Arc<dyn ArtifactTarget>, clock: SharedClock) -> Self {
        Self { target, clock }
    }

    fn last_reconciliation(&self, status: ClusterStatus) -> Option<String> {
        status.is_terminal().then(|| self.clock.now().to_string())
    }
}

impl std::fmt::Debug for SummaryPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummaryPublisher").finish_non_exhaustive()
    }
}

#[async_trait]
impl StatusPublisher for SummaryPublisher {
    async fn publish(&self, summary: &ComponentSummary) -> Result<()> {
        let name = summary.artifact_name();
        let namespace = summary.effective_namespace();

        if !self.target.namespace_exists(namespace).await? {
            debug!(namespace, artifact = %name, "Namespace not found, skipping status summary");
            return Ok(());
        }

        match self.target.get(namespace, &name).await? {
            None => {
                debug!(namespace, artifact = %name, "Creating status summary");
                let data = BTreeMap::from([
                    ("name".to_string(), summary.component.clone()),
                    ("version".to_string(), summary.version.clone()),
                    ("status".to_string(), summary.status.to_string()),
                    (
                        "last-reconciliation".to_string(),
                        self.last_reconciliation(summary.status).unwrap_or_default(),
                    ),
                ]);
                let labels = BTreeMap::from([
                    (LABEL_MANAGED_BY.to_string(), "reconciler".to_string()),
                    (LABEL_ORIGIN_VERSION.to_string(), summary.version.clone()),
                    (LABEL_SUMMARY.to_string(), "true".to_string()),
                ]);
                self.target
                    .create(Artifact {
                        name,
                        namespace: namespace.to_string(),
                        data,
                        labels,
                    })
                    .await
            }
            Some(mut artifact) => {
                debug!(namespace, artifact = %name, "Updating status summary");
                artifact.data.insert("version".to_string(), summary.version.clone());
                artifact.data.insert("status".to_string(), summary.status.to_string());
                if let Some(at) = self.last_reconciliation(summary.status) {
                    artifact.data.insert("last-reconciliation".to_string(), at);
                }
                self.target.update(artifact).await
            }
        }
    }
}

/// Artifact target kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryArtifactTarget {
    namespaces: RwLock<BTreeSet<String>>,
    artifacts: RwLock<HashMap<(String, String), Artifact>>,
}

impl InMemoryArtifactTarget {
    /// Create a target with the default namespace.
    pub fn new() -> Self {
        Self::with_namespaces([DEFAULT_NAMESPACE])
    }

    /// Create a target with the given namespaces.
    pub fn with_namespaces<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespaces: RwLock::new(namespaces.into_iter().map(Into::into).collect()),
            artifacts: RwLock::default(),
        }
    }

    /// Add a namespace.
    pub async fn add_namespace(&self, namespace: impl Into<String>) {
        self.namespaces.write().await.insert(namespace.into());
    }

    /// Fetch an artifact for inspection.
    pub async fn artifact(&self, namespace: &str, name: &str) -> Option<Artifact> {
        self.artifacts
            .read()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of stored artifacts.
    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }

    /// Whether no artifact is stored.
    pub async fn is_empty(&self) -> bool {
        self.artifacts.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactTarget for InMemoryArtifactTarget {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        Ok(self.namespaces.read().await.contains(namespace))
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Artifact>> {
        Ok(self.artifact(namespace, name).await)
    }

    async fn create(&self, artifact: Artifact) -> Result<()> {
        let key = (artifact.namespace.clone(), artifact.name.clone());
        let mut artifacts = self.artifacts.write().await;
        if artifacts.contains_key(&key) {
            return Err(Error::publish(artifact.name, "artifact already exists"));
        }
        artifacts.insert(key, artifact);
        Ok(())
    }

    async fn update(&self, artifact: Artifact) -> Result<()> {
        let key = (artifact.namespace.clone(), artifact.name.clone());
        let mut artifacts = self.artifacts.write().await;
        match artifacts.get_mut(&key) {
            Some(existing) => {
                *existing = artifact;
                Ok(())
            }
            None => Err(Error::publish(artifact.name, "artifact does not exist")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use fleetkeeper_persistence::ManualClock;

    fn summary(status: ClusterStatus) -> ComponentSummary {
        ComponentSummary {
            component: "Istio".to_string(),
            namespace: "istio-system".to_string(),
            version: "1.11.4".to_string(),
            status,
        }
    }

    fn publisher(target: &Arc<InMemoryArtifactTarget>) -> SummaryPublisher {
        SummaryPublisher::with_clock(
            Arc::clone(target) as Arc<dyn ArtifactTarget>,
            Arc::new(ManualClock::starting_now()),
        )
    }

    #[tokio::test]
    async fn test_creates_summary_with_labels() {
        let target = Arc::new(InMemoryArtifactTarget::with_namespaces(["istio-system"]));
        publisher(&target).publish(&summary(ClusterStatus::Running)).await.unwrap();

        let artifact = target.artifact("istio-system", "istio-status").await.unwrap();
        assert_eq!(artifact.data["name"], "Istio");
        assert_eq!(artifact.data["version"], "1.11.4");
        assert_eq!(artifact.data["status"], "running");
        assert_eq!(artifact.data["last-reconciliation"], "");
        assert_eq!(artifact.labels[LABEL_MANAGED_BY], "reconciler");
        assert_eq!(artifact.labels[LABEL_ORIGIN_VERSION], "1.11.4");
        assert_eq!(artifact.labels[LABEL_SUMMARY], "true");
    }

    #[tokio::test]
    async fn test_update_overwrites_status_and_stamps_terminal() {
        let target = Arc::new(InMemoryArtifactTarget::with_namespaces(["istio-system"]));
        let publisher = publisher(&target);
        publisher.publish(&summary(ClusterStatus::Running)).await.unwrap();

        let mut done = summary(ClusterStatus::Ready);
        done.version = "1.12.0".to_string();
        publisher.publish(&done).await.unwrap();

        let artifact = target.artifact("istio-system", "istio-status").await.unwrap();
        assert_eq!(artifact.data["status"], "ready");
        assert_eq!(artifact.data["version"], "1.12.0");
        assert!(!artifact.data["last-reconciliation"].is_empty());
        // Labels are only written on creation.
        assert_eq!(artifact.labels[LABEL_ORIGIN_VERSION], "1.11.4");

        publisher.publish(&summary(ClusterStatus::Running)).await.unwrap();
        let artifact = target.artifact("istio-system", "istio-status").await.unwrap();
        assert_eq!(artifact.data["status"], "running");
        assert!(!artifact.data["last-reconciliation"].is_empty());
    }

    #[tokio::test]
    async fn test_missing_namespace_is_skipped() {
        let target = Arc::new(InMemoryArtifactTarget::new());
        publisher(&target).publish(&summary(ClusterStatus::Error)).await.unwrap();
        assert!(target.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_namespace_defaults() {
        let target = Arc::new(InMemoryArtifactTarget::new());
        let mut summary = summary(ClusterStatus::Error);
        summary.namespace = String::new();
        publisher(&target).publish(&summary).await.unwrap();

        assert_eq!(target.len().await, 1);
        let artifact = target.artifact("default", "istio-status").await.unwrap();
        assert_eq!(artifact.data["status"], "error");
    }
}
