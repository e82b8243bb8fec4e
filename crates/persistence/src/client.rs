//! SurrealDB client for reconciliation persistence.
//!
//! Provides connection management, schema setup and the query plumbing shared
//! by the SurrealDB-backed repository and inventory.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::{Response, Surreal};
use tracing::{debug, info};

use super::error::{from_surrealdb_error, PersistenceError, PersistenceResult};

/// Configuration for the store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Connection URL (e.g., "mem://", "ws://localhost:8000")
    pub url: String,
    /// Namespace to use
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Database to use
    #[serde(default = "default_database")]
    pub database: String,
    /// Optional root credentials
    #[serde(flatten, default)]
    pub credentials: Option<Credentials>,
}

/// Root credentials for authentication.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

fn default_namespace() -> String {
    "fleetkeeper".to_string()
}

fn default_database() -> String {
    "reconciler".to_string()
}

impl StoreConfig {
    /// Create an in-memory configuration for testing.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            url: "mem://".to_string(),
            namespace: default_namespace(),
            database: "test".to_string(),
            credentials: None,
        }
    }

    /// Create a WebSocket configuration.
    #[must_use]
    pub fn websocket(host: &str, port: u16) -> Self {
        Self {
            url: format!("ws://{host}:{port}"),
            namespace: default_namespace(),
            database: default_database(),
            credentials: None,
        }
    }

    /// Set credentials for authentication.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Set the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Named query parameters.
pub(crate) type Bindings = Vec<(String, Value)>;

/// Connection to the reconciliation database.
///
/// Thin wrapper around the SurrealDB client; cheap to clone.
#[derive(Debug, Clone)]
pub struct StoreClient {
    db: Arc<Surreal<Any>>,
    config: StoreConfig,
}

impl StoreClient {
    /// Connect to the database with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::StoreUnavailable`] if the connection or
    /// authentication fails.
    pub async fn connect(config: StoreConfig) -> PersistenceResult<Self> {
        let db = Surreal::<Any>::init();

        db.connect(&config.url)
            .await
            .map_err(|e| PersistenceError::store_unavailable(e.to_string()))?;

        if let Some(creds) = &config.credentials {
            db.signin(Root {
                username: &creds.username,
                password: &creds.password,
            })
            .await
            .map_err(|e| PersistenceError::store_unavailable(e.to_string()))?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| PersistenceError::store_unavailable(e.to_string()))?;

        info!(
            url = %config.url,
            namespace = %config.namespace,
            database = %config.database,
            "Connected to store"
        );

        Ok(Self {
            db: Arc::new(db),
            config,
        })
    }

    /// Get a reference to the underlying database client.
    #[must_use]
    pub fn db(&self) -> &Surreal<Any> {
        &self.db
    }

    /// Get the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Initialize the database schema.
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails.
    pub async fn initialize_schema(&self) -> PersistenceResult<()> {
        let schema = include_str!("schema.surql");

        let mut response = self
            .db
            .query(schema)
            .await
            .map_err(|e| PersistenceError::schema_error(e.to_string()))?;

        if let Some(err) = statement_errors(&mut response).into_iter().next() {
            return Err(PersistenceError::schema_error(err));
        }

        Ok(())
    }

    /// Check if the database is healthy.
    ///
    /// # Errors
    ///
    /// Returns an error if the health check fails.
    pub async fn health_check(&self) -> PersistenceResult<()> {
        self.db
            .query("INFO FOR DB")
            .await
            .map_err(|e| PersistenceError::store_unavailable(e.to_string()))?;

        Ok(())
    }

    /// Run a query with bindings and return the raw response.
    ///
    /// Statement-level errors stay inside the response; callers inspect them
    /// with [`statement_errors`].
    pub(crate) async fn execute(&self, sql: &str, bindings: Bindings) -> PersistenceResult<Response> {
        debug!(sql = %first_line(sql), bindings = bindings.len(), "Executing query");

        let mut query = self.db.query(sql);
        for binding in bindings {
            query = query.bind(binding);
        }
        query.await.map_err(from_surrealdb_error)
    }

    /// Run a query and fail on the first statement error.
    pub(crate) async fn execute_checked(
        &self,
        sql: &str,
        bindings: Bindings,
    ) -> PersistenceResult<Response> {
        let mut response = self.execute(sql, bindings).await?;
        match statement_errors(&mut response).into_iter().next() {
            Some(err) => Err(from_surrealdb_error(err)),
            None => Ok(response),
        }
    }

    /// Run a single-statement select and return its rows.
    pub(crate) async fn select_rows(
        &self,
        sql: &str,
        bindings: Bindings,
    ) -> PersistenceResult<Vec<serde_json::Map<String, Value>>> {
        let mut response = self.execute_checked(sql, bindings).await?;
        let rows: Vec<Value> = response.take(0).map_err(from_surrealdb_error)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }
}

/// Drain statement errors from a response, ordered by statement index.
pub(crate) fn statement_errors(response: &mut Response) -> Vec<String> {
    let mut errors: Vec<(usize, String)> = response
        .take_errors()
        .into_iter()
        .map(|(index, err)| (index, err.to_string()))
        .collect();
    errors.sort_by_key(|(index, _)| *index);
    errors.into_iter().map(|(_, err)| err).collect()
}

fn first_line(sql: &str) -> &str {
    sql.trim().lines().next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_config_in_memory() {
        let config = StoreConfig::in_memory();
        assert_eq!(config.url, "mem://");
        assert_eq!(config.namespace, "fleetkeeper");
        assert_eq!(config.database, "test");
        assert!(config.credentials.is_none());
    }

    #[tokio::test]
    async fn test_store_config_websocket() {
        let config = StoreConfig::websocket("localhost", 8000);
        assert_eq!(config.url, "ws://localhost:8000");
        assert_eq!(config.database, "reconciler");
    }

    #[tokio::test]
    async fn test_store_config_with_credentials() {
        let config = StoreConfig::in_memory().with_credentials("root", "secret");

        assert!(config.credentials.is_some());
        if let Some(creds) = config.credentials {
            assert_eq!(creds.username, "root");
            assert_eq!(creds.password, "secret");
        }
    }

    #[test]
    fn test_store_config_from_toml() {
        let parsed: Result<StoreConfig, _> = toml::from_str(
            r#"
            url = "ws://db:8000"
            database = "prod"
            username = "root"
            password = "root"
            "#,
        );
        assert!(parsed.is_ok(), "config should parse: {:?}", parsed.err());
        if let Ok(config) = parsed {
            assert_eq!(config.namespace, "fleetkeeper");
            assert_eq!(config.database, "prod");
            assert_eq!(
                config.credentials,
                Some(Credentials {
                    username: "root".to_string(),
                    password: "root".to_string()
                })
            );
        }
    }

    #[tokio::test]
    async fn test_connect_in_memory() {
        let config = StoreConfig::in_memory();
        let store = StoreClient::connect(config).await;

        assert!(store.is_ok(), "should connect to in-memory database");
    }

    #[tokio::test]
    async fn test_health_check_and_schema() {
        let config = StoreConfig::in_memory();
        let store = StoreClient::connect(config).await.ok();

        if let Some(store) = store {
            let health = store.health_check().await;
            assert!(health.is_ok(), "health check should pass: {:?}", health.err());

            let schema = store.initialize_schema().await;
            assert!(schema.is_ok(), "schema should load: {:?}", schema.err());
        }
    }

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("\n  SELECT *\nFROM x"), "SELECT *");
        assert_eq!(first_line(""), "");
    }
}
