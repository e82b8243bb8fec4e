//! Wiring of the store, repository, inventory and bookkeeper.

use std::sync::Arc;

use anyhow::{Context, Result};
use fleetkeeper_persistence::{
    Inventory, ReconciliationRepository, StoreClient, SurrealInventory, SurrealReconciliationRepository,
};
use fleetkeeper_scheduler::{AppConfig, Bookkeeper, ClusterStatusTransition, StopSignal};
use tracing::{error, info};

/// A connected bookkeeper ready to run.
#[derive(Debug)]
pub struct Daemon {
    client: StoreClient,
    bookkeeper: Bookkeeper,
}

impl Daemon {
    /// Connect to the store and wire the bookkeeper.
    ///
    /// The schema is created when `init_schema` is set or the store is the
    /// in-memory engine, which always starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or the schema cannot be
    /// created.
    pub async fn connect(config: &AppConfig, init_schema: bool) -> Result<Self> {
        let client = StoreClient::connect(config.store.clone())
            .await
            .with_context(|| format!("Failed to connect to store at {}", config.store.url))?;

        client.health_check().await.context("Store health check failed")?;
        info!(url = %config.store.url, namespace = %config.store.namespace, "Store connected and healthy");

        if init_schema || config.store.url.starts_with("mem://") {
            client
                .initialize_schema()
                .await
                .context("Schema initialization failed")?;
            info!("Schema initialized");
        }

        let repository: Arc<dyn ReconciliationRepository> =
            Arc::new(SurrealReconciliationRepository::new(client.clone()));
        let inventory: Arc<dyn Inventory> = Arc::new(SurrealInventory::new(client.clone()));
        let transition = ClusterStatusTransition::new(inventory, repository);
        let bookkeeper = Bookkeeper::new(transition, config.bookkeeper);

        Ok(Self { client, bookkeeper })
    }

    /// The store connection.
    pub const fn client(&self) -> &StoreClient {
        &self.client
    }

    /// The wired bookkeeper.
    pub const fn bookkeeper(&self) -> &Bookkeeper {
        &self.bookkeeper
    }

    /// Run the bookkeeper until `stop` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the bookkeeper loop fails.
    pub async fn run(&self, stop: StopSignal) -> Result<()> {
        self.bookkeeper.run(stop).await.context("Bookkeeper loop failed")
    }
}

/// Wait for SIGTERM or SIGINT.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                wait_for_ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            () = wait_for_ctrl_c() => {}
        }
    }

    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await;
    }
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
