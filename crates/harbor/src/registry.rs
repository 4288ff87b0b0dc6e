//! The Registry: one place to register entities and reach the engine.
//!
//! Registering an entity migrates its table before the descriptor becomes
//! usable, so every handle the registry builds points at a table whose
//! schema is current.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use harbor_core::{EntityDescriptor, Record};
use harbor_store::{MigrationReport, SchemaState, SqliteStore, Store};
use harbor_sync::{Collection, HttpTransport, Model, SyncConfig, SyncEngine, Transport};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{HarborError, Result};

/// Configuration for the Registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Sync configuration.
    pub sync: SyncConfig,
}

/// Registered entities plus the engine that syncs them.
pub struct Registry<S: Store, T: Transport> {
    engine: SyncEngine<S, T>,
    entities: RwLock<HashMap<String, Arc<EntityDescriptor>>>,
}

impl Registry<SqliteStore, HttpTransport> {
    /// Open a database file and talk HTTP.
    pub fn open(path: impl AsRef<Path>, config: RegistryConfig) -> Result<Self> {
        let store = SqliteStore::open(path)?;
        let transport = HttpTransport::new()?;
        Ok(Self::new(store, transport, config))
    }
}

impl<S: Store, T: Transport> Registry<S, T> {
    pub fn new(store: S, transport: T, config: RegistryConfig) -> Self {
        Self {
            engine: SyncEngine::new(store, transport, config.sync),
            entities: RwLock::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &SyncEngine<S, T> {
        &self.engine
    }

    pub fn store(&self) -> &S {
        self.engine.store()
    }

    /// Register an entity, migrating its table first.
    ///
    /// Registering a name twice returns the descriptor registered first and
    /// runs nothing. A failed migration leaves the name unregistered.
    pub async fn register(&self, entity: EntityDescriptor) -> Result<Arc<EntityDescriptor>> {
        if let Some(existing) = self.get(entity.name()).await {
            debug!(entity = entity.name(), "already registered");
            return Ok(existing);
        }

        let report = self.engine.store().migrate(&entity).await?;
        log_report(&entity, &report);

        let mut entities = self.entities.write().await;
        // a concurrent register may have won while we migrated
        let registered = entities
            .entry(entity.name().to_string())
            .or_insert_with(|| Arc::new(entity))
            .clone();
        Ok(registered)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<EntityDescriptor>> {
        self.entities.read().await.get(name).cloned()
    }

    /// Names of every registered entity, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// A model handle for a registered entity.
    pub async fn model(&self, name: &str, attributes: Record) -> Result<Model> {
        Ok(Model::new(self.require(name).await?, attributes))
    }

    /// An empty collection handle for a registered entity.
    pub async fn collection(&self, name: &str) -> Result<Collection> {
        Ok(Collection::new(self.require(name).await?))
    }

    /// Where a registered entity's schema stands.
    pub async fn schema_state(&self, name: &str) -> Result<SchemaState> {
        let entity = self.require(name).await?;
        Ok(self.engine.store().schema_state(&entity).await?)
    }

    async fn require(&self, name: &str) -> Result<Arc<EntityDescriptor>> {
        self.get(name)
            .await
            .ok_or_else(|| HarborError::UnknownEntity(name.to_string()))
    }
}

fn log_report(entity: &EntityDescriptor, report: &MigrationReport) {
    if report.is_noop() {
        debug!(entity = entity.name(), version = ?report.to, "schema current");
    } else {
        info!(
            entity = entity.name(),
            from = ?report.from,
            to = ?report.to,
            steps = report.steps.len(),
            "schema migrated"
        );
    }
}
