//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use harbor::{Registry, RegistryConfig};
use harbor_core::{EntityBuilder, EntityDescriptor, Migration, Record};
use harbor_store::{SqliteStore, Store, WriteBatch};
use harbor_sync::{ScriptedTransport, SyncConfig};
use serde_json::{json, Value};

/// Base URL every fixture entity points at.
pub const BASE_URL: &str = "https://api.example.com";

/// The wine entity used throughout the tests.
///
/// Server-assigned integer identities, a tombstone marker and a
/// last-modified column.
pub fn wine() -> EntityDescriptor {
    wine_builder().build().unwrap_or_else(|e| panic!("wine fixture: {}", e))
}

/// The wine entity with strict validation switched on.
pub fn strict_wine() -> EntityDescriptor {
    wine_builder()
        .strict(true)
        .build()
        .unwrap_or_else(|e| panic!("strict wine fixture: {}", e))
}

fn wine_builder() -> EntityBuilder {
    EntityDescriptor::builder("wine")
        .column("id", "INTEGER PRIMARY KEY AUTOINCREMENT")
        .column("name", "text")
        .column("year", "integer")
        .column("country", "text")
        .column("updated", "datetime")
        .id_attribute("id")
        .last_modified("updated")
        .base_url(format!("{}/wines", BASE_URL))
}

/// A cellar entity with locally generated identities and three
/// reversible migrations.
pub fn cellar() -> EntityDescriptor {
    cellar_at(3)
}

/// The cellar entity pinned to `version`.
pub fn cellar_at(version: u64) -> EntityDescriptor {
    EntityDescriptor::builder("cellar")
        .column("label", "text")
        .column("rack", "integer")
        .column("note", "text")
        .migration(
            Migration::new(1)
                .up(|ops| {
                    ops.create_table_with(&[("label", "text"), ("rack", "integer"), ("note", "text")])
                })
                .down(|ops| ops.drop_table()),
        )
        .migration(
            Migration::new(2)
                .up(|ops| ops.create_index("cellar_rack", &["rack"], false))
                .down(|ops| ops.drop_index("cellar_rack")),
        )
        .migration(
            Migration::new(3)
                .up(|ops| ops.insert_row(&record(json!({"label": "house red", "rack": 1}))))
                .down(|ops| ops.delete_row(&record(json!({"label": "house red"})))),
        )
        .target_version(version)
        .build()
        .unwrap_or_else(|e| panic!("cellar fixture: {}", e))
}

/// Build a record from a JSON object literal.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// A wine record with the given identity.
pub fn wine_record(id: i64, name: &str) -> Record {
    record(json!({"id": id, "name": name, "year": 2000 + id, "country": "France"}))
}

/// A registry over an in-memory store and a scripted transport.
pub struct TestFixture {
    pub registry: Registry<SqliteStore, ScriptedTransport>,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(sync: SyncConfig) -> Self {
        let store = SqliteStore::open_memory().unwrap_or_else(|e| panic!("open store: {}", e));
        Self {
            registry: Registry::new(store, ScriptedTransport::new(), RegistryConfig { sync }),
        }
    }

    /// Register `entity` and return its shared descriptor.
    pub async fn register(&self, entity: EntityDescriptor) -> anyhow::Result<Arc<EntityDescriptor>> {
        Ok(self.registry.register(entity).await?)
    }

    pub fn store(&self) -> &SqliteStore {
        self.registry.store()
    }

    pub fn transport(&self) -> &ScriptedTransport {
        self.registry.engine().transport()
    }

    /// Insert rows directly, bypassing the engine.
    pub async fn seed(&self, entity: &EntityDescriptor, rows: Vec<Record>) -> anyhow::Result<()> {
        let mut batch = WriteBatch::for_entity(entity);
        for row in rows {
            batch.insert(row, false);
        }
        self.store().apply(batch).await?;
        Ok(())
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
