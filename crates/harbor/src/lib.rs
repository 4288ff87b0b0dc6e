//! # Harbor
//!
//! Offline-first synchronization of a local SQLite cache with a REST
//! resource.
//!
//! ## Overview
//!
//! Harbor keeps a relational copy of remote collections on the device:
//!
//! - **Entities**: declarative descriptors naming a table, its columns and
//!   the remote endpoint
//! - **Queries**: filter descriptors compiled into parameterized SQL
//! - **Migrations**: numbered, reversible schema steps run at registration
//! - **Sync**: every CRUD call goes remote first and is mirrored locally,
//!   online or not
//!
//! ## Usage
//!
//! ```rust,no_run
//! use harbor::{EntityDescriptor, Registry, RegistryConfig, SyncOptions};
//!
//! async fn example() -> harbor::Result<()> {
//!     let registry = Registry::open("harbor.db", RegistryConfig::default())?;
//!
//!     registry
//!         .register(
//!             EntityDescriptor::builder("wine")
//!                 .column("name", "text")
//!                 .column("year", "integer")
//!                 .base_url("https://api.example.com/wines")
//!                 .build()?,
//!         )
//!         .await?;
//!
//!     let mut wines = registry.collection("wine").await?;
//!     match registry.engine().read(&mut wines, SyncOptions::new()).await {
//!         Ok(result) => println!("{} wines, confirmed: {}", wines.len(), result.confirmed),
//!         Err(failure) => println!("read failed: {}", failure),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! The component crates are re-exported for convenience:
//!
//! - `harbor::core` - Records, descriptors, filters and the query builder
//! - `harbor::store` - Store abstraction, SQLite and the schema migrator
//! - `harbor::sync` - Transports and the reconciliation engine

pub mod error;
pub mod registry;

// Re-export component crates
pub use harbor_core as core;
pub use harbor_store as store;
pub use harbor_sync as sync;

// Re-export main types for convenience
pub use error::{HarborError, Result};
pub use registry::{Registry, RegistryConfig};

// Re-export commonly used types
pub use harbor_core::{EntityDescriptor, Expr, Filter, Identity, Migration, RawQuery, Record};
pub use harbor_store::{SchemaState, SqliteStore, Store, StoreExt};
pub use harbor_sync::{
    Collection, ErrorFallback, HttpTransport, Model, Payload, Source, SyncConfig, SyncEngine,
    SyncFailure, SyncOp, SyncOptions, SyncOutcome, SyncResult, SyncTarget, Transport,
};
