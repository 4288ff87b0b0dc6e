//! # Harbor Store
//!
//! Local storage for harbor. Provides a trait-based interface to the
//! relational cache that mirrors each remote collection, with a SQLite
//! implementation and the per-entity schema migrator.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`WriteBatch`] - Inserts, updates and deletes committed as one transaction
//! - [`MigrationReport`] / [`SchemaState`] - Outcome and status of schema migration
//!
//! ## Usage
//!
//! ```rust,no_run
//! use harbor_core::{EntityDescriptor, Filter};
//! use harbor_store::{SqliteStore, Store};
//!
//! async fn example() {
//!     let store = SqliteStore::open("harbor.db").unwrap();
//!
//!     let wine = EntityDescriptor::builder("wine")
//!         .column("name", "text")
//!         .column("year", "integer")
//!         .build()
//!         .unwrap();
//!     store.migrate(&wine).await.unwrap();
//!
//!     let rows = store
//!         .query(wine.table(), &Filter::new().where_eq("year", 2012))
//!         .await
//!         .unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Bound values**: every value reaches SQLite as a parameter; only
//!   validated identifiers are inlined
//! - **Atomic batches**: a [`WriteBatch`] commits entirely or not at all
//! - **Atomic migrations**: one transaction per migration run

pub mod error;
pub mod migration;
pub mod sqlite;
pub mod traits;

mod sql;

pub use error::{Result, StoreError};
pub use migration::{MigrationReport, SchemaState, TRACKING_TABLE};
pub use sqlite::SqliteStore;
pub use traits::{BatchOutcome, Store, StoreExt, WriteBatch, WriteOp};
