//! # Harbor Sync
//!
//! Reconciliation of a local SQLite cache with a remote REST collection.
//!
//! ## Overview
//!
//! Every create, read, update and delete goes to the server first and is
//! then applied locally. When the server cannot be reached the local write
//! still happens and the caller is told the result is unconfirmed, so an
//! application keeps working offline and catches up on its next successful
//! read.
//!
//! ## Key Properties
//!
//! - **Local-always**: a model handed to the engine ends up in the store,
//!   unless the server rejects it and `save_on_error` is off
//! - **Batch merge**: a fetched collection is classified against the local
//!   identity set and committed as one transaction
//! - **Tombstones**: records carrying the deleted marker remove local rows
//! - **Last writer wins**: no conflict detection
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use harbor_core::EntityDescriptor;
//! use harbor_store::{SqliteStore, Store};
//! use harbor_sync::{Collection, HttpTransport, SyncConfig, SyncEngine, SyncOptions};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let wine = Arc::new(
//!         EntityDescriptor::builder("wine")
//!             .column("name", "text")
//!             .column("year", "integer")
//!             .base_url("https://api.example.com/wines")
//!             .build()?,
//!     );
//!
//!     let store = SqliteStore::open("harbor.db")?;
//!     store.migrate(&wine).await?;
//!
//!     let engine = SyncEngine::new(store, HttpTransport::new()?, SyncConfig::default());
//!     let mut wines = Collection::new(wine);
//!     let result = engine.read(&mut wines, SyncOptions::new()).await?;
//!     println!("{} wines ({:?})", wines.len(), result.source);
//!     Ok(())
//! }
//! ```
//!
//! ## Call Flow
//!
//! ```text
//! caller            engine                transport        store
//!   |--- read ------->|                       |               |
//!   |<-- local first -|<------------------------------ query -|
//!   |                 |------ GET ----------->|               |
//!   |                 |<----- records --------|               |
//!   |                 |------------------------- apply batch ->|
//!   |<-- result ------|<------------------------------ query -|
//! ```

pub mod engine;
pub mod error;
pub mod handle;
pub mod options;
pub mod transport;

pub use engine::{
    MergeReport, Payload, Source, SyncEngine, SyncFailure, SyncOp, SyncOutcome, SyncResult,
    SyncTarget,
};
pub use error::{Result, SyncError};
pub use handle::{Collection, Model};
pub use options::{ErrorFallback, SyncConfig, SyncOptions};
pub use transport::{
    memory::ScriptedTransport, HttpTransport, Method, RemoteFailure, RemoteOutcome,
    RemoteResponse, Transport, TransportRequest, METHOD_OVERRIDE_HEADER,
};
