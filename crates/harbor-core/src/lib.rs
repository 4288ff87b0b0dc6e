//! # Harbor Core
//!
//! Pure primitives for harbor: records, entity descriptors, filter
//! descriptors and the SQL query builder.
//!
//! This crate contains no I/O, no storage, no networking. Everything here is
//! computation over descriptors and values; the store and sync crates bring
//! them to life.
//!
//! ## Key Types
//!
//! - [`Record`] - An ordered column → JSON value mapping
//! - [`Identity`] - Normalised row identity used for membership checks
//! - [`SqlValue`] - A bindable SQL parameter
//! - [`EntityDescriptor`] - Static per-collection configuration
//! - [`Filter`] / [`Expr`] - Structured query descriptors
//! - [`Migration`] / [`SchemaOps`] - Versioned schema steps and the surface they drive
//!
//! ## Query Building
//!
//! Filters are turned into SQL text with every value bound as a parameter:
//!
//! ```rust
//! use harbor_core::{query, Filter, Statement};
//!
//! let filter = Filter::new()
//!     .where_eq("country", "France")
//!     .order_by("name")
//!     .limit(10);
//! let q = query::build("wine", &filter, Statement::Select).unwrap();
//! assert_eq!(
//!     q.sql,
//!     "SELECT * FROM wine WHERE country = ? ORDER BY name LIMIT 10"
//! );
//! ```

pub mod entity;
pub mod error;
pub mod filter;
pub mod migration;
pub mod query;
pub mod record;
pub mod value;

pub use entity::{
    ColumnDef, ColumnType, EntityBuilder, EntityDescriptor, LastModified, UrlSource,
    DEFAULT_DATE_FORMAT, DEFAULT_DELETED_MARKER, DEFAULT_ID_ATTRIBUTE,
};
pub use error::{CoreError, Result, SchemaError};
pub use filter::{Expr, Filter};
pub use migration::{plan, Direction, Migration, SchemaOps};
pub use query::{Query, RawQuery, Statement, TAUTOLOGY};
pub use record::{generate_identity, identity_of, is_tombstone, Identity, Record};
pub use value::SqlValue;
