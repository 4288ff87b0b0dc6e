//! Error types for the store module.

use harbor_core::{CoreError, SchemaError};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A filter or descriptor could not be turned into SQL.
    #[error("query error: {0}")]
    Query(#[from] CoreError),

    /// A migration step failed. The whole run was rolled back.
    #[error("migration error: {0}")]
    Schema(#[from] SchemaError),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The connection mutex was poisoned or the blocking task died.
    #[error("connection unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
