//! Error types for the sync module.

use harbor_core::CoreError;
use harbor_store::StoreError;
use thiserror::Error;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Neither the call nor the entity supplies a base URL.
    #[error("no base url for {0}")]
    MissingBaseUrl(String),

    /// Update, delete or a point read was asked of a model without identity.
    #[error("missing model id for {0}")]
    MissingIdentity(String),

    /// The operation cannot be applied to this kind of handle.
    #[error("{op} is not supported on a {target}")]
    UnsupportedTarget {
        op: &'static str,
        target: &'static str,
    },

    /// The server answered with a failure status or could not be reached.
    #[error("remote error{}: {reason}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Remote {
        status: Option<u16>,
        body: Option<String>,
        reason: String,
    },

    /// A success response carried a body that is not a record or a list of records.
    #[error("unreadable response body: {0}")]
    InvalidPayload(String),

    /// A record was rejected by strict validation.
    #[error("record rejected: missing columns {missing:?}")]
    Validation { missing: Vec<String> },

    /// The HTTP client could not be constructed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A filter or descriptor was rejected.
    #[error("query error: {0}")]
    Query(#[from] CoreError),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
