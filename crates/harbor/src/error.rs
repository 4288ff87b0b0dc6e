//! Error types for the facade.

use harbor_core::CoreError;
use harbor_store::StoreError;
use harbor_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during facade operations.
#[derive(Debug, Error)]
pub enum HarborError {
    /// Descriptor or filter error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// No entity of this name has been registered.
    #[error("entity not registered: {0}")]
    UnknownEntity(String),
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, HarborError>;
