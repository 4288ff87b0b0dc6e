//! Error types for Harbor Core.

use thiserror::Error;

/// Errors raised while describing entities or building queries.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A table or column name that cannot be inlined into SQL text.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid entity descriptor: {0}")]
    InvalidDescriptor(String),
}

/// Errors raised by a migration step or the schema surface it drives.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The underlying statement failed.
    #[error("schema statement failed: {0}")]
    Statement(String),

    /// The step asked for something the schema surface cannot express.
    #[error("invalid schema operation: {0}")]
    Invalid(String),
}

impl From<CoreError> for SchemaError {
    fn from(err: CoreError) -> Self {
        SchemaError::Invalid(err.to_string())
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
