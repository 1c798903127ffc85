//! Error types for the durable store.

use thiserror::Error;

/// Storage error type.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Schema/migration error
    #[error("schema error: {0}")]
    Schema(String),

    /// Record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored value failed to decode
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Attribute (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying rusqlite error
    #[error("sqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
}

impl From<beacon_core::EnumParseError> for StorageError {
    fn from(err: beacon_core::EnumParseError) -> Self {
        Self::Corrupt(err.to_string())
    }
}

impl From<beacon_core::IdParseError> for StorageError {
    fn from(err: beacon_core::IdParseError) -> Self {
        Self::Corrupt(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
