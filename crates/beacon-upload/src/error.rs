//! Error types for the upload layer.

use thiserror::Error;

/// Upload error type.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Payload identifier is empty or otherwise unusable
    #[error("invalid payload metadata: {0}")]
    InvalidMetadata(String),

    /// Payload body is empty
    #[error("invalid payload data: {0}")]
    InvalidData(String),

    /// Cache read/write failed
    #[error("cache error: {0}")]
    Cache(#[from] beacon_storage::StorageError),

    /// Network transport failure
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The collector answered with a non-success status
    #[error("collector returned status {0}")]
    Status(u16),

    /// The coordinator is shutting down
    #[error("upload coordinator closed")]
    Closed,
}

/// Result type for upload operations.
pub type UploadResult<T> = Result<T, UploadError>;
