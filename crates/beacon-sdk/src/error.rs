//! SDK error type.

use thiserror::Error;

/// Errors surfaced by the SDK facade. Producer-facing ingestion never
/// returns these; only lifecycle and administrative calls do.
#[derive(Debug, Error)]
pub enum SdkError {
    #[error("storage error: {0}")]
    Storage(#[from] beacon_storage::StorageError),

    #[error("upload error: {0}")]
    Upload(#[from] beacon_upload::UploadError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] beacon_pipeline::PipelineError),
}

/// Result type for SDK operations.
pub type SdkResult<T> = Result<T, SdkError>;
