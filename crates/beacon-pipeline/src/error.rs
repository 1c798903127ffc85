//! Error types for the pipeline.

use thiserror::Error;

/// Pipeline error type.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Storage(#[from] beacon_storage::StorageError),

    #[error("payload encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("payload sink error: {0}")]
    Sink(#[from] beacon_core::SinkError),

    #[error("crash reporter error: {0}")]
    CrashReporter(#[from] beacon_core::CrashReporterError),
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
