//! Crash-signal collector interface.
//!
//! Crash capture itself lives outside the pipeline; the pipeline only asks
//! the collector for unsent reports at launch and deletes them once the
//! upload layer has taken custody.

use crate::ids::SessionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error surfaced by a crash-signal collector.
#[derive(Debug, Error)]
#[error("crash reporter error: {0}")]
pub struct CrashReporterError(pub String);

/// A crash report captured by the out-of-process collector.
#[derive(Debug, Clone)]
pub struct CrashReport {
    /// Collector-assigned report identifier.
    pub id: String,
    /// Signal name that terminated the process, e.g. `SIGSEGV`.
    pub signal: String,
    /// Approximate crash instant. Collectors cannot always recover one.
    pub timestamp: Option<DateTime<Utc>>,
    /// Session the collector attributed the crash to, when it could.
    pub session_id: Option<SessionId>,
    /// Raw report body, forwarded opaquely to the collector backend.
    pub payload: serde_json::Value,
}

/// Interface to the out-of-scope crash-signal collector.
#[async_trait]
pub trait CrashReporter: Send + Sync {
    /// All reports captured by prior launches that were never uploaded.
    async fn fetch_unsent_reports(&self) -> Result<Vec<CrashReport>, CrashReporterError>;

    /// Delete a report once it no longer needs to be re-fetched.
    async fn delete_report(&self, id: &str) -> Result<(), CrashReporterError>;
}
