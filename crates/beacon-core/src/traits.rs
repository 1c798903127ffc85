//! Collaborator traits at the pipeline's seams.
//!
//! The pipeline owns its collaborators through these interfaces, handed in
//! at construction; collaborators never hold a reference back into the
//! pipeline, only the narrow handler callbacks below.

use crate::ids::SessionId;
use crate::signal::{RawLog, RawSpan, SessionState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Kind of an outgoing payload; selects the collector endpoint and keys the
/// upload cache together with the payload id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadKind {
    Session,
    Spans,
    Logs,
    Blob,
}

impl UploadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Spans => "spans",
            Self::Logs => "logs",
            Self::Blob => "blob",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session" => Some(Self::Session),
            "spans" => Some(Self::Spans),
            "logs" => Some(Self::Logs),
            "blob" => Some(Self::Blob),
            _ => None,
        }
    }
}

/// Error returned by a payload sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink refused the payload (empty id, empty bytes).
    #[error("payload rejected: {0}")]
    Rejected(String),
    /// The sink could not take custody of the payload.
    #[error("payload sink failure: {0}")]
    Failure(String),
    /// The sink is shutting down and can no longer take custody.
    #[error("payload sink closed")]
    Closed,
}

/// Durable custody for outgoing payloads.
///
/// `submit` resolves once the payload is safe to forget locally — cached by
/// the upload layer — not once it reached the network.
#[async_trait]
pub trait PayloadSink: Send + Sync {
    async fn submit(&self, id: String, kind: UploadKind, bytes: Vec<u8>) -> Result<(), SinkError>;
}

/// Read-only view of the active session, consulted by the classifier for
/// stamping.
pub trait SessionStateProvider: Send + Sync {
    fn current_session_id(&self) -> Option<SessionId>;
    fn current_state(&self) -> Option<SessionState>;
}

/// Span lifecycle events as an event source reports them.
#[derive(Debug, Clone)]
pub enum SpanEvent {
    Started(RawSpan),
    Ended(RawSpan),
}

pub type SpanHandler = Arc<dyn Fn(SpanEvent) + Send + Sync>;
pub type LogHandler = Arc<dyn Fn(RawLog) + Send + Sync>;

/// Anything that produces spans: UI capture, network interception,
/// view-lifecycle probes. The pipeline never learns how capture works.
pub trait SpanSource: Send + Sync {
    fn subscribe(&self, handler: SpanHandler);
}

/// Anything that produces logs.
pub trait LogSource: Send + Sync {
    fn subscribe(&self, handler: LogHandler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_kind_roundtrips() {
        for kind in [
            UploadKind::Session,
            UploadKind::Spans,
            UploadKind::Logs,
            UploadKind::Blob,
        ] {
            assert_eq!(UploadKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(UploadKind::parse("bogus"), None);
    }
}
