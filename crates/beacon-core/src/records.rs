//! Record types persisted by the durable store.

use crate::ids::{ProcessId, SessionId};
use crate::signal::{SessionState, Severity, SpanStatus, SpanType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A completed or in-flight timed operation.
///
/// Created when the span starts and rewritten on every state change, so a
/// crash never loses more than the mutation in flight. Deleted only after
/// its owning session uploads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    /// Hex span identifier; also the record id.
    pub id: String,
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub span_type: SpanType,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SpanStatus,
    pub attributes: BTreeMap<String, String>,
    pub session_id: Option<SessionId>,
    pub process_id: ProcessId,
}

impl SpanRecord {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// A single point-in-time event. Immutable after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: Uuid,
    pub severity: Severity,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
    pub session_id: Option<SessionId>,
    pub process_id: ProcessId,
}

/// One continuous app-usage interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub process_id: ProcessId,
    pub state: SessionState,
    /// Trace id of the root span covering the whole session.
    pub trace_id: String,
    /// Span id of the root span covering the whole session.
    pub span_id: String,
    pub start_time: DateTime<Utc>,
    pub last_heartbeat_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub crash_report_id: Option<String>,
    /// Whether this was the first session of its process.
    pub cold_start: bool,
    /// Set only by a clean `end_session`; recovery uses it to tell dirty
    /// terminations apart.
    pub clean_exit: bool,
}

impl SessionRecord {
    /// The session's effective close instant: a recorded end, or the last
    /// heartbeat when the process died without one.
    pub fn effective_end(&self) -> DateTime<Utc> {
        self.end_time.unwrap_or(self.last_heartbeat_time)
    }
}

/// What a metadata entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    Resource,
    CustomProperty,
    PersonaTag,
}

impl MetadataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::CustomProperty => "custom_property",
            Self::PersonaTag => "persona_tag",
        }
    }
}

impl std::str::FromStr for MetadataKind {
    type Err = crate::signal::EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resource" => Ok(Self::Resource),
            "custom_property" => Ok(Self::CustomProperty),
            "persona_tag" => Ok(Self::PersonaTag),
            other => Err(crate::signal::EnumParseError {
                kind: "metadata kind",
                value: other.into(),
            }),
        }
    }
}

/// Boundary at which a metadata entry is garbage-collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataLifespan {
    Permanent,
    Process,
    Session,
}

impl MetadataLifespan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::Process => "process",
            Self::Session => "session",
        }
    }
}

impl std::str::FromStr for MetadataLifespan {
    type Err = crate::signal::EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "permanent" => Ok(Self::Permanent),
            "process" => Ok(Self::Process),
            "session" => Ok(Self::Session),
            other => Err(crate::signal::EnumParseError {
                kind: "metadata lifespan",
                value: other.into(),
            }),
        }
    }
}

/// A resource, custom property, or persona tag attached to a process or
/// session. Uniquely keyed by (key, lifespan, lifespan id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub key: String,
    pub value: String,
    pub kind: MetadataKind,
    pub lifespan: MetadataLifespan,
    /// The session or process id the entry is scoped to; empty for
    /// permanent entries.
    pub lifespan_id: String,
    pub collected_at: DateTime<Utc>,
}
