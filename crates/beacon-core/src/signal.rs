//! Signal enums and the raw shapes producers hand to the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when decoding an enum from its stored string form.
#[derive(Debug, Error)]
#[error("unknown {kind} value: {value}")]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

/// Attribute keys the pipeline itself reads or writes.
///
/// Producers never set the session keys; the classifier stamps them after
/// consulting the session context, which is what guarantees consistent
/// attribution even when a producer races a session transition.
pub mod attr {
    /// Marks a signal as emitted by the pipeline's own diagnostics.
    pub const INTERNAL: &str = "beacon.internal";
    /// Session the signal was attributed to.
    pub const SESSION_ID: &str = "beacon.session_id";
    /// Foreground/background state at attribution time.
    pub const SESSION_STATE: &str = "beacon.session_state";
}

/// Whether a signal was emitted by the pipeline itself or by the host
/// application's instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalScope {
    Internal,
    External,
}

/// Foreground/background state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Foreground,
    Background,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
        }
    }
}

impl FromStr for SessionState {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "foreground" => Ok(Self::Foreground),
            "background" => Ok(Self::Background),
            other => Err(EnumParseError {
                kind: "session state",
                value: other.into(),
            }),
        }
    }
}

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

impl FromStr for Severity {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            other => Err(EnumParseError {
                kind: "severity",
                value: other.into(),
            }),
        }
    }
}

/// Span status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

impl FromStr for SpanStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unset" => Ok(Self::Unset),
            "ok" => Ok(Self::Ok),
            "error" => Ok(Self::Error),
            other => Err(EnumParseError {
                kind: "span status",
                value: other.into(),
            }),
        }
    }
}

/// Coarse span category.
///
/// `Session` is reserved for the root span representing a whole session;
/// the generic span-export path refuses it so that session finalization
/// stays under the session controller's exclusive control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanType {
    Performance,
    Ux,
    Network,
    System,
    Session,
}

impl SpanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Ux => "ux",
            Self::Network => "network",
            Self::System => "system",
            Self::Session => "session",
        }
    }
}

impl FromStr for SpanType {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "performance" => Ok(Self::Performance),
            "ux" => Ok(Self::Ux),
            "network" => Ok(Self::Network),
            "system" => Ok(Self::System),
            "session" => Ok(Self::Session),
            other => Err(EnumParseError {
                kind: "span type",
                value: other.into(),
            }),
        }
    }
}

/// A span as a producer reports it, before classification and stamping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSpan {
    /// Hex span identifier chosen by the producer.
    pub span_id: String,
    /// Hex trace identifier.
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub span_type: SpanType,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SpanStatus,
    pub attributes: BTreeMap<String, String>,
}

/// A log event as a producer reports it, before classification and stamping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub severity: Severity,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
}
