//! Outgoing payload envelopes.
//!
//! The wire encoding proper belongs to the collector contract; here the
//! envelopes are plain serde structs serialized to JSON bytes and handed
//! opaquely to the upload layer.

use beacon_core::{
    CrashReport, LogRecord, MetadataRecord, SessionId, SessionRecord, SpanRecord, SpanStatus,
    SpanType,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Envelope for one finished session: the session itself, its spans with
/// the synthesized root span, and the metadata visible to it.
#[derive(Debug, Serialize)]
pub struct SessionPayload {
    pub session: SessionRecord,
    pub spans: Vec<SpanRecord>,
    pub metadata: Vec<MetadataRecord>,
}

/// Envelope for one closed log batch.
#[derive(Debug, Serialize)]
pub struct LogsPayload {
    pub logs: Vec<LogRecord>,
    pub metadata: Vec<MetadataRecord>,
}

/// Envelope for one closed span batch, exported mid-session. The same
/// spans ship again inside their session payload; the collector
/// deduplicates by record id.
#[derive(Debug, Serialize)]
pub struct SpansPayload {
    pub spans: Vec<SpanRecord>,
}

/// Envelope for one crash report, associated with a session when
/// correlation found one.
#[derive(Debug, Serialize)]
pub struct CrashPayload {
    pub report_id: String,
    pub signal: String,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub session_id: Option<SessionId>,
    pub payload: serde_json::Value,
}

impl CrashPayload {
    pub fn new(report: &CrashReport, session_id: Option<SessionId>) -> Self {
        Self {
            report_id: report.id.clone(),
            signal: report.signal.clone(),
            timestamp: report.timestamp,
            session_id,
            payload: report.payload.clone(),
        }
    }
}

/// Serialize an envelope to bytes.
pub fn encode<T: Serialize>(payload: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(payload)
}

/// The root span covering a whole session, built from the session record
/// itself. It exists nowhere else: the generic span-export path never sees
/// it, so session finalization cannot race a batch export.
pub fn session_root_span(session: &SessionRecord) -> SpanRecord {
    let status = if session.crash_report_id.is_some() {
        SpanStatus::Error
    } else {
        SpanStatus::Ok
    };

    let mut attributes = BTreeMap::new();
    attributes.insert("session.state".to_string(), session.state.as_str().to_string());
    attributes.insert("session.cold_start".to_string(), session.cold_start.to_string());
    attributes.insert("session.clean_exit".to_string(), session.clean_exit.to_string());
    if let Some(report_id) = &session.crash_report_id {
        attributes.insert("session.crash_report_id".to_string(), report_id.clone());
    }

    SpanRecord {
        id: session.span_id.clone(),
        trace_id: session.trace_id.clone(),
        parent_span_id: None,
        name: "session".to_string(),
        span_type: SpanType::Session,
        start_time: session.start_time,
        end_time: Some(session.effective_end()),
        status,
        attributes,
        session_id: Some(session.id),
        process_id: session.process_id,
    }
}
