//! Span record operations.

use crate::error::StorageResult;
use crate::time::{format_ts, parse_ts};
use crate::BeaconStorage;
use beacon_core::{ProcessId, SessionId, SpanRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use tracing::debug;

fn span_from_row(row: &Row<'_>) -> StorageResult<SpanRecord> {
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let span_type: String = row.get("type")?;
    let status: String = row.get("status")?;
    let attributes: String = row.get("attributes")?;
    let session_id: Option<String> = row.get("session_id")?;
    let process_id: String = row.get("process_id")?;

    Ok(SpanRecord {
        id: row.get("id")?,
        trace_id: row.get("trace_id")?,
        parent_span_id: row.get("parent_span_id")?,
        name: row.get("name")?,
        span_type: span_type.parse()?,
        start_time: parse_ts(&start_time)?,
        end_time: end_time.as_deref().map(parse_ts).transpose()?,
        status: status.parse()?,
        attributes: serde_json::from_str(&attributes)?,
        session_id: session_id.as_deref().map(str::parse).transpose()?,
        process_id: process_id.parse()?,
    })
}

impl BeaconStorage {
    /// Insert or replace a span. Called on every span state change so a
    /// crash loses at most the mutation in flight.
    pub fn upsert_span(&self, span: &SpanRecord) -> StorageResult<()> {
        self.pool().with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO spans
                 (id, trace_id, parent_span_id, name, type, start_time, end_time,
                  status, attributes, session_id, process_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    span.id,
                    span.trace_id,
                    span.parent_span_id,
                    span.name,
                    span.span_type.as_str(),
                    format_ts(span.start_time),
                    span.end_time.map(format_ts),
                    span.status.as_str(),
                    serde_json::to_string(&span.attributes)?,
                    span.session_id.map(|id| id.to_string()),
                    span.process_id.to_string(),
                ],
            )?;
            Ok(())
        })
    }

    /// All spans attributed to the given session, oldest first.
    pub fn fetch_spans_for_session(&self, session_id: SessionId) -> StorageResult<Vec<SpanRecord>> {
        self.pool().with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM spans WHERE session_id = ?1 ORDER BY start_time ASC",
            )?;
            let mut rows = stmt.query(params![session_id.to_string()])?;

            let mut spans = Vec::new();
            while let Some(row) = rows.next()? {
                spans.push(span_from_row(row)?);
            }
            Ok(spans)
        })
    }

    /// Synthesize an end time for every open span of a session and mark it
    /// failed. Used when a crash truncated the session.
    pub fn close_open_spans_for_session(
        &self,
        session_id: SessionId,
        end_time: DateTime<Utc>,
    ) -> StorageResult<usize> {
        self.pool().with_connection(|conn| {
            let closed = conn.execute(
                "UPDATE spans SET end_time = ?1, status = 'error'
                 WHERE session_id = ?2 AND end_time IS NULL AND type != 'session'",
                params![format_ts(end_time), session_id.to_string()],
            )?;
            debug!(session = %session_id, closed, "closed open spans for session");
            Ok(closed)
        })
    }

    /// Close every remaining open span from a process other than the
    /// current one. Runs at recovery, before ingestion resumes.
    pub fn close_open_spans(
        &self,
        end_time: DateTime<Utc>,
        current_process: ProcessId,
    ) -> StorageResult<usize> {
        self.pool().with_connection(|conn| {
            let closed = conn.execute(
                "UPDATE spans SET end_time = ?1, status = 'error'
                 WHERE end_time IS NULL AND type != 'session' AND process_id != ?2",
                params![format_ts(end_time), current_process.to_string()],
            )?;
            debug!(closed, "closed leftover open spans");
            Ok(closed)
        })
    }

    /// Delete the spans belonging to an uploaded session.
    pub fn delete_spans_for_session(&self, session_id: SessionId) -> StorageResult<usize> {
        self.pool().with_connection(|conn| {
            Ok(conn.execute(
                "DELETE FROM spans WHERE session_id = ?1",
                params![session_id.to_string()],
            )?)
        })
    }

    /// Delete closed spans that can never be exported anymore: spans are
    /// only sent with their owning session, so anything older than the
    /// oldest stored session is unreachable. With no session stored, all
    /// closed spans are unreachable.
    pub fn clean_old_spans(&self, oldest_session_start: Option<DateTime<Utc>>) -> StorageResult<usize> {
        self.pool().with_connection(|conn| {
            let deleted = match oldest_session_start {
                Some(cutoff) => conn.execute(
                    "DELETE FROM spans WHERE end_time IS NOT NULL AND end_time < ?1",
                    params![format_ts(cutoff)],
                )?,
                None => conn.execute("DELETE FROM spans WHERE end_time IS NOT NULL", [])?,
            };
            debug!(deleted, "cleaned old spans");
            Ok(deleted)
        })
    }
}
