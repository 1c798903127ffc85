//! Session record operations.

use crate::error::StorageResult;
use crate::time::{format_ts, parse_ts};
use crate::BeaconStorage;
use beacon_core::{SessionId, SessionRecord, SessionState};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

fn session_from_row(row: &Row<'_>) -> StorageResult<SessionRecord> {
    let id: String = row.get("id")?;
    let process_id: String = row.get("process_id")?;
    let state: String = row.get("state")?;
    let start_time: String = row.get("start_time")?;
    let last_heartbeat_time: String = row.get("last_heartbeat_time")?;
    let end_time: Option<String> = row.get("end_time")?;

    Ok(SessionRecord {
        id: id.parse()?,
        process_id: process_id.parse()?,
        state: state.parse()?,
        trace_id: row.get("trace_id")?,
        span_id: row.get("span_id")?,
        start_time: parse_ts(&start_time)?,
        last_heartbeat_time: parse_ts(&last_heartbeat_time)?,
        end_time: end_time.as_deref().map(parse_ts).transpose()?,
        crash_report_id: row.get("crash_report_id")?,
        cold_start: row.get("cold_start")?,
        clean_exit: row.get("clean_exit")?,
    })
}

impl BeaconStorage {
    /// Insert or replace a session record.
    pub fn upsert_session(&self, session: &SessionRecord) -> StorageResult<()> {
        self.pool().with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sessions
                 (id, process_id, state, trace_id, span_id, start_time,
                  last_heartbeat_time, end_time, crash_report_id, cold_start, clean_exit)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    session.id.to_string(),
                    session.process_id.to_string(),
                    session.state.as_str(),
                    session.trace_id,
                    session.span_id,
                    format_ts(session.start_time),
                    format_ts(session.last_heartbeat_time),
                    session.end_time.map(format_ts),
                    session.crash_report_id,
                    session.cold_start,
                    session.clean_exit,
                ],
            )?;
            Ok(())
        })
    }

    pub fn fetch_session(&self, id: SessionId) -> StorageResult<Option<SessionRecord>> {
        self.pool().with_connection(|conn| {
            conn.query_row(
                "SELECT * FROM sessions WHERE id = ?1",
                params![id.to_string()],
                |row| Ok(session_from_row(row)),
            )
            .optional()?
            .transpose()
        })
    }

    /// Every stored session, oldest first.
    pub fn fetch_all_sessions(&self) -> StorageResult<Vec<SessionRecord>> {
        self.pool().with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM sessions ORDER BY start_time ASC")?;
            let mut rows = stmt.query([])?;

            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(session_from_row(row)?);
            }
            Ok(sessions)
        })
    }

    pub fn fetch_oldest_session(&self) -> StorageResult<Option<SessionRecord>> {
        self.pool().with_connection(|conn| {
            conn.query_row(
                "SELECT * FROM sessions ORDER BY start_time ASC LIMIT 1",
                [],
                |row| Ok(session_from_row(row)),
            )
            .optional()?
            .transpose()
        })
    }

    pub fn fetch_latest_session(&self) -> StorageResult<Option<SessionRecord>> {
        self.pool().with_connection(|conn| {
            conn.query_row(
                "SELECT * FROM sessions ORDER BY start_time DESC LIMIT 1",
                [],
                |row| Ok(session_from_row(row)),
            )
            .optional()?
            .transpose()
        })
    }

    /// Refresh a live session's heartbeat.
    pub fn update_heartbeat(&self, id: SessionId, at: DateTime<Utc>) -> StorageResult<()> {
        self.pool().with_connection(|conn| {
            conn.execute(
                "UPDATE sessions SET last_heartbeat_time = ?1 WHERE id = ?2",
                params![format_ts(at), id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Update a session's foreground/background state in place.
    pub fn update_session_state(&self, id: SessionId, state: SessionState) -> StorageResult<()> {
        self.pool().with_connection(|conn| {
            conn.execute(
                "UPDATE sessions SET state = ?1 WHERE id = ?2",
                params![state.as_str(), id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Record a clean session end.
    pub fn set_session_end(&self, id: SessionId, end: DateTime<Utc>) -> StorageResult<()> {
        self.pool().with_connection(|conn| {
            conn.execute(
                "UPDATE sessions SET end_time = ?1, clean_exit = 1 WHERE id = ?2",
                params![format_ts(end), id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Attach a crash report to a session, setting the end time only when
    /// no clean end was ever recorded.
    pub fn set_crash_ended(
        &self,
        id: SessionId,
        crash_time: DateTime<Utc>,
        crash_report_id: &str,
    ) -> StorageResult<()> {
        self.pool().with_connection(|conn| {
            conn.execute(
                "UPDATE sessions
                 SET end_time = COALESCE(end_time, ?1), crash_report_id = ?2
                 WHERE id = ?3",
                params![format_ts(crash_time), crash_report_id, id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn delete_session(&self, id: SessionId) -> StorageResult<()> {
        self.pool().with_connection(|conn| {
            conn.execute(
                "DELETE FROM sessions WHERE id = ?1",
                params![id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Candidate sessions for crash correlation: those whose
    /// `[start, last-heartbeat]` interval comes within `grace` of the given
    /// instant, most recent first. Proximity to either endpoint counts.
    pub fn fetch_sessions_around(
        &self,
        instant: DateTime<Utc>,
        grace: Duration,
    ) -> StorageResult<Vec<SessionRecord>> {
        let lower = format_ts(instant - grace);
        let upper = format_ts(instant + grace);

        self.pool().with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM sessions
                 WHERE start_time <= ?1 AND last_heartbeat_time >= ?2
                 ORDER BY start_time DESC",
            )?;
            let mut rows = stmt.query(params![upper, lower])?;

            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(session_from_row(row)?);
            }
            debug!(candidates = sessions.len(), "session candidates around instant");
            Ok(sessions)
        })
    }
}
