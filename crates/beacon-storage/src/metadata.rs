//! Metadata record operations and lifespan garbage collection.

use crate::error::StorageResult;
use crate::time::{format_ts, parse_ts};
use crate::BeaconStorage;
use beacon_core::{MetadataLifespan, MetadataRecord, ProcessId, SessionRecord};
use rusqlite::{params, Row};
use tracing::debug;

fn metadata_from_row(row: &Row<'_>) -> StorageResult<MetadataRecord> {
    let kind: String = row.get("kind")?;
    let lifespan: String = row.get("lifespan")?;
    let collected_at: String = row.get("collected_at")?;

    Ok(MetadataRecord {
        key: row.get("key")?,
        value: row.get("value")?,
        kind: kind.parse()?,
        lifespan: lifespan.parse()?,
        lifespan_id: row.get("lifespan_id")?,
        collected_at: parse_ts(&collected_at)?,
    })
}

impl BeaconStorage {
    /// Insert or replace a metadata entry.
    pub fn upsert_metadata(&self, record: &MetadataRecord) -> StorageResult<()> {
        self.pool().with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO metadata
                 (key, value, kind, lifespan, lifespan_id, collected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.key,
                    record.value,
                    record.kind.as_str(),
                    record.lifespan.as_str(),
                    record.lifespan_id,
                    format_ts(record.collected_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Everything applicable to the given session: permanent entries, the
    /// owning process's entries, and the session's own entries.
    pub fn fetch_metadata_for_session(
        &self,
        session: &SessionRecord,
    ) -> StorageResult<Vec<MetadataRecord>> {
        self.pool().with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM metadata
                 WHERE lifespan = 'permanent'
                    OR (lifespan = 'process' AND lifespan_id = ?1)
                    OR (lifespan = 'session' AND lifespan_id = ?2)
                 ORDER BY key ASC",
            )?;
            let mut rows = stmt.query(params![
                session.process_id.to_string(),
                session.id.to_string()
            ])?;

            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(metadata_from_row(row)?);
            }
            Ok(records)
        })
    }

    /// Garbage-collect by lifespan boundary: session-scoped entries of
    /// sessions no longer stored, and process-scoped entries of any process
    /// other than the current one. Permanent entries survive.
    pub fn clean_metadata(&self, current_process: ProcessId) -> StorageResult<usize> {
        self.pool().with_connection(|conn| {
            let removed = conn.execute(
                "DELETE FROM metadata
                 WHERE (lifespan = ?1 AND lifespan_id NOT IN (SELECT id FROM sessions))
                    OR (lifespan = ?2 AND lifespan_id != ?3)",
                params![
                    MetadataLifespan::Session.as_str(),
                    MetadataLifespan::Process.as_str(),
                    current_process.to_string(),
                ],
            )?;
            debug!(removed, "cleaned metadata by lifespan");
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{MetadataKind, SessionId, SessionState};
    use chrono::Utc;

    fn entry(key: &str, lifespan: MetadataLifespan, lifespan_id: String) -> MetadataRecord {
        MetadataRecord {
            key: key.into(),
            value: "v".into(),
            kind: MetadataKind::CustomProperty,
            lifespan,
            lifespan_id,
            collected_at: Utc::now(),
        }
    }

    fn session_record(id: SessionId, process_id: ProcessId) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            id,
            process_id,
            state: SessionState::Foreground,
            trace_id: "t".into(),
            span_id: "s".into(),
            start_time: now,
            last_heartbeat_time: now,
            end_time: None,
            crash_report_id: None,
            cold_start: false,
            clean_exit: false,
        }
    }

    #[test]
    fn fetch_for_session_spans_all_lifespans() {
        let storage = BeaconStorage::in_memory().unwrap();
        let session_id = SessionId::random();
        let process_id = ProcessId::random();
        let session = session_record(session_id, process_id);
        storage.upsert_session(&session).unwrap();

        storage
            .upsert_metadata(&entry("app.version", MetadataLifespan::Permanent, String::new()))
            .unwrap();
        storage
            .upsert_metadata(&entry("launch.kind", MetadataLifespan::Process, process_id.to_string()))
            .unwrap();
        storage
            .upsert_metadata(&entry("screen", MetadataLifespan::Session, session_id.to_string()))
            .unwrap();
        // belongs to another session
        storage
            .upsert_metadata(&entry(
                "other",
                MetadataLifespan::Session,
                SessionId::random().to_string(),
            ))
            .unwrap();

        let fetched = storage.fetch_metadata_for_session(&session).unwrap();
        let keys: Vec<_> = fetched.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["app.version", "launch.kind", "screen"]);
    }

    #[test]
    fn clean_metadata_gc_by_lifespan() {
        let storage = BeaconStorage::in_memory().unwrap();
        let live_session = SessionId::random();
        let current_process = ProcessId::random();
        storage
            .upsert_session(&session_record(live_session, current_process))
            .unwrap();

        storage
            .upsert_metadata(&entry("keep.permanent", MetadataLifespan::Permanent, String::new()))
            .unwrap();
        storage
            .upsert_metadata(&entry(
                "keep.process",
                MetadataLifespan::Process,
                current_process.to_string(),
            ))
            .unwrap();
        storage
            .upsert_metadata(&entry(
                "keep.session",
                MetadataLifespan::Session,
                live_session.to_string(),
            ))
            .unwrap();
        storage
            .upsert_metadata(&entry(
                "drop.process",
                MetadataLifespan::Process,
                ProcessId::random().to_string(),
            ))
            .unwrap();
        storage
            .upsert_metadata(&entry(
                "drop.session",
                MetadataLifespan::Session,
                SessionId::random().to_string(),
            ))
            .unwrap();

        let removed = storage.clean_metadata(current_process).unwrap();
        assert_eq!(removed, 2);

        let session = session_record(live_session, current_process);
        let keys: Vec<_> = storage
            .fetch_metadata_for_session(&session)
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(keys, vec!["keep.permanent", "keep.process", "keep.session"]);
    }
}
