//! Log record operations.

use crate::error::StorageResult;
use crate::time::{format_ts, parse_ts};
use crate::BeaconStorage;
use beacon_core::{LogRecord, ProcessId};
use rusqlite::{params, Row};
use tracing::debug;
use uuid::Uuid;

fn log_from_row(row: &Row<'_>) -> StorageResult<LogRecord> {
    let id: String = row.get("id")?;
    let severity: String = row.get("severity")?;
    let timestamp: String = row.get("timestamp")?;
    let attributes: String = row.get("attributes")?;
    let session_id: Option<String> = row.get("session_id")?;
    let process_id: String = row.get("process_id")?;

    Ok(LogRecord {
        id: Uuid::parse_str(&id)
            .map_err(|e| crate::StorageError::Corrupt(format!("bad log id {id:?}: {e}")))?,
        severity: severity.parse()?,
        body: row.get("body")?,
        timestamp: parse_ts(&timestamp)?,
        attributes: serde_json::from_str(&attributes)?,
        session_id: session_id.as_deref().map(str::parse).transpose()?,
        process_id: process_id.parse()?,
    })
}

impl BeaconStorage {
    /// Persist a log record. Logs are immutable, so plain insert.
    pub fn insert_log(&self, log: &LogRecord) -> StorageResult<()> {
        self.pool().with_connection(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO logs
                 (id, severity, body, timestamp, attributes, session_id, process_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    log.id.to_string(),
                    log.severity.as_str(),
                    log.body,
                    format_ts(log.timestamp),
                    serde_json::to_string(&log.attributes)?,
                    log.session_id.map(|id| id.to_string()),
                    log.process_id.to_string(),
                ],
            )?;
            Ok(())
        })
    }

    /// Logs left behind by processes other than the current one, in
    /// emission order. These are re-batched and uploaded at launch.
    pub fn fetch_logs_excluding_process(
        &self,
        current_process: ProcessId,
    ) -> StorageResult<Vec<LogRecord>> {
        self.pool().with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM logs WHERE process_id != ?1 ORDER BY timestamp ASC",
            )?;
            let mut rows = stmt.query(params![current_process.to_string()])?;

            let mut logs = Vec::new();
            while let Some(row) = rows.next()? {
                logs.push(log_from_row(row)?);
            }
            Ok(logs)
        })
    }

    /// Delete logs whose batch was confirmed delivered to the upload layer.
    pub fn delete_logs(&self, ids: &[Uuid]) -> StorageResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.pool().with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM logs WHERE id = ?1")?;
                for id in ids {
                    deleted += stmt.execute(params![id.to_string()])?;
                }
            }
            tx.commit()?;
            debug!(deleted, "deleted delivered logs");
            Ok(deleted)
        })
    }

    /// Drop every stored log. Last-resort cleanup when recovered logs
    /// cannot be read back.
    pub fn remove_all_logs(&self) -> StorageResult<usize> {
        self.pool()
            .with_connection(|conn| Ok(conn.execute("DELETE FROM logs", [])?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{SessionId, Severity};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn sample_log(process_id: ProcessId, body: &str) -> LogRecord {
        LogRecord {
            id: Uuid::new_v4(),
            severity: Severity::Info,
            body: body.into(),
            timestamp: Utc::now(),
            attributes: BTreeMap::new(),
            session_id: Some(SessionId::random()),
            process_id,
        }
    }

    #[test]
    fn insert_is_idempotent() {
        let storage = BeaconStorage::in_memory().unwrap();
        let log = sample_log(ProcessId::random(), "hello");

        storage.insert_log(&log).unwrap();
        storage.insert_log(&log).unwrap();

        let other = ProcessId::random();
        let fetched = storage.fetch_logs_excluding_process(other).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].body, "hello");
    }

    #[test]
    fn fetch_excluding_process_skips_current() {
        let storage = BeaconStorage::in_memory().unwrap();
        let current = ProcessId::random();
        let dead = ProcessId::random();

        storage.insert_log(&sample_log(current, "mine")).unwrap();
        storage.insert_log(&sample_log(dead, "orphan")).unwrap();

        let fetched = storage.fetch_logs_excluding_process(current).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].body, "orphan");
    }

    #[test]
    fn delete_removes_only_given_ids() {
        let storage = BeaconStorage::in_memory().unwrap();
        let process = ProcessId::random();
        let keep = sample_log(process, "keep");
        let drop = sample_log(process, "drop");
        storage.insert_log(&keep).unwrap();
        storage.insert_log(&drop).unwrap();

        let deleted = storage.delete_logs(&[drop.id]).unwrap();
        assert_eq!(deleted, 1);

        let fetched = storage
            .fetch_logs_excluding_process(ProcessId::random())
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, keep.id);
    }
}
