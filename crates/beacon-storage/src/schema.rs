//! Schema management and migrations.

use crate::error::{StorageError, StorageResult};
use rusqlite::Connection;
use tracing::{debug, info};

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 1;

/// Apply all pending migrations.
pub fn apply_migrations(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version = get_current_version(conn)?;
    debug!(current_version, target_version = SCHEMA_VERSION, "checking migrations");

    if current_version < SCHEMA_VERSION {
        info!(from = current_version, to = SCHEMA_VERSION, "applying schema migrations");
        apply_migration_v1(conn)?;
    }

    Ok(())
}

fn get_current_version(conn: &Connection) -> StorageResult<i32> {
    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .unwrap_or(None);

    Ok(version.unwrap_or(0))
}

fn record_migration(conn: &Connection, version: i32) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version) VALUES (?)",
        [version],
    )?;
    Ok(())
}

fn apply_migration_v1(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(SCHEMA_V1)
        .map_err(|e| StorageError::Schema(format!("failed to apply v1 schema: {e}")))?;

    record_migration(conn, 1)?;
    Ok(())
}

/// Initial schema: one table per record type.
///
/// Timestamps are fixed-width RFC 3339 text; attribute maps are JSON text.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS spans (
    id TEXT PRIMARY KEY NOT NULL,
    trace_id TEXT NOT NULL,
    parent_span_id TEXT,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    status TEXT NOT NULL,
    attributes TEXT NOT NULL DEFAULT '{}',
    session_id TEXT,
    process_id TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_spans_session ON spans(session_id);
CREATE INDEX IF NOT EXISTS idx_spans_open ON spans(end_time) WHERE end_time IS NULL;

CREATE TABLE IF NOT EXISTS logs (
    id TEXT PRIMARY KEY NOT NULL,
    severity TEXT NOT NULL,
    body TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    attributes TEXT NOT NULL DEFAULT '{}',
    session_id TEXT,
    process_id TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_process ON logs(process_id);
CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY NOT NULL,
    process_id TEXT NOT NULL,
    state TEXT NOT NULL,
    trace_id TEXT NOT NULL,
    span_id TEXT NOT NULL,
    start_time TEXT NOT NULL,
    last_heartbeat_time TEXT NOT NULL,
    end_time TEXT,
    crash_report_id TEXT,
    cold_start INTEGER NOT NULL DEFAULT 0,
    clean_exit INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_sessions_start ON sessions(start_time);
CREATE INDEX IF NOT EXISTS idx_sessions_process ON sessions(process_id);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    kind TEXT NOT NULL,
    lifespan TEXT NOT NULL,
    lifespan_id TEXT NOT NULL DEFAULT '',
    collected_at TEXT NOT NULL,
    PRIMARY KEY (key, lifespan, lifespan_id)
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_applies_cleanly() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();

        let version = get_current_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        apply_migrations(&conn).unwrap();
        apply_migrations(&conn).unwrap();

        let version = get_current_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn all_tables_exist() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            let rows = stmt.query_map([], |row| row.get(0)).unwrap();
            rows.filter_map(Result::ok).collect()
        };

        for table in ["spans", "logs", "sessions", "metadata"] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }
}
