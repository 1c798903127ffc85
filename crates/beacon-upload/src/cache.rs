//! Local cache of not-yet-confirmed payloads.
//!
//! Lives in its own sqlite database, separate from the record store: the
//! record store holds telemetry still being assembled, this cache holds
//! finished payloads awaiting delivery confirmation. Bytes are immutable
//! once written; only the attempt count changes.

use crate::error::UploadResult;
use beacon_core::UploadKind;
use beacon_storage::{format_ts, parse_ts, SqlitePool, StorageError, StorageOptions, StorageResult};
use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{params, Connection, Row};
use std::time::Duration;
use tracing::{debug, warn};

/// One cached outgoing payload.
#[derive(Debug, Clone)]
pub struct CachedUpload {
    pub id: String,
    pub kind: UploadKind,
    pub data: Vec<u8>,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
}

fn cached_from_row(row: &Row<'_>) -> StorageResult<CachedUpload> {
    let kind: String = row.get("kind")?;
    let created_at: String = row.get("created_at")?;

    Ok(CachedUpload {
        id: row.get("id")?,
        kind: UploadKind::parse(&kind)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown upload kind {kind:?}")))?,
        data: row.get("data")?,
        attempt_count: row.get("attempt_count")?,
        created_at: parse_ts(&created_at)?,
    })
}

fn apply_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS uploads (
            id TEXT NOT NULL,
            kind TEXT NOT NULL,
            data BLOB NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            PRIMARY KEY (id, kind)
        );
        CREATE INDEX IF NOT EXISTS idx_uploads_created ON uploads(created_at);",
    )?;
    Ok(())
}

/// Handle to the upload cache. Clones share the connection.
#[derive(Clone)]
pub struct UploadCache {
    pool: SqlitePool,
}

impl UploadCache {
    pub fn open(options: StorageOptions) -> UploadResult<Self> {
        let pool = SqlitePool::open(options, apply_schema)?;
        Ok(Self { pool })
    }

    /// In-memory cache for tests.
    pub fn in_memory() -> UploadResult<Self> {
        Self::open(StorageOptions::memory())
    }

    /// Persist a payload. A re-send of an id already cached leaves the
    /// original bytes untouched.
    pub fn save(&self, id: &str, kind: UploadKind, data: &[u8]) -> UploadResult<()> {
        self.pool.with_connection(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO uploads (id, kind, data, attempt_count, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![id, kind.as_str(), data, format_ts(Utc::now())],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    /// All cached payloads, oldest first.
    pub fn fetch_all(&self) -> UploadResult<Vec<CachedUpload>> {
        let entries = self.pool.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM uploads ORDER BY created_at ASC")?;
            let mut rows = stmt.query([])?;

            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(cached_from_row(row)?);
            }
            Ok(entries)
        })?;
        Ok(entries)
    }

    pub fn fetch(&self, id: &str, kind: UploadKind) -> UploadResult<Option<CachedUpload>> {
        let entry = self.pool.with_connection(|conn| {
            use rusqlite::OptionalExtension;
            conn.query_row(
                "SELECT * FROM uploads WHERE id = ?1 AND kind = ?2",
                params![id, kind.as_str()],
                |row| Ok(cached_from_row(row)),
            )
            .optional()?
            .transpose()
        })?;
        Ok(entry)
    }

    pub fn update_attempt_count(
        &self,
        id: &str,
        kind: UploadKind,
        attempt_count: u32,
    ) -> UploadResult<()> {
        self.pool.with_connection(|conn| {
            conn.execute(
                "UPDATE uploads SET attempt_count = ?1 WHERE id = ?2 AND kind = ?3",
                params![attempt_count, id, kind.as_str()],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    /// Remove an entry after confirmed delivery.
    pub fn delete(&self, id: &str, kind: UploadKind) -> UploadResult<()> {
        self.pool.with_connection(|conn| {
            conn.execute(
                "DELETE FROM uploads WHERE id = ?1 AND kind = ?2",
                params![id, kind.as_str()],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    /// Drop entries past the attempt ceiling or older than the maximum
    /// payload age. Entries *at* the ceiling stay, so a connectivity event
    /// or relaunch can still try them once more.
    pub fn clear_stale(
        &self,
        attempt_ceiling: u32,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> UploadResult<usize> {
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        let cutoff = format_ts(now - max_age);
        let dropped = self.pool.with_connection(|conn| {
            Ok(conn.execute(
                "DELETE FROM uploads WHERE attempt_count > ?1 OR created_at < ?2",
                params![attempt_ceiling, cutoff],
            )?)
        })?;

        if dropped > 0 {
            warn!(dropped, "dropped stale upload cache entries");
        } else {
            debug!("no stale upload cache entries");
        }
        Ok(dropped)
    }
}
