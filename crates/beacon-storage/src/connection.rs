//! SQLite connection management.
//!
//! Uses a simple Arc<Mutex<Connection>> wrapper. With WAL mode a single
//! serialized connection is enough for this workload; every caller accepts
//! "eventually consistent with the last completed write".

use crate::error::{StorageError, StorageResult};
use crate::options::StorageOptions;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::Arc;
use tracing::{debug, info};

/// Thread-safe SQLite connection wrapper.
#[derive(Clone)]
pub struct SqlitePool {
    conn: Arc<Mutex<Connection>>,
    options: StorageOptions,
}

impl SqlitePool {
    /// Open a connection with the given options and apply the supplied
    /// schema setup before returning.
    pub fn open(
        options: StorageOptions,
        schema: impl FnOnce(&Connection) -> StorageResult<()>,
    ) -> StorageResult<Self> {
        info!(path = ?options.path, "opening sqlite database");

        let conn = if options.is_memory() {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = options.path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Connection(format!("failed to create directory: {e}"))
                })?;
            }
            Connection::open(&options.path)?
        };

        let pool = Self {
            conn: Arc::new(Mutex::new(conn)),
            options,
        };

        pool.configure_pragmas()?;
        pool.with_connection(schema)?;

        Ok(pool)
    }

    /// Execute a closure with the connection.
    pub fn with_connection<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a closure with mutable access (needed for transactions).
    pub fn with_connection_mut<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T>,
    {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    fn configure_pragmas(&self) -> StorageResult<()> {
        debug!("configuring sqlite pragmas");

        self.with_connection(|conn| {
            if self.options.wal_mode {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
                conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
            }

            conn.execute_batch(&format!(
                "PRAGMA busy_timeout = {};",
                self.options.busy_timeout_ms
            ))?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch("PRAGMA temp_store = MEMORY;")?;

            Ok(())
        })
    }
}
