//! Durable record store for the Beacon telemetry pipeline.
//!
//! This is the durability boundary: once a write returns, the record
//! survives process termination. The batcher and upload coordinator work
//! on in-memory copies and can always be reconstructed from here after a
//! crash.
//!
//! Backed by sqlite in WAL mode behind a simple `Arc<Mutex<Connection>>`
//! wrapper; all access goes through one connection, serially, with no
//! optimistic concurrency.

mod connection;
mod error;
mod logs;
mod metadata;
mod options;
mod schema;
mod sessions;
mod spans;
mod time;

pub use connection::SqlitePool;
pub use error::{StorageError, StorageResult};
pub use options::StorageOptions;
pub use time::{format_ts, parse_ts};

use std::path::Path;

/// Handle to the durable record store.
///
/// Cloning is cheap; all clones share the underlying connection.
#[derive(Clone)]
pub struct BeaconStorage {
    pool: SqlitePool,
}

impl BeaconStorage {
    /// Open (or create) the store at the given path and apply migrations.
    pub fn open(options: StorageOptions) -> StorageResult<Self> {
        let pool = SqlitePool::open(options, schema::apply_migrations)?;
        Ok(Self { pool })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> StorageResult<Self> {
        Self::open(StorageOptions::memory())
    }

    /// Open a store at a file path with default options.
    pub fn open_at(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open(StorageOptions::new(path))
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
