//! Store open options.

use std::path::{Path, PathBuf};

/// Options controlling how the sqlite database is opened.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Database file path, or `:memory:` for an ephemeral store.
    pub path: PathBuf,
    /// WAL journal mode; leave on except for read-only inspection.
    pub wal_mode: bool,
    /// How long a writer waits on a locked database before erroring.
    pub busy_timeout_ms: u32,
}

impl StorageOptions {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            wal_mode: true,
            busy_timeout_ms: 5_000,
        }
    }

    /// In-memory database for tests.
    pub fn memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            wal_mode: false,
            busy_timeout_ms: 5_000,
        }
    }

    pub fn is_memory(&self) -> bool {
        self.path.to_str() == Some(":memory:")
    }
}
