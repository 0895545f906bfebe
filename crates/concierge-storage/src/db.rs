//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use concierge_core::error::ConciergeError;

use crate::migrations;

/// Map any rusqlite error into a storage error with context.
pub(crate) fn storage_err(context: &str, e: rusqlite::Error) -> ConciergeError {
    ConciergeError::Storage(format!("{}: {}", context, e))
}

/// Thread-safe SQLite database wrapper.
///
/// The connection is wrapped in a Mutex since rusqlite Connection is not Sync.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path and run pending
    /// migrations.
    pub fn new(path: &Path) -> Result<Self, ConciergeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(|e| storage_err("Failed to open database", e))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -16384;",
        )
        .map_err(|e| storage_err("Failed to set pragmas", e))?;

        info!("Database opened at {}", path.display());
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    pub fn in_memory() -> Result<Self, ConciergeError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| storage_err("Failed to open in-memory db", e))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| storage_err("Failed to set pragmas", e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, ConciergeError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure, so the closure
    /// should not await or block on other locks.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ConciergeError>
    where
        F: FnOnce(&Connection) -> Result<T, ConciergeError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConciergeError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
