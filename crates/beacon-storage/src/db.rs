//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex. WAL mode and the
//! recommended PRAGMAs are configured on open.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use tracing::info;

use beacon_core::error::BeaconError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path and run pending
    /// migrations.
    pub fn new(path: &Path) -> Result<Self, BeaconError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| BeaconError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| BeaconError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());
        Self::migrated(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, BeaconError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| BeaconError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        Self::migrated(conn)
    }

    fn migrated(conn: Connection) -> Result<Self, BeaconError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, BeaconError>
    where
        F: FnOnce(&Connection) -> Result<T, BeaconError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| BeaconError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

/// Decode an epoch-milliseconds column.
pub(crate) fn datetime_from_millis(ms: i64) -> Result<DateTime<Utc>, BeaconError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| BeaconError::Storage(format!("Invalid timestamp: {}", ms)))
}
