// src/storage/mod.rs

//! SQLite persistence for videos, query fetch state, and the quota ledger.
//!
//! A single connection in WAL mode behind a mutex; multi-row writes and
//! read-modify-write sequences go through explicit transactions so that
//! concurrent callers never lose updates.

pub mod state;
pub mod videos;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, Transaction};

use crate::error::Result;

// Re-export for convenience
pub use state::{KeyUsageStore, QueryStateStore};
pub use videos::{StoreStats, VideoStore};

/// Thread-safe SQLite database wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode and creates any missing tables.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;

        log::info!("Database opened at {}", path.as_ref().display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(init_schema)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(init_schema)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().expect("database lock poisoned");
        f(&conn)
    }

    /// Execute a closure inside a transaction.
    ///
    /// Commits when the closure succeeds; any error rolls the whole
    /// transaction back.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Create any missing tables and indexes.
fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS videos (
             id                INTEGER PRIMARY KEY AUTOINCREMENT,
             video_id          TEXT NOT NULL UNIQUE,
             title             TEXT NOT NULL,
             description       TEXT NOT NULL DEFAULT '',
             published_at      INTEGER NOT NULL,
             thumbnail_default TEXT NOT NULL DEFAULT '',
             thumbnail_medium  TEXT NOT NULL DEFAULT '',
             thumbnail_high    TEXT NOT NULL DEFAULT '',
             channel_id        TEXT NOT NULL DEFAULT '',
             channel_title     TEXT NOT NULL DEFAULT '',
             duration          TEXT NOT NULL DEFAULT '',
             view_count        INTEGER,
             created_at        INTEGER NOT NULL,
             updated_at        INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_videos_published_at
             ON videos (published_at DESC);

         CREATE TABLE IF NOT EXISTS query_fetch_state (
             query           TEXT PRIMARY KEY,
             last_fetched    INTEGER NOT NULL,
             total_results   INTEGER NOT NULL DEFAULT 0,
             next_page_token TEXT,
             created_at      INTEGER NOT NULL,
             updated_at      INTEGER NOT NULL
         );

         CREATE TABLE IF NOT EXISTS api_key_usage (
             key_hash   TEXT PRIMARY KEY,
             quota_used INTEGER NOT NULL DEFAULT 0,
             last_reset TEXT NOT NULL,
             exhausted  INTEGER NOT NULL DEFAULT 0,
             created_at INTEGER NOT NULL,
             updated_at INTEGER NOT NULL
         );",
    )?;
    Ok(())
}

/// Convert a stored epoch-seconds column back to a UTC timestamp.
pub(crate) fn from_epoch(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}
