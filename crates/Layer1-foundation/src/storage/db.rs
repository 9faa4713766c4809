//! SQLite key-value store for durable cache entries
//!
//! One `kv` table holds every key. Callers namespace their keys with a
//! prefix; the store itself is prefix-agnostic.
//!
//! ## Schema Version
//!
//! The schema version is recorded in `schema_version` on first open.
//! - Version 1: `kv(key, value)`
//!
//! A database written by a newer schema is refused rather than guessed at.

use super::{DurableStore, StorageEstimate};
use crate::{Error, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// SQLite-backed durable store with an optional byte quota
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    quota_bytes: Option<u64>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("quota_bytes", &self.quota_bytes)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Storage(format!("Failed to create data directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;

        Self::from_connection(conn)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            quota_bytes: None,
        };

        store.initialize_schema()?;
        store.check_schema_version()?;

        Ok(store)
    }

    /// Limit the total bytes (keys + values) the store accepts
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))
    }

    /// Get current schema version from database
    pub fn get_schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Failed to get schema version: {}", e)))
    }

    /// Initialize database schema (base tables)
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Key-value entries
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Insert initial schema version if not exists
            INSERT OR IGNORE INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Refuse databases written by a newer schema
    fn check_schema_version(&self) -> Result<()> {
        let version = self.get_schema_version()?;
        if version > CURRENT_SCHEMA_VERSION {
            return Err(Error::Storage(format!(
                "Database schema version {} is newer than supported version {}",
                version, CURRENT_SCHEMA_VERSION
            )));
        }
        debug!("Database schema version {}", version);
        Ok(())
    }

    fn used_bytes(conn: &Connection) -> Result<u64> {
        let used: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(length(CAST(key AS BLOB)) + length(CAST(value AS BLOB))), 0) FROM kv",
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Failed to measure usage: {}", e)))?;
        Ok(used.max(0) as u64)
    }

    fn entry_bytes(conn: &Connection, key: &str) -> Result<u64> {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT length(CAST(key AS BLOB)) + length(CAST(value AS BLOB)) FROM kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to measure entry: {}", e)))?;
        Ok(existing.unwrap_or(0).max(0) as u64)
    }

    /// Number of stored keys
    pub fn len(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))
            .map_err(|e| Error::Storage(format!("Failed to count keys: {}", e)))?;
        Ok(count.max(0) as usize)
    }

    /// Check whether the store is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl DurableStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT value FROM kv WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to read key: {}", e)))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;

        if let Some(quota) = self.quota_bytes {
            let used = Self::used_bytes(&conn)?;
            let existing = Self::entry_bytes(&conn, key)?;
            let projected = used.saturating_sub(existing) + (key.len() + value.len()) as u64;
            if projected > quota {
                return Err(Error::QuotaExceeded(format!(
                    "write of {} bytes would use {} of {} bytes",
                    key.len() + value.len(),
                    projected,
                    quota
                )));
            }
        }

        conn.execute(
            r#"
            INSERT INTO kv (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref err, _) if err.code == ErrorCode::DiskFull => {
                Error::QuotaExceeded(format!("database full: {}", e))
            }
            _ => Error::Storage(format!("Failed to write key: {}", e)),
        })?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;

        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|e| Error::Storage(format!("Failed to delete key: {}", e)))?;

        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare("SELECT key FROM kv WHERE substr(key, 1, ?2) = ?1")
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let keys = stmt
            .query_map(params![prefix, prefix.chars().count() as i64], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| Error::Storage(format!("Failed to query keys: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(keys)
    }

    fn estimate(&self) -> Option<StorageEstimate> {
        let quota = self.quota_bytes?;
        let conn = self.lock().ok()?;
        let usage = Self::used_bytes(&conn).ok()?;
        Some(StorageEstimate { usage, quota })
    }
}
