//! Storage module for Cachet
//!
//! - `db`: SQLite - durable key-value store backing the persistent cache tier
//! - `memory`: in-process key-value store (ephemeral caches, tests)
//! - `json`: JSON - config file load/save

mod db;
mod json;
mod memory;

use crate::Result;

// SQLite Storage (durable)
pub use db::SqliteStore;

// In-process Storage
pub use memory::MemoryStore;

// JSON Storage (config files)
pub use json::JsonStore;

/// Usage snapshot of a durable store, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageEstimate {
    pub usage: u64,
    pub quota: u64,
}

impl StorageEstimate {
    /// Fraction of the quota currently used (0.0 when the quota is zero)
    pub fn ratio(&self) -> f64 {
        if self.quota == 0 {
            return 0.0;
        }
        self.usage as f64 / self.quota as f64
    }
}

/// Durable string key-value store shared with other components of the process.
///
/// Implementations must not assume they own the whole keyspace; callers only
/// touch keys under their own prefix.
pub trait DurableStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value. Capacity failures are reported as `Error::QuotaExceeded`.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value (no-op if absent)
    fn remove(&self, key: &str) -> Result<()>;

    /// Enumerate every key starting with `prefix`
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Usage against quota, if the backend can tell
    fn estimate(&self) -> Option<StorageEstimate> {
        None
    }
}
