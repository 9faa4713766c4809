//! In-process key-value store

use super::{DurableStore, StorageEstimate};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// `DurableStore` kept entirely in memory.
///
/// Contents do not survive the process, but quota accounting matches
/// `SqliteStore` (key bytes + value bytes), which makes it a drop-in backend
/// for ephemeral caches and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes beyond `quota_bytes`
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))
    }

    fn used_bytes(entries: &HashMap<String, String>) -> u64 {
        entries
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock()?;

        if let Some(quota) = self.quota_bytes {
            let existing = entries
                .get(key)
                .map(|v| (key.len() + v.len()) as u64)
                .unwrap_or(0);
            let projected =
                Self::used_bytes(&entries).saturating_sub(existing) + (key.len() + value.len()) as u64;
            if projected > quota {
                return Err(Error::QuotaExceeded(format!(
                    "write would use {} of {} bytes",
                    projected, quota
                )));
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn estimate(&self) -> Option<StorageEstimate> {
        let quota = self.quota_bytes?;
        let entries = self.lock().ok()?;
        Some(StorageEstimate {
            usage: Self::used_bytes(&entries),
            quota,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let store = MemoryStore::new();
        store.set("p_a", "1").unwrap();
        store.set("q_b", "2").unwrap();

        assert_eq!(store.get("p_a").unwrap(), Some("1".to_string()));
        assert_eq!(store.keys_with_prefix("p_").unwrap(), vec!["p_a".to_string()]);

        store.remove("p_a").unwrap();
        store.remove("p_a").unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.estimate().is_none());
    }

    #[test]
    fn test_quota() {
        let store = MemoryStore::with_quota(10);
        store.set("a", "1234").unwrap(); // 5
        assert!(store.set("b", "123456").unwrap_err().is_quota()); // 12

        store.remove("a").unwrap();
        store.set("b", "123456").unwrap();

        let est = store.estimate().unwrap();
        assert_eq!(est.usage, 7);
        assert_eq!(est.quota, 10);
    }
}
