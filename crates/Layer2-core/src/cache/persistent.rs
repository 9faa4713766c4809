//! Persistent tier: durable, size-bounded store of serialized entries
//!
//! Every entry lives at `<prefix><key>` in a shared [`DurableStore`] as one
//! JSON envelope. The tier only ever touches keys under its own prefix, plus
//! the version marker it is asked to maintain.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use cachet_foundation::{CacheConfig, DurableStore, Result, StorageEstimate};

use super::entry::CacheEntry;
use super::eviction::{EvictionPolicy, RankKey};

/// Result of a persistent write that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    /// Entry is too large or not encodable; nothing was written
    Skipped,
}

/// Live entries found by a full scan, after purging unusable ones
#[derive(Debug, Default)]
pub struct Scan {
    pub live: Vec<(String, RankKey)>,
    /// Expired or undecodable entries deleted during the scan
    pub purged: usize,
}

pub struct PersistentTier {
    store: Arc<dyn DurableStore>,
    prefix: String,
    capacity: usize,
    max_entry_bytes: usize,
    quota_evict_fraction: f64,
    policy: EvictionPolicy,
}

impl std::fmt::Debug for PersistentTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentTier")
            .field("prefix", &self.prefix)
            .field("capacity", &self.capacity)
            .field("max_entry_bytes", &self.max_entry_bytes)
            .finish()
    }
}

impl PersistentTier {
    pub fn new(store: Arc<dyn DurableStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            prefix: config.storage_prefix.clone(),
            capacity: config.max_storage_cache_size,
            max_entry_bytes: config.max_entry_bytes,
            quota_evict_fraction: config.quota_evict_fraction,
            policy: EvictionPolicy::new(config.eviction_target),
        }
    }

    /// Pick up new limits. Entries written under a previous prefix are left
    /// alone; they are no longer visible to this tier.
    pub fn reconfigure(&mut self, config: &CacheConfig) {
        self.prefix = config.storage_prefix.clone();
        self.capacity = config.max_storage_cache_size;
        self.max_entry_bytes = config.max_entry_bytes;
        self.quota_evict_fraction = config.quota_evict_fraction;
        self.policy = EvictionPolicy::new(config.eviction_target);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    // ========================================================================
    // Read
    // ========================================================================

    /// Look up a live entry and record the access.
    ///
    /// Undecodable and expired entries are deleted and reported as a miss.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>> {
        let Some(mut entry) = self.load(key, now)? else {
            return Ok(None);
        };

        entry.touch(now);
        // Losing an access-stat update only affects ranking
        if let Err(e) = self.write_raw(key, &entry) {
            debug!(key = %key, error = %e, "failed to record access");
        }
        Ok(Some(entry))
    }

    /// Decode `key` without touching it, purging it if unusable
    fn load(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>> {
        let storage_key = self.storage_key(key);
        let Some(raw) = self.store.get(&storage_key)? else {
            return Ok(None);
        };

        let entry = match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "dropping corrupt cache entry");
                self.store.remove(&storage_key)?;
                return Ok(None);
            }
        };

        if !entry.is_valid(now) {
            debug!(key = %key, "persistent entry expired");
            self.store.remove(&storage_key)?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    // ========================================================================
    // Write
    // ========================================================================

    /// Write an entry.
    ///
    /// Oversized entries are skipped. A quota failure evicts the configured
    /// fraction of lowest-ranked entries and retries exactly once; a second
    /// failure is returned and nothing is written.
    pub fn set(&self, key: &str, entry: &CacheEntry, now: DateTime<Utc>) -> Result<StoreOutcome> {
        if entry.size_bytes >= self.max_entry_bytes {
            debug!(key = %key, size = entry.size_bytes, "entry too large for persistent tier");
            return Ok(StoreOutcome::Skipped);
        }

        let encoded = match serde_json::to_string(entry) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = %key, error = %e, "entry not encodable, skipping persistent write");
                return Ok(StoreOutcome::Skipped);
            }
        };

        let storage_key = self.storage_key(key);
        if self.store.get(&storage_key)?.is_none() {
            self.make_room(now)?;
        }

        match self.store.set(&storage_key, &encoded) {
            Ok(()) => Ok(StoreOutcome::Stored),
            Err(e) if e.is_quota() => {
                let evicted = self.evict_fraction(self.quota_evict_fraction, now)?;
                warn!(key = %key, evicted, "storage quota exceeded, retrying once");
                self.store.set(&storage_key, &encoded)?;
                Ok(StoreOutcome::Stored)
            }
            Err(e) => Err(e),
        }
    }

    fn write_raw(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let encoded = serde_json::to_string(entry)?;
        self.store.set(&self.storage_key(key), &encoded)
    }

    /// Evict ahead of inserting a new key into a full tier
    fn make_room(&self, now: DateTime<Utc>) -> Result<usize> {
        let keys = self.keys()?;
        if keys.len() < self.capacity {
            return Ok(0);
        }

        let scan = self.scan(now)?;
        let victims = self.policy.plan_overflow(scan.live, self.capacity);
        let evicted = self.remove_all(&victims)?;
        if evicted > 0 {
            debug!(evicted, "persistent tier overflow");
        }
        Ok(evicted + scan.purged)
    }

    // ========================================================================
    // Remove / Evict
    // ========================================================================

    /// Delete one entry (no-op if absent)
    pub fn remove(&self, key: &str) -> Result<()> {
        self.store.remove(&self.storage_key(key))
    }

    /// Delete every entry under the prefix
    pub fn clear(&self) -> Result<usize> {
        let keys = self.store.keys_with_prefix(&self.prefix)?;
        for key in &keys {
            self.store.remove(key)?;
        }
        Ok(keys.len())
    }

    /// Evict the lowest-ranked `ceil(len * fraction)` live entries.
    ///
    /// Expired and corrupt entries found along the way are purged first and
    /// count toward the total.
    pub fn evict_fraction(&self, fraction: f64, now: DateTime<Utc>) -> Result<usize> {
        let scan = self.scan(now)?;
        let victims = EvictionPolicy::plan_fraction(scan.live, fraction);
        Ok(self.remove_all(&victims)? + scan.purged)
    }

    /// Evict lowest-ranked entries until at most `capacity` remain
    pub fn shrink_to(&self, capacity: usize, now: DateTime<Utc>) -> Result<usize> {
        let scan = self.scan(now)?;
        let victims = EvictionPolicy::plan_down_to(scan.live, capacity);
        Ok(self.remove_all(&victims)? + scan.purged)
    }

    /// Drop every expired or undecodable entry
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        Ok(self.scan(now)?.purged)
    }

    /// Decode every entry under the prefix, deleting unusable ones
    pub fn scan(&self, now: DateTime<Utc>) -> Result<Scan> {
        let mut scan = Scan::default();
        for key in self.keys()? {
            match self.load(&key, now)? {
                Some(entry) => scan.live.push((key, RankKey::from(&entry))),
                None => scan.purged += 1,
            }
        }
        Ok(scan)
    }

    fn remove_all(&self, keys: &[String]) -> Result<usize> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(keys.len())
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Cache keys (prefix stripped) currently stored
    pub fn keys(&self) -> Result<Vec<String>> {
        let keys = self.store.keys_with_prefix(&self.prefix)?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.store.keys_with_prefix(&self.prefix)?.len())
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.store.get(&self.storage_key(key))?.is_some())
    }

    pub fn estimate(&self) -> Option<StorageEstimate> {
        self.store.estimate()
    }

    // ========================================================================
    // Version marker
    // ========================================================================

    /// Compare the stored format version with `version`. On mismatch (or no
    /// marker at all) wipe the namespace and write the new marker.
    ///
    /// Returns whether a wipe happened.
    pub fn ensure_version(&self, version_key: &str, version: &str) -> Result<bool> {
        let stored = self.store.get(version_key)?;
        if stored.as_deref() == Some(version) {
            return Ok(false);
        }

        let cleared = self.clear()?;
        self.store.set(version_key, version)?;
        match stored {
            Some(previous) => info!(
                from = %previous,
                to = %version,
                cleared,
                "cache format version changed, persistent tier cleared"
            ),
            None => debug!(version = %version, cleared, "cache version marker initialized"),
        }
        Ok(true)
    }
}
