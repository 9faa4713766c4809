//! Memory tier: small, fast, size-bounded map of live entries
//!
//! Recency and priority live in entry metadata, not container order, so the
//! backing map is a plain `HashMap`. Overflow is resolved by the shared
//! [`EvictionPolicy`].

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

use super::entry::CacheEntry;
use super::eviction::{EvictionPolicy, RankKey};

#[derive(Debug)]
pub struct MemoryTier {
    entries: HashMap<String, CacheEntry>,
    capacity: usize,
    policy: EvictionPolicy,
}

impl MemoryTier {
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
            policy,
        }
    }

    /// Look up a live entry and record the access.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let entry = self.entries.get_mut(key)?;
        if !entry.is_valid(now) {
            self.entries.remove(key);
            debug!(key = %key, "memory entry expired");
            return None;
        }
        entry.touch(now);
        Some(entry.clone())
    }

    /// Check presence without touching access stats
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace an entry, evicting first if a new key would overflow.
    ///
    /// Expired entries are dropped before any live entry is ranked. Returns
    /// the number of entries removed to make room.
    pub fn set(&mut self, key: &str, entry: CacheEntry, now: DateTime<Utc>) -> usize {
        if let Some(existing) = self.entries.get_mut(key) {
            *existing = entry;
            return 0;
        }

        let mut evicted = 0;
        if self.entries.len() >= self.capacity {
            evicted += self.purge_expired(now);
            let victims = self.policy.plan_overflow(self.candidates(), self.capacity);
            evicted += self.remove_all(&victims);
            if evicted > 0 {
                debug!(evicted, size = self.entries.len(), "memory tier overflow");
            }
        }

        self.entries.insert(key.to_string(), entry);
        evicted
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop everything; returns how many entries were held
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Apply a new capacity and policy. A shrink below the current size
    /// evicts immediately.
    pub fn reconfigure(
        &mut self,
        capacity: usize,
        policy: EvictionPolicy,
        now: DateTime<Utc>,
    ) -> usize {
        self.capacity = capacity;
        self.policy = policy;
        self.evict_down_to(capacity, now)
    }

    /// Evict until at most `keep` entries remain. Expired entries go first;
    /// live ones are then removed lowest-ranked first.
    pub fn evict_down_to(&mut self, keep: usize, now: DateTime<Utc>) -> usize {
        if self.entries.len() <= keep {
            return 0;
        }
        let purged = self.purge_expired(now);
        let victims = EvictionPolicy::plan_down_to(self.candidates(), keep);
        purged + self.remove_all(&victims)
    }

    /// Drop every expired entry
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_valid(now));
        before - self.entries.len()
    }

    fn candidates(&self) -> Vec<(String, RankKey)> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), RankKey::from(e)))
            .collect()
    }

    fn remove_all(&mut self, keys: &[String]) -> usize {
        keys.iter()
            .filter(|k| self.entries.remove(k.as_str()).is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::Priority;
    use serde_json::json;
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn entry(priority: Priority, created: i64) -> CacheEntry {
        CacheEntry::new(json!(created), Duration::from_secs(3600), priority, at(created))
    }

    #[test]
    fn test_basic_get_set() {
        let mut tier = MemoryTier::new(3, EvictionPolicy::default());
        tier.set("a", entry(Priority::Normal, 0), at(0));

        let hit = tier.get("a", at(1)).unwrap();
        assert_eq!(hit.data, json!(0));
        assert_eq!(hit.access_count, 2);
        assert_eq!(hit.last_accessed_at, at(1));
        assert!(tier.get("missing", at(1)).is_none());
    }

    #[test]
    fn test_expired_entry_is_purged_on_read() {
        let mut tier = MemoryTier::new(3, EvictionPolicy::default());
        let mut short = entry(Priority::Normal, 0);
        short.ttl = Duration::from_secs(10);
        tier.set("a", short, at(0));

        assert!(tier.get("a", at(9)).is_some());
        assert!(tier.get("a", at(10)).is_none());
        assert!(!tier.contains("a"));
    }

    #[test]
    fn test_overflow_evicts_lowest_ranked() {
        let mut tier = MemoryTier::new(5, EvictionPolicy::new(0.8));
        for i in 0..5 {
            tier.set(&format!("n{}", i), entry(Priority::Normal, i), at(i));
        }
        // Refresh n0 so n1 becomes the oldest access
        tier.get("n0", at(100));

        let evicted = tier.set("hi", entry(Priority::High, 200), at(200));
        assert_eq!(evicted, 1);
        assert_eq!(tier.len(), 5);
        assert!(!tier.contains("n1"));
        assert!(tier.contains("n0"));
        assert!(tier.contains("hi"));
    }

    #[test]
    fn test_replace_does_not_evict() {
        let mut tier = MemoryTier::new(2, EvictionPolicy::default());
        tier.set("a", entry(Priority::Normal, 0), at(0));
        tier.set("b", entry(Priority::Normal, 1), at(1));

        assert_eq!(tier.set("a", entry(Priority::Low, 2), at(2)), 0);
        assert_eq!(tier.len(), 2);
        assert_eq!(tier.get("a", at(3)).unwrap().priority, Priority::Low);
    }

    #[test]
    fn test_reconfigure_shrinks_immediately() {
        let mut tier = MemoryTier::new(10, EvictionPolicy::default());
        for i in 0..6 {
            tier.set(&format!("k{}", i), entry(Priority::Normal, i), at(i));
        }

        let evicted = tier.reconfigure(4, EvictionPolicy::default(), at(10));
        assert_eq!(evicted, 2);
        assert_eq!(tier.capacity(), 4);
        assert!(!tier.contains("k0"));
        assert!(!tier.contains("k1"));
    }

    #[test]
    fn test_purge_expired() {
        let mut tier = MemoryTier::new(10, EvictionPolicy::default());
        let mut stale = entry(Priority::High, 0);
        stale.ttl = Duration::from_secs(5);
        tier.set("stale", stale, at(0));
        tier.set("fresh", entry(Priority::Low, 0), at(0));

        assert_eq!(tier.purge_expired(at(60)), 1);
        assert!(tier.contains("fresh"));
        assert!(!tier.remove("stale"));
        assert_eq!(tier.clear(), 1);
        assert!(tier.is_empty());
    }

    #[test]
    fn test_overflow_drops_expired_before_live() {
        let mut tier = MemoryTier::new(5, EvictionPolicy::new(0.8));
        let mut dead = entry(Priority::High, 0);
        dead.ttl = Duration::from_secs(5);
        tier.set("dead", dead, at(0));
        for i in 0..4 {
            tier.set(&format!("n{}", i), entry(Priority::Normal, i), at(i));
        }

        let evicted = tier.set("new", entry(Priority::Normal, 60), at(60));
        assert_eq!(evicted, 1);
        assert!(!tier.contains("dead"));
        for i in 0..4 {
            assert!(tier.contains(&format!("n{}", i)));
        }
        assert!(tier.contains("new"));
    }

    #[test]
    fn test_evict_down_to_counts_expired_first() {
        let mut tier = MemoryTier::new(10, EvictionPolicy::default());
        let mut dead = entry(Priority::High, 0);
        dead.ttl = Duration::from_secs(5);
        tier.set("dead", dead, at(0));
        for i in 0..4 {
            tier.set(&format!("n{}", i), entry(Priority::Normal, i), at(i));
        }

        // Dropping the expired entry alone satisfies the bound
        assert_eq!(tier.evict_down_to(4, at(60)), 1);
        assert!(!tier.contains("dead"));
        assert!(tier.contains("n0"));

        assert_eq!(tier.evict_down_to(2, at(60)), 2);
        assert!(tier.contains("n2"));
        assert!(tier.contains("n3"));
    }
}
