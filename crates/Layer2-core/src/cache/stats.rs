//! Cache statistics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Occupancy of one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierStats {
    pub size: usize,
    pub max_size: usize,
}

/// Hit/miss counters since the manager was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HitStats {
    pub memory_hits: u64,
    /// Persistent-tier hits (promoted or not)
    pub storage_hits: u64,
    pub misses: u64,
    pub promotions: u64,
    pub evictions: u64,
}

impl HitStats {
    /// Fraction of lookups served from either tier
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.storage_hits;
        let total = hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

/// Snapshot returned by `CacheManager::stats`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub memory: TierStats,
    pub storage: TierStats,
    pub version: String,
    pub hits: HitStats,
    pub hit_rate: f64,
}

/// Lock-free counters behind `HitStats`
#[derive(Debug, Default)]
pub(crate) struct Counters {
    memory_hits: AtomicU64,
    storage_hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    evictions: AtomicU64,
}

impl Counters {
    pub fn memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn storage_hit(&self) {
        self.storage_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evicted(&self, n: usize) {
        if n > 0 {
            self.evictions.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> HitStats {
        HitStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            storage_hits: self.storage_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
