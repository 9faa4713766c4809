//! Eviction policy shared by both tiers
//!
//! Ranking: lower priority goes first; within a priority, the oldest
//! `last_accessed_at` goes first. Ties fall back to key order so a plan is
//! deterministic.

use chrono::{DateTime, Utc};

use super::entry::{CacheEntry, Priority};

/// The metadata eviction ranks by
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RankKey {
    pub priority: Priority,
    pub last_accessed_at: DateTime<Utc>,
}

impl From<&CacheEntry> for RankKey {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            priority: entry.priority,
            last_accessed_at: entry.last_accessed_at,
        }
    }
}

/// Tier-agnostic eviction planner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionPolicy {
    /// Occupancy a full tier is brought down to, as a fraction of capacity
    target_ratio: f64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self { target_ratio: 0.8 }
    }
}

impl EvictionPolicy {
    pub fn new(target_ratio: f64) -> Self {
        Self {
            target_ratio: target_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn target_ratio(&self) -> f64 {
        self.target_ratio
    }

    /// Survivor count after an overflow eviction.
    ///
    /// Always leaves room for at least one insert.
    pub fn target_len(&self, capacity: usize) -> usize {
        let target = (capacity as f64 * self.target_ratio).floor() as usize;
        target.min(capacity.saturating_sub(1))
    }

    /// Victims needed before inserting a new key into a tier holding
    /// `candidates` with the given capacity. Empty if there is room.
    pub fn plan_overflow(&self, candidates: Vec<(String, RankKey)>, capacity: usize) -> Vec<String> {
        if candidates.len() < capacity {
            return Vec::new();
        }
        let keep = self.target_len(capacity);
        Self::plan_down_to(candidates, keep)
    }

    /// Lowest-ranked keys to drop so that `keep` remain
    pub fn plan_down_to(candidates: Vec<(String, RankKey)>, keep: usize) -> Vec<String> {
        let count = candidates.len().saturating_sub(keep);
        Self::lowest_ranked(candidates, count)
    }

    /// Lowest-ranked `ceil(len * fraction)` keys
    pub fn plan_fraction(candidates: Vec<(String, RankKey)>, fraction: f64) -> Vec<String> {
        let count = (candidates.len() as f64 * fraction.clamp(0.0, 1.0)).ceil() as usize;
        Self::lowest_ranked(candidates, count)
    }

    /// The `count` lowest-ranked keys, eviction order first
    pub fn lowest_ranked(mut candidates: Vec<(String, RankKey)>, count: usize) -> Vec<String> {
        if count == 0 {
            return Vec::new();
        }
        candidates.sort_by(|(ka, ra), (kb, rb)| ra.cmp(rb).then_with(|| ka.cmp(kb)));
        candidates.into_iter().take(count).map(|(k, _)| k).collect()
    }
}
