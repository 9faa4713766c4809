//! Two-tier cache
//!
//! - `entry`: cached payload envelope and priority
//! - `key`: deterministic cache keys for requests and resources
//! - `eviction`: ranking shared by both tiers
//! - `memory` / `persistent`: the two tiers
//! - `monitor`: heap and storage pressure checks
//! - `manager`: the public orchestrator

mod entry;
mod eviction;
mod key;
mod manager;
mod memory;
mod monitor;
mod persistent;
mod stats;

pub use entry::{estimate_size, CacheEntry, Payload, Priority};
pub use eviction::{EvictionPolicy, RankKey};
pub use key::{request_key, resource_key, KeyHasher, REQUEST_KEY_PREFIX, RESOURCE_KEY_PREFIX};
pub use manager::{
    CacheManager, CacheManagerBuilder, FetchOptions, GetOptions, Location, PreloadItem,
    PreloadKind, PreloadReport, SetOptions,
};
pub use memory::MemoryTier;
pub use monitor::{
    heap_keep_ratio, storage_under_pressure, HeapProbe, HeapUsage, NoHeapProbe, SystemHeapProbe,
    HEAP_CRITICAL_RATIO, HEAP_ELEVATED_RATIO, STORAGE_CRITICAL_RATIO,
};
pub use persistent::{PersistentTier, Scan, StoreOutcome};
pub use stats::{CacheStats, HitStats, TierStats};
