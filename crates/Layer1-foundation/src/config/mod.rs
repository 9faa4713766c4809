//! Config - cache configuration
//!
//! - `cache.rs` - CacheConfig (live, validated) and CacheConfigPatch (overrides)

mod cache;

pub use cache::{CacheConfig, CacheConfigPatch, CACHE_CONFIG_FILE};
