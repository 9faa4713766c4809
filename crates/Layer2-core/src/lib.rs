//! cachet-core: two-tier client cache
//!
//! Layer2 - cache runtime on top of `cachet-foundation`
//!
//! # Modules
//!
//! - `cache`: entry model, key codec, eviction, memory/persistent tiers,
//!   pressure monitors and the `CacheManager` orchestrator
//! - `fetch`: the injected network capability (`Fetcher`, `HttpFetcher`)
//!
//! # Example
//!
//! ```ignore
//! use cachet_core::{CacheManager, FetchOptions, PreloadItem};
//! use cachet_foundation::{CacheConfig, SqliteStore};
//!
//! let cache = CacheManager::builder()
//!     .config(CacheConfig::load()?)
//!     .store(Arc::new(SqliteStore::open(&db_path)?))
//!     .build()?;
//! cache.start()?;
//!
//! let user = cache
//!     .cache_api_response("https://api.example.com/me", FetchOptions::default())
//!     .await?;
//!
//! cache
//!     .preload_critical_resources(vec![PreloadItem::resource("https://cdn.example.com/logo.png")])
//!     .await;
//!
//! cache.shutdown().await;
//! ```

pub mod cache;
pub mod fetch;

// Re-exports: Cache
pub use cache::{
    estimate_size, request_key, resource_key, CacheEntry, CacheManager, CacheManagerBuilder,
    CacheStats, EvictionPolicy, FetchOptions, GetOptions, HeapProbe, HeapUsage, HitStats,
    Location, NoHeapProbe, Payload, PreloadItem, PreloadKind, PreloadReport, Priority, SetOptions,
    SystemHeapProbe, TierStats,
};

// Re-exports: Fetch
pub use fetch::{FetchResponse, Fetcher, HttpFetcher, RequestOptions};

// Re-exports: Foundation
pub use cachet_foundation::{CacheConfig, CacheConfigPatch, DurableStore, Error, Result};
