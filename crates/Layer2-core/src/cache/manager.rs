//! Cache manager
//!
//! Composes the memory and persistent tiers into one read-through /
//! write-through cache, runs the fetch-backed workflows, and owns the
//! background sweep and pressure-monitor tasks.
//!
//! Each tier sits behind its own lock. Lock order is storage, then memory:
//! any operation that touches both tiers holds the storage guard for its
//! whole duration, so `set`, `remove` and promotion never interleave.
//! Every lock is released before any `.await`.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cachet_foundation::{CacheConfig, CacheConfigPatch, DurableStore, Error, MemoryStore, Result};

use super::entry::{CacheEntry, Payload, Priority};
use super::eviction::EvictionPolicy;
use super::key::{request_key, resource_key};
use super::memory::MemoryTier;
use super::monitor::{heap_keep_ratio, storage_under_pressure, HeapProbe, NoHeapProbe};
use super::persistent::{PersistentTier, StoreOutcome};
use super::stats::{CacheStats, Counters, TierStats};
use crate::fetch::{FetchResponse, Fetcher, HttpFetcher, RequestOptions};

// ============================================================================
// Options
// ============================================================================

/// Tier selection for `get`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
    pub use_memory: bool,
    pub use_storage: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            use_memory: true,
            use_storage: true,
        }
    }
}

/// Options for `set`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// `None` uses the configured default TTL
    pub ttl: Option<Duration>,
    pub use_memory: bool,
    pub use_storage: bool,
    pub priority: Priority,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            ttl: None,
            use_memory: true,
            use_storage: true,
            priority: Priority::Normal,
        }
    }
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn memory_only(mut self) -> Self {
        self.use_memory = true;
        self.use_storage = false;
        self
    }

    pub fn storage_only(mut self) -> Self {
        self.use_memory = false;
        self.use_storage = true;
        self
    }
}

/// Options for the fetch-backed workflows.
///
/// Unset fields take the workflow's default: API responses go to both tiers
/// with the API TTL, resources go to the persistent tier only with the
/// resource TTL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub request: RequestOptions,
    pub ttl: Option<Duration>,
    pub priority: Priority,
    pub use_memory: Option<bool>,
    pub use_storage: Option<bool>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(mut self, request: RequestOptions) -> Self {
        self.request = request;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn use_memory(mut self, enabled: bool) -> Self {
        self.use_memory = Some(enabled);
        self
    }

    pub fn use_storage(mut self, enabled: bool) -> Self {
        self.use_storage = Some(enabled);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadKind {
    Api,
    Resource,
}

/// One item for `preload_critical_resources`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadItem {
    pub kind: PreloadKind,
    pub url: String,
    pub options: FetchOptions,
}

impl PreloadItem {
    pub fn api(url: impl Into<String>) -> Self {
        Self {
            kind: PreloadKind::Api,
            url: url.into(),
            options: FetchOptions::default(),
        }
    }

    pub fn resource(url: impl Into<String>) -> Self {
        Self {
            kind: PreloadKind::Resource,
            url: url.into(),
            options: FetchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }
}

/// How a preload batch settled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadReport {
    pub loaded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Where a key currently lives (no access is recorded)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    pub in_memory: bool,
    pub in_storage: bool,
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`CacheManager`]
pub struct CacheManagerBuilder {
    config: CacheConfig,
    store: Option<Arc<dyn DurableStore>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    heap_probe: Option<Arc<dyn HeapProbe>>,
}

impl CacheManagerBuilder {
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            store: None,
            fetcher: None,
            heap_probe: None,
        }
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Durable backend (default: in-process `MemoryStore`)
    pub fn store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Transport (default: `HttpFetcher`)
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Heap introspection (default: none, heap monitor is a no-op)
    pub fn heap_probe(mut self, probe: Arc<dyn HeapProbe>) -> Self {
        self.heap_probe = Some(probe);
        self
    }

    /// Validate the config, check the version marker, and hand back a ready
    /// manager. No other operation can observe the cache before this returns.
    pub fn build(self) -> Result<Arc<CacheManager>> {
        self.config.validate()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn DurableStore>);
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(HttpFetcher::new()) as Arc<dyn Fetcher>);
        let heap_probe = self
            .heap_probe
            .unwrap_or_else(|| Arc::new(NoHeapProbe) as Arc<dyn HeapProbe>);

        let memory = MemoryTier::new(
            self.config.max_memory_cache_size,
            EvictionPolicy::new(self.config.eviction_target),
        );
        let storage = PersistentTier::new(store, &self.config);

        if let Err(e) = storage.ensure_version(&self.config.version_key, &self.config.version) {
            warn!(error = %e, "cache version check failed");
        }

        Ok(Arc::new(CacheManager {
            config: RwLock::new(self.config),
            memory: Mutex::new(memory),
            storage: Mutex::new(storage),
            fetcher,
            heap_probe,
            counters: Counters::default(),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }))
    }
}

impl Default for CacheManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Two-tier cache in front of a [`Fetcher`]
pub struct CacheManager {
    config: RwLock<CacheConfig>,
    memory: Mutex<MemoryTier>,
    storage: Mutex<PersistentTier>,
    fetcher: Arc<dyn Fetcher>,
    heap_probe: Arc<dyn HeapProbe>,
    counters: Counters,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &*self.config.read())
            .field("storage", &*self.storage.lock())
            .field("memory", &*self.memory.lock())
            .finish()
    }
}

impl CacheManager {
    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::new()
    }

    pub fn new(
        config: CacheConfig,
        store: Arc<dyn DurableStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Arc<Self>> {
        Self::builder()
            .config(config)
            .store(store)
            .fetcher(fetcher)
            .build()
    }

    /// Snapshot of the live configuration
    pub fn config(&self) -> CacheConfig {
        self.config.read().clone()
    }

    // ========================================================================
    // Core operations
    // ========================================================================

    /// Look a key up. A persistent hit whose access count passes the
    /// promotion threshold is copied into the memory tier.
    pub fn get(&self, key: &str, options: GetOptions) -> Option<Payload> {
        let now = Utc::now();

        if options.use_memory {
            if let Some(entry) = self.memory.lock().get(key, now) {
                debug!(key = %key, tier = "memory", "cache hit");
                self.counters.memory_hit();
                return Some(entry.data);
            }
        }

        if options.use_storage {
            let threshold = u64::from(self.config.read().promotion_threshold);
            let storage = self.storage.lock();
            match storage.get(key, now) {
                Ok(Some(entry)) => {
                    debug!(key = %key, tier = "storage", accesses = entry.access_count, "cache hit");
                    self.counters.storage_hit();
                    if entry.access_count > threshold {
                        let data = entry.data.clone();
                        self.promote(key, entry, now);
                        return Some(data);
                    }
                    return Some(entry.data);
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "persistent read failed"),
            }
        }

        debug!(key = %key, "cache miss");
        self.counters.miss();
        None
    }

    /// Copy a storage hit into memory. Callers hold the storage guard.
    fn promote(&self, key: &str, entry: CacheEntry, now: DateTime<Utc>) {
        let evicted = self.memory.lock().set(key, entry, now);
        self.counters.evicted(evicted);
        self.counters.promotion();
        debug!(key = %key, "promoted to memory tier");
    }

    /// Store `data` in the selected tiers.
    ///
    /// A tier that is not written drops any older copy of the key so the
    /// latest `set` always wins. Persistent failures are logged, not returned.
    pub fn set(&self, key: &str, data: Payload, options: SetOptions) {
        let now = Utc::now();
        let ttl = options
            .ttl
            .unwrap_or_else(|| self.config.read().default_ttl);
        let entry = CacheEntry::new(data, ttl, options.priority, now);

        let storage = self.storage.lock();
        if options.use_memory {
            let evicted = self.memory.lock().set(key, entry.clone(), now);
            self.counters.evicted(evicted);
        } else {
            self.memory.lock().remove(key);
        }

        let stored = options.use_storage
            && match storage.set(key, &entry, now) {
                Ok(StoreOutcome::Stored) => true,
                Ok(StoreOutcome::Skipped) => false,
                Err(e) => {
                    warn!(key = %key, error = %e, "persistent write abandoned");
                    false
                }
            };
        if !stored {
            if let Err(e) = storage.remove(key) {
                debug!(key = %key, error = %e, "failed to drop stale persistent copy");
            }
        }
    }

    /// Remove `key` from both tiers. Removing an absent key is a no-op.
    pub fn remove(&self, key: &str) {
        let storage = self.storage.lock();
        self.memory.lock().remove(key);
        if let Err(e) = storage.remove(key) {
            warn!(key = %key, error = %e, "persistent remove failed");
        }
    }

    /// Empty the memory tier and every durable key under the prefix.
    /// The version marker is kept.
    pub fn clear_all_caches(&self) {
        let tier = self.storage.lock();
        let memory = self.memory.lock().clear();
        let storage = match tier.clear() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "failed to clear persistent tier");
                0
            }
        };
        info!(memory, storage, "all caches cleared");
    }

    /// Presence in each tier, without recording an access
    pub fn locate(&self, key: &str) -> Location {
        let in_memory = self.memory.lock().contains(key);
        let in_storage = self.storage.lock().contains(key).unwrap_or(false);
        Location {
            in_memory,
            in_storage,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let memory = {
            let tier = self.memory.lock();
            TierStats {
                size: tier.len(),
                max_size: tier.capacity(),
            }
        };
        let storage = {
            let tier = self.storage.lock();
            TierStats {
                size: tier.len().unwrap_or_else(|e| {
                    warn!(error = %e, "failed to count persistent entries");
                    0
                }),
                max_size: tier.capacity(),
            }
        };
        let hits = self.counters.snapshot();

        CacheStats {
            memory,
            storage,
            version: self.config.read().version.clone(),
            hit_rate: hits.hit_rate(),
            hits,
        }
    }

    /// Merge overrides into the live configuration.
    ///
    /// Invalid patches are rejected whole. A capacity shrink evicts
    /// immediately; a version change re-runs the version check.
    pub fn configure(&self, patch: CacheConfigPatch) -> Result<()> {
        let (previous, next) = {
            let mut config = self.config.write();
            let previous = config.clone();
            config.apply(patch)?;
            (previous, config.clone())
        };

        let now = Utc::now();
        let mut storage = self.storage.lock();
        let evicted = self.memory.lock().reconfigure(
            next.max_memory_cache_size,
            EvictionPolicy::new(next.eviction_target),
            now,
        );
        self.counters.evicted(evicted);
        storage.reconfigure(&next);

        if previous.version != next.version || previous.version_key != next.version_key {
            if let Err(e) = storage.ensure_version(&next.version_key, &next.version) {
                warn!(error = %e, "cache version check failed");
            }
        }
        if next.max_storage_cache_size < previous.max_storage_cache_size {
            match storage.shrink_to(next.max_storage_cache_size, now) {
                Ok(n) => self.counters.evicted(n),
                Err(e) => warn!(error = %e, "failed to shrink persistent tier"),
            }
        }

        debug!(evicted, "configuration updated");
        Ok(())
    }

    // ========================================================================
    // Fetch-backed workflows
    // ========================================================================

    /// Read-through cache for API responses.
    ///
    /// Hits return without touching the network. On a miss the response is
    /// fetched and cached only if it succeeded; a non-success status is
    /// returned as `Error::RequestFailed` and nothing is cached.
    pub async fn cache_api_response(&self, url: &str, options: FetchOptions) -> Result<Payload> {
        let request = &options.request;
        let key = request_key(&request.method, url, request.body.as_deref(), &request.headers);
        let use_memory = options.use_memory.unwrap_or(true);
        let use_storage = options.use_storage.unwrap_or(true);

        if let Some(data) = self.get(
            &key,
            GetOptions {
                use_memory,
                use_storage,
            },
        ) {
            return Ok(data);
        }

        let response = self.fetch(url, request).await?;
        let data = response.json()?;

        let ttl = options.ttl.unwrap_or_else(|| self.config.read().api_ttl);
        self.set(
            &key,
            data.clone(),
            SetOptions {
                ttl: Some(ttl),
                use_memory,
                use_storage,
                priority: options.priority,
            },
        );
        Ok(data)
    }

    /// Read-through cache for static resources, stored as `data:` URLs.
    ///
    /// Writes default to the persistent tier only. Reads still consult the
    /// memory tier so promoted resources are served from it.
    pub async fn cache_resource(&self, url: &str, options: FetchOptions) -> Result<Payload> {
        let key = resource_key(url);
        let use_storage = options.use_storage.unwrap_or(true);

        if let Some(data) = self.get(
            &key,
            GetOptions {
                use_memory: options.use_memory.unwrap_or(true),
                use_storage,
            },
        ) {
            return Ok(data);
        }

        let response = self.fetch(url, &options.request).await?;
        let data = Payload::String(response.to_data_url());

        let ttl = options.ttl.unwrap_or_else(|| self.config.read().resource_ttl);
        self.set(
            &key,
            data.clone(),
            SetOptions {
                ttl: Some(ttl),
                use_memory: options.use_memory.unwrap_or(false),
                use_storage,
                priority: options.priority,
            },
        );
        Ok(data)
    }

    /// Run the fetcher under the request's timeout and reject non-success
    async fn fetch(&self, url: &str, request: &RequestOptions) -> Result<FetchResponse> {
        let fut = self.fetcher.fetch(url, request);
        let response = match request.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::Timeout(format!("{} after {:?}", url, limit)))??,
            None => fut.await?,
        };

        if !response.is_ok() {
            return Err(Error::request_failed(response.status, url));
        }
        Ok(response)
    }

    /// Populate the cache for every item concurrently.
    ///
    /// One item failing never affects the others; failures are logged and
    /// counted. Stops early if the manager shuts down.
    pub async fn preload_critical_resources(&self, items: Vec<PreloadItem>) -> PreloadReport {
        let cancel = self.cancel.child_token();
        self.preload_with_cancel(items, &cancel).await
    }

    /// Like [`preload_critical_resources`](Self::preload_critical_resources)
    /// with a caller-owned cancellation token. A cancelled item leaves no
    /// entry behind.
    pub async fn preload_with_cancel(
        &self,
        items: Vec<PreloadItem>,
        cancel: &CancellationToken,
    ) -> PreloadReport {
        let futures = items.into_iter().map(|item| async move {
            let PreloadItem { kind, url, options } = item;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                result = self.preload_one(kind, &url, options) => result,
            };
            (url, result)
        });

        let mut report = PreloadReport::default();
        for (url, result) in join_all(futures).await {
            match result {
                Ok(_) => report.loaded += 1,
                Err(Error::Cancelled) => report.cancelled += 1,
                Err(e) => {
                    warn!(url = %url, error = %e, "preload failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            loaded = report.loaded,
            failed = report.failed,
            cancelled = report.cancelled,
            "preload finished"
        );
        report
    }

    async fn preload_one(&self, kind: PreloadKind, url: &str, options: FetchOptions) -> Result<Payload> {
        match kind {
            PreloadKind::Api => self.cache_api_response(url, options).await,
            PreloadKind::Resource => self.cache_resource(url, options).await,
        }
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Drop expired entries from both tiers
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let memory = self.memory.lock().purge_expired(now);
        let storage = match self.storage.lock().purge_expired(now) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "persistent sweep failed");
                0
            }
        };
        if memory + storage > 0 {
            debug!(memory, storage, "expired entries swept");
        }
        memory + storage
    }

    /// Sample heap usage and shrink the memory tier if it is high
    pub fn check_heap_pressure(&self) -> usize {
        let Some(usage) = self.heap_probe.sample() else {
            return 0;
        };
        let ratio = usage.ratio();
        let Some(keep_ratio) = heap_keep_ratio(ratio) else {
            return 0;
        };

        let now = Utc::now();
        let evicted = {
            let mut memory = self.memory.lock();
            let purged = memory.purge_expired(now);
            let keep = (memory.len() as f64 * keep_ratio).floor() as usize;
            purged + memory.evict_down_to(keep, now)
        };
        self.counters.evicted(evicted);
        if evicted > 0 {
            info!(ratio, evicted, "heap pressure, memory tier trimmed");
        }
        evicted
    }

    /// Sample storage usage and trim the persistent tier if it is high
    pub fn check_storage_pressure(&self) -> usize {
        let fraction = self.config.read().storage_pressure_evict_fraction;
        let storage = self.storage.lock();
        let Some(estimate) = storage.estimate() else {
            return 0;
        };
        let ratio = estimate.ratio();
        if !storage_under_pressure(ratio) {
            return 0;
        }

        match storage.evict_fraction(fraction, Utc::now()) {
            Ok(evicted) => {
                self.counters.evicted(evicted);
                info!(ratio, evicted, "storage pressure, persistent tier trimmed");
                evicted
            }
            Err(e) => {
                warn!(error = %e, "storage pressure eviction failed");
                0
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the sweep and pressure monitors. The storage monitor runs once
    /// now and then periodically if `storage_check_interval` is set.
    ///
    /// Tasks are spawned on the current tokio runtime; called outside one,
    /// `start` returns `Error::Internal` and spawns nothing. Calling `start`
    /// on a running manager does nothing.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("cache tasks need a tokio runtime: {}", e)))?;
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() || self.cancel.is_cancelled() {
            return Ok(());
        }

        self.check_storage_pressure();

        tasks.push(self.spawn_periodic(
            &runtime,
            "sweep",
            |c| Some(c.sweep_interval),
            |m| {
                m.purge_expired();
            },
        ));
        tasks.push(self.spawn_periodic(
            &runtime,
            "heap-monitor",
            |c| Some(c.heap_check_interval),
            |m| {
                m.check_heap_pressure();
            },
        ));
        if self.config.read().storage_check_interval.is_some() {
            tasks.push(self.spawn_periodic(
                &runtime,
                "storage-monitor",
                |c| c.storage_check_interval,
                |m| {
                    m.check_storage_pressure();
                },
            ));
        }
        info!(tasks = tasks.len(), "cache background tasks started");
        Ok(())
    }

    /// Run `tick` every `period(config)`, re-reading the period each round so
    /// `configure` changes apply. Exits on cancellation, when the period
    /// becomes `None`, or once the manager is gone.
    fn spawn_periodic<P, T>(
        self: &Arc<Self>,
        runtime: &Handle,
        name: &'static str,
        period: P,
        tick: T,
    ) -> JoinHandle<()>
    where
        P: Fn(&CacheConfig) -> Option<Duration> + Send + 'static,
        T: Fn(&CacheManager) + Send + 'static,
    {
        let manager: Weak<CacheManager> = Arc::downgrade(self);
        let cancel = self.cancel.child_token();

        runtime.spawn(async move {
            loop {
                let Some(wait) = manager.upgrade().and_then(|m| period(&*m.config.read())) else {
                    break;
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                let Some(m) = manager.upgrade() else {
                    break;
                };
                tick(m.as_ref());
            }
            debug!(task = name, "background task stopped");
        })
    }

    /// Stop background tasks and wait for them to finish. Also cancels any
    /// in-flight preload started with `preload_critical_resources`.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!("cache manager shut down");
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
