//! Shared fakes for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use cachet_core::{
    CacheConfig, CacheManager, FetchResponse, Fetcher, HeapProbe, HeapUsage, RequestOptions,
};
use cachet_foundation::{DurableStore, Error, MemoryStore, Result, StorageEstimate};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fetcher answering from a fixed URL table; unknown URLs get a 404
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, FetchResponse>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, url: &str, response: FetchResponse) {
        self.routes.lock().insert(url.to_string(), response);
    }

    pub fn json(&self, url: &str, body: serde_json::Value) {
        self.route(
            url,
            FetchResponse::new(200, body.to_string()).with_content_type("application/json"),
        );
    }

    /// Every fetch sleeps this long before answering
    pub fn delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, _options: &RequestOptions) -> Result<FetchResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.routes.lock().get(url).cloned();
        Ok(response.unwrap_or_else(|| FetchResponse::new(404, "not found")))
    }
}

/// `MemoryStore` with injectable quota failures and a settable usage estimate
#[derive(Default)]
pub struct TestStore {
    inner: MemoryStore,
    failing_writes: AtomicUsize,
    estimate: Mutex<Option<StorageEstimate>>,
}

impl TestStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `n` writes fail with `QuotaExceeded`
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn set_estimate(&self, usage: u64, quota: u64) {
        *self.estimate.lock() = Some(StorageEstimate { usage, quota });
    }

    pub fn raw_keys(&self, prefix: &str) -> Vec<String> {
        let mut keys = self.inner.keys_with_prefix(prefix).unwrap();
        keys.sort();
        keys
    }
}

impl DurableStore for TestStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::QuotaExceeded("injected".to_string()));
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.keys_with_prefix(prefix)
    }

    fn estimate(&self) -> Option<StorageEstimate> {
        *self.estimate.lock()
    }
}

/// Heap probe reporting a fixed used/limit ratio
pub struct FixedHeap(pub f64);

impl HeapProbe for FixedHeap {
    fn sample(&self) -> Option<HeapUsage> {
        Some(HeapUsage {
            used: (self.0 * 1000.0) as u64,
            limit: 1000,
        })
    }
}

pub fn manager_with(
    config: CacheConfig,
    store: Arc<TestStore>,
    fetcher: Arc<ScriptedFetcher>,
) -> Arc<CacheManager> {
    CacheManager::new(config, store, fetcher).expect("valid config")
}

pub fn manager() -> (Arc<CacheManager>, Arc<TestStore>, Arc<ScriptedFetcher>) {
    let store = TestStore::new();
    let fetcher = ScriptedFetcher::new();
    let cache = manager_with(CacheConfig::default(), store.clone(), fetcher.clone());
    (cache, store, fetcher)
}
