//! Tier behaviour through the public `CacheManager` API
//!
//! `cargo test -p cachet-core --test cache_tiers`

mod common;

use cachet_core::{
    request_key, CacheConfig, CacheConfigPatch, CacheManager, GetOptions, Location, Priority,
    SetOptions,
};
use cachet_foundation::{DurableStore, SqliteStore};
use common::{manager, manager_with, FixedHeap, ScriptedFetcher, TestStore};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn pause() {
    // Keeps access timestamps strictly ordered
    std::thread::sleep(Duration::from_millis(2));
}

fn small_memory(capacity: usize) -> CacheConfig {
    CacheConfig::default().memory_capacity(capacity)
}

#[tokio::test]
async fn test_entry_expires_from_both_tiers() {
    let (cache, store, _) = manager();
    cache.set(
        "k",
        json!({"v": 1}),
        SetOptions::new().ttl(Duration::from_millis(100)),
    );
    assert_eq!(cache.get("k", GetOptions::default()), Some(json!({"v": 1})));

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(cache.get("k", GetOptions::default()), None);
    let location = cache.locate("k");
    assert!(!location.in_memory);
    assert!(!location.in_storage);
    assert!(store.raw_keys("cachet_").is_empty());
}

#[test]
fn test_eviction_prefers_low_priority_then_oldest_access() {
    let cache = manager_with(small_memory(10), TestStore::new(), ScriptedFetcher::new());
    let memory_only = SetOptions::new().memory_only();

    cache.set("a0", json!(0), memory_only.priority(Priority::High));
    pause();
    for i in 1..10 {
        let priority = if i == 5 { Priority::Low } else { Priority::Normal };
        cache.set(&format!("a{}", i), json!(i), memory_only.priority(priority));
        pause();
    }
    // a1 is now the most recently used Normal entry
    cache.get("a1", GetOptions::default());
    pause();

    cache.set("z", json!("new"), memory_only);

    // Capacity 10 at 80% keeps 8, then the new entry lands
    assert_eq!(cache.stats().memory.size, 9);
    assert!(!cache.locate("a5").in_memory, "low priority goes first");
    assert!(!cache.locate("a2").in_memory, "then the oldest normal access");
    for key in ["a0", "a1", "a3", "a4", "a6", "a7", "a8", "a9", "z"] {
        assert!(cache.locate(key).in_memory, "{} should survive", key);
    }
}

#[test]
fn test_high_priority_insert_into_full_tier() {
    let store = TestStore::new();
    let cache = manager_with(small_memory(5), store, ScriptedFetcher::new());

    for i in 0..5 {
        cache.set(&format!("n{}", i), json!(i), SetOptions::new().memory_only());
        pause();
    }
    cache.set(
        "vip",
        json!("keep me"),
        SetOptions::new().memory_only().priority(Priority::High),
    );

    assert_eq!(cache.stats().memory.size, 5);
    assert!(!cache.locate("n0").in_memory);
    for i in 1..5 {
        assert!(cache.locate(&format!("n{}", i)).in_memory);
    }
    assert_eq!(cache.get("vip", GetOptions::default()), Some(json!("keep me")));
}

#[test]
fn test_remove_is_idempotent() {
    let (cache, store, _) = manager();
    cache.set("k", json!(1), SetOptions::default());
    cache.set("other", json!(2), SetOptions::default());

    cache.remove("k");
    let once = (cache.stats().memory.size, store.raw_keys("cachet_"));
    cache.remove("k");
    let twice = (cache.stats().memory.size, store.raw_keys("cachet_"));

    assert_eq!(once, twice);
    assert_eq!(cache.get("k", GetOptions::default()), None);
    cache.remove("never-existed");
}

#[test]
fn test_hot_persistent_entry_is_promoted() {
    let (cache, _, _) = manager();
    cache.set("hot", json!("data"), SetOptions::new().storage_only());
    assert!(!cache.locate("hot").in_memory);

    // Stored with one access; two reads bring it to three
    cache.get("hot", GetOptions::default());
    cache.get("hot", GetOptions::default());
    assert!(!cache.locate("hot").in_memory);

    // The fourth access passes the threshold
    cache.get("hot", GetOptions::default());
    let location = cache.locate("hot");
    assert!(location.in_memory);
    assert!(location.in_storage, "promotion copies, never moves");

    assert_eq!(cache.get("hot", GetOptions::default()), Some(json!("data")));
    let hits = cache.stats().hits;
    assert_eq!(hits.storage_hits, 3);
    assert_eq!(hits.memory_hits, 1);
    assert_eq!(hits.promotions, 1);
}

#[test]
fn test_version_change_wipes_namespace() {
    let store = TestStore::new();
    store.set("someone_else", "untouched").unwrap();

    let v1 = manager_with(CacheConfig::default(), store.clone(), ScriptedFetcher::new());
    v1.set("a", json!(1), SetOptions::default());
    v1.set("b", json!(2), SetOptions::default());
    assert_eq!(store.raw_keys("cachet_").len(), 2);
    drop(v1);

    // Same version: entries survive
    let same = manager_with(CacheConfig::default(), store.clone(), ScriptedFetcher::new());
    assert_eq!(same.get("a", GetOptions::default()), Some(json!(1)));
    drop(same);

    let v2 = manager_with(
        CacheConfig::default().version("2.0.0"),
        store.clone(),
        ScriptedFetcher::new(),
    );
    assert!(store.raw_keys("cachet_").is_empty());
    assert_eq!(store.get("cachet-version").unwrap().as_deref(), Some("2.0.0"));
    assert_eq!(store.get("someone_else").unwrap().as_deref(), Some("untouched"));
    assert_eq!(v2.get("a", GetOptions::default()), None);
}

#[test]
fn test_quota_failure_then_successful_retry() {
    let (cache, store, _) = manager();
    for i in 0..4 {
        cache.set(&format!("old{}", i), json!(i), SetOptions::new().storage_only());
        pause();
    }

    store.fail_next_writes(1);
    cache.set("new", json!("fits"), SetOptions::new().storage_only());

    assert!(cache.locate("new").in_storage);
    assert_eq!(cache.get("new", GetOptions::default()), Some(json!("fits")));
    // Half the tier was evicted to make room, oldest first
    assert_eq!(cache.stats().storage.size, 3);
    assert!(!cache.locate("old0").in_storage);
    assert!(!cache.locate("old1").in_storage);
}

#[test]
fn test_quota_double_failure_abandons_write() {
    let (cache, store, _) = manager();
    cache.set("old", json!(0), SetOptions::new().storage_only());

    store.fail_next_writes(2);
    cache.set("new", json!("lost"), SetOptions::new().storage_only());

    assert!(!cache.locate("new").in_storage);
    assert_eq!(cache.get("new", GetOptions::default()), None);
}

#[test]
fn test_quota_failure_keeps_memory_copy() {
    let (cache, store, _) = manager();
    store.fail_next_writes(2);
    cache.set("k", json!(1), SetOptions::default());

    let location = cache.locate("k");
    assert!(location.in_memory);
    assert!(!location.in_storage);
}

#[test]
fn test_request_keys_are_stable() {
    let mut headers = BTreeMap::new();
    headers.insert("Authorization".to_string(), "Bearer t".to_string());

    let a = request_key("GET", "https://api.test/users?page=1", None, &headers);
    let b = request_key("GET", "https://api.test/users?page=1", None, &headers);
    let c = request_key("GET", "https://api.test/users?page=2", None, &headers);

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.starts_with("api_"));
}

#[test]
fn test_corrupt_entry_reads_as_miss() {
    let (cache, store, _) = manager();
    store.set("cachet_broken", "{\"data\": ").unwrap();
    store.set("cachet_foreign", r#"{"unrelated": true}"#).unwrap();

    assert_eq!(cache.get("broken", GetOptions::default()), None);
    assert_eq!(cache.get("foreign", GetOptions::default()), None);
    assert!(store.raw_keys("cachet_").is_empty());
    assert_eq!(cache.stats().hits.misses, 2);
}

#[test]
fn test_oversize_payload_stays_out_of_storage() {
    let (cache, store, _) = manager();
    let big = json!("x".repeat(1024 * 1024));
    cache.set("big", big.clone(), SetOptions::default());

    let location = cache.locate("big");
    assert!(location.in_memory);
    assert!(!location.in_storage);
    assert!(store.raw_keys("cachet_").is_empty());
    assert_eq!(cache.get("big", GetOptions::default()), Some(big));
}

#[test]
fn test_configure_shrinks_tiers_immediately() {
    let (cache, _, _) = manager();
    for i in 0..10 {
        cache.set(&format!("k{}", i), json!(i), SetOptions::default());
    }

    cache
        .configure(CacheConfigPatch {
            max_memory_cache_size: Some(4),
            max_storage_cache_size: Some(3),
            api_ttl: Some(Duration::from_secs(10)),
            ..Default::default()
        })
        .unwrap();

    let stats = cache.stats();
    assert_eq!(stats.memory.size, 4);
    assert_eq!(stats.memory.max_size, 4);
    assert_eq!(stats.storage.size, 3);
    assert_eq!(stats.storage.max_size, 3);
    assert_eq!(cache.config().api_ttl, Duration::from_secs(10));
}

#[test]
fn test_configure_version_change_clears_storage() {
    let (cache, store, _) = manager();
    cache.set("k", json!(1), SetOptions::new().storage_only());

    cache
        .configure(CacheConfigPatch {
            version: Some("1.1.0".to_string()),
            ..Default::default()
        })
        .unwrap();

    assert!(store.raw_keys("cachet_").is_empty());
    assert_eq!(cache.stats().version, "1.1.0");
}

#[test]
fn test_storage_pressure_trims_persistent_tier() {
    let (cache, store, _) = manager();
    for i in 0..10 {
        cache.set(&format!("k{}", i), json!(i), SetOptions::new().storage_only());
        pause();
    }

    store.set_estimate(50, 100);
    assert_eq!(cache.check_storage_pressure(), 0);

    store.set_estimate(90, 100);
    assert_eq!(cache.check_storage_pressure(), 3);
    assert_eq!(cache.stats().storage.size, 7);
    assert!(!cache.locate("k0").in_storage);
    assert!(cache.locate("k9").in_storage);
}

#[test]
fn test_storage_monitor_without_estimate_is_noop() {
    let (cache, _, _) = manager();
    cache.set("k", json!(1), SetOptions::default());
    assert_eq!(cache.check_storage_pressure(), 0);
    assert_eq!(cache.stats().storage.size, 1);
}

#[test]
fn test_clear_all_caches_keeps_version_marker() {
    let (cache, store, _) = manager();
    cache.set("a", json!(1), SetOptions::default());
    cache.set("b", json!(2), SetOptions::default());

    cache.clear_all_caches();

    let stats = cache.stats();
    assert_eq!(stats.memory.size, 0);
    assert_eq!(stats.storage.size, 0);
    assert_eq!(store.get("cachet-version").unwrap().as_deref(), Some("1.0.0"));
}

#[test]
fn test_sqlite_backed_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cache.db");

    {
        let store = Arc::new(SqliteStore::open(&db).unwrap());
        let cache = CacheManager::new(CacheConfig::default(), store, ScriptedFetcher::new()).unwrap();
        cache.set("session", json!({"user": "ada"}), SetOptions::default());
    }

    let store = Arc::new(SqliteStore::open(&db).unwrap());
    let cache = CacheManager::new(CacheConfig::default(), store, ScriptedFetcher::new()).unwrap();
    assert!(!cache.locate("session").in_memory);
    assert_eq!(
        cache.get("session", GetOptions::default()),
        Some(json!({"user": "ada"}))
    );
}

#[tokio::test]
async fn test_background_sweep_purges_expired_entries() {
    let config = CacheConfig {
        sweep_interval: Duration::from_millis(50),
        ..Default::default()
    };
    let store = TestStore::new();
    let cache = manager_with(config, store.clone(), ScriptedFetcher::new());
    cache.start().unwrap();

    cache.set("short", json!(1), SetOptions::new().ttl(Duration::from_millis(20)));
    cache.set("long", json!(2), SetOptions::default());

    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = cache.stats();
    assert_eq!(stats.memory.size, 1);
    assert_eq!(stats.storage.size, 1);
    assert_eq!(stats.hits.misses, 0, "sweep never goes through get");

    cache.shutdown().await;
}

/// Store a storage-only key and read it until the next read promotes it
fn warm(cache: &CacheManager, key: &str) {
    cache.set(key, json!("old"), SetOptions::new().storage_only());
    cache.get(key, GetOptions::default());
    cache.get(key, GetOptions::default());
}

/// Run `op` on this thread while another thread keeps reading `key`
fn race_with_reader(cache: &Arc<CacheManager>, key: &'static str, op: impl FnOnce()) {
    let stop = Arc::new(AtomicBool::new(false));
    let reader = {
        let cache = Arc::clone(cache);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                cache.get(key, GetOptions::default());
            }
        })
    };
    std::thread::yield_now();
    op();
    stop.store(true, Ordering::SeqCst);
    reader.join().unwrap();
}

#[test]
fn test_remove_is_not_undone_by_concurrent_promotion() {
    for _ in 0..200 {
        let (cache, _, _) = manager();
        warm(&cache, "hot");

        race_with_reader(&cache, "hot", || cache.remove("hot"));

        assert_eq!(cache.locate("hot"), Location::default());
        assert_eq!(cache.get("hot", GetOptions::default()), None);
    }
}

#[test]
fn test_set_is_not_overwritten_by_concurrent_promotion() {
    for _ in 0..200 {
        let (cache, _, _) = manager();
        warm(&cache, "hot");

        race_with_reader(&cache, "hot", || {
            cache.set("hot", json!("new"), SetOptions::default())
        });

        assert_eq!(cache.get("hot", GetOptions::default()), Some(json!("new")));
    }
}

#[tokio::test]
async fn test_start_checks_storage_pressure_once() {
    let (cache, store, _) = manager();
    for i in 0..10 {
        cache.set(&format!("k{}", i), json!(i), SetOptions::new().storage_only());
        pause();
    }
    store.set_estimate(90, 100);

    cache.start().unwrap();
    assert_eq!(cache.stats().storage.size, 7);
    assert!(!cache.locate("k0").in_storage);

    // No interval configured: the startup check does not repeat
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cache.stats().storage.size, 7);

    cache.shutdown().await;
}

#[tokio::test]
async fn test_periodic_storage_monitor_trims_under_pressure() {
    let config = CacheConfig {
        storage_check_interval: Some(Duration::from_millis(30)),
        ..Default::default()
    };
    let store = TestStore::new();
    let cache = manager_with(config, store.clone(), ScriptedFetcher::new());
    for i in 0..10 {
        cache.set(&format!("k{}", i), json!(i), SetOptions::new().storage_only());
        pause();
    }

    cache.start().unwrap();
    assert_eq!(cache.stats().storage.size, 10, "no estimate yet");

    store.set_estimate(90, 100);
    let mut waited = 0;
    while cache.stats().storage.size == 10 && waited < 50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    // Relieve pressure before the next round can run
    store.set_estimate(10, 100);

    let stats = cache.stats();
    assert_eq!(stats.storage.size, 7);
    assert_eq!(stats.hits.evictions, 3);
    assert!(!cache.locate("k0").in_storage);
    assert!(cache.locate("k9").in_storage);

    cache.shutdown().await;
}

#[tokio::test]
async fn test_heap_monitor_loop_trims_memory() {
    let config = CacheConfig {
        heap_check_interval: Duration::from_millis(30),
        ..Default::default()
    };
    let cache = CacheManager::builder()
        .config(config)
        .heap_probe(Arc::new(FixedHeap(0.9)))
        .build()
        .unwrap();
    for i in 0..10 {
        cache.set(&format!("k{}", i), json!(i), SetOptions::new().memory_only());
    }

    cache.start().unwrap();
    assert_eq!(cache.stats().memory.size, 10);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(cache.stats().memory.size <= 5);

    cache.shutdown().await;
}
