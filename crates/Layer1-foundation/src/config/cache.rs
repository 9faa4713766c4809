//! Cache configuration
//!
//! `CacheConfig` is the validated, live configuration. `CacheConfigPatch`
//! carries caller overrides (from a config file or `configure`) and is merged
//! with `CacheConfig::apply`.

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Config file name
pub const CACHE_CONFIG_FILE: &str = "cache.json";

/// Cache system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// TTL for `set` calls that do not pass one
    #[serde(default = "default_ttl", with = "duration_ms")]
    pub default_ttl: Duration,

    /// TTL for cached API responses (volatile data)
    #[serde(default = "default_api_ttl", with = "duration_ms")]
    pub api_ttl: Duration,

    /// TTL for cached static resources
    #[serde(default = "default_resource_ttl", with = "duration_ms")]
    pub resource_ttl: Duration,

    /// Memory tier capacity (entries)
    #[serde(default = "default_max_memory_cache_size")]
    pub max_memory_cache_size: usize,

    /// Persistent tier capacity (entries)
    #[serde(default = "default_max_storage_cache_size")]
    pub max_storage_cache_size: usize,

    /// Namespace prefix for every durable entry key
    #[serde(default = "default_storage_prefix")]
    pub storage_prefix: String,

    /// Durable key holding the cache format version
    #[serde(default = "default_version_key")]
    pub version_key: String,

    /// Running cache format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Largest serialized entry the persistent tier accepts (bytes)
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: usize,

    /// Occupancy (fraction of capacity) a full tier is evicted down to
    #[serde(default = "default_eviction_target")]
    pub eviction_target: f64,

    /// Fraction of persistent entries evicted after a quota failure
    #[serde(default = "default_quota_evict_fraction")]
    pub quota_evict_fraction: f64,

    /// Fraction of persistent entries evicted under storage pressure
    #[serde(default = "default_storage_pressure_evict_fraction")]
    pub storage_pressure_evict_fraction: f64,

    /// Persistent hits with more accesses than this are copied to memory
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: u32,

    /// Period of the expired-entry sweep
    #[serde(default = "default_sweep_interval", with = "duration_ms")]
    pub sweep_interval: Duration,

    /// Period of the heap pressure monitor
    #[serde(default = "default_heap_check_interval", with = "duration_ms")]
    pub heap_check_interval: Duration,

    /// Period of the storage quota monitor (`None` = check once at startup)
    #[serde(default, with = "option_duration_ms", skip_serializing_if = "Option::is_none")]
    pub storage_check_interval: Option<Duration>,
}

// Default value functions
fn default_ttl() -> Duration {
    Duration::from_secs(60 * 60)
} // 1 hour
fn default_api_ttl() -> Duration {
    Duration::from_secs(5 * 60)
} // 5 minutes
fn default_resource_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
} // 24 hours
fn default_max_memory_cache_size() -> usize {
    50
}
fn default_max_storage_cache_size() -> usize {
    200
}
fn default_storage_prefix() -> String {
    "cachet_".to_string()
}
fn default_version_key() -> String {
    "cachet-version".to_string()
}
fn default_version() -> String {
    "1.0.0".to_string()
}
fn default_max_entry_bytes() -> usize {
    1024 * 1024
} // 1MB
fn default_eviction_target() -> f64 {
    0.8
}
fn default_quota_evict_fraction() -> f64 {
    0.5
}
fn default_storage_pressure_evict_fraction() -> f64 {
    0.3
}
fn default_promotion_threshold() -> u32 {
    3
}
fn default_sweep_interval() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_heap_check_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: default_ttl(),
            api_ttl: default_api_ttl(),
            resource_ttl: default_resource_ttl(),
            max_memory_cache_size: default_max_memory_cache_size(),
            max_storage_cache_size: default_max_storage_cache_size(),
            storage_prefix: default_storage_prefix(),
            version_key: default_version_key(),
            version: default_version(),
            max_entry_bytes: default_max_entry_bytes(),
            eviction_target: default_eviction_target(),
            quota_evict_fraction: default_quota_evict_fraction(),
            storage_pressure_evict_fraction: default_storage_pressure_evict_fraction(),
            promotion_threshold: default_promotion_threshold(),
            sweep_interval: default_sweep_interval(),
            heap_check_interval: default_heap_check_interval(),
            storage_check_interval: None,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Defaults, then the global file, then the project file
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        if let Ok(global) = JsonStore::global() {
            if let Some(patch) = global.load_optional::<CacheConfigPatch>(CACHE_CONFIG_FILE)? {
                config.apply(patch)?;
            }
        }

        if let Ok(project) = JsonStore::current_project() {
            if let Some(patch) = project.load_optional::<CacheConfigPatch>(CACHE_CONFIG_FILE)? {
                config.apply(patch)?;
            }
        }

        Ok(config)
    }

    /// Load a single config file on top of the defaults
    pub fn load_from(store: &JsonStore) -> Result<Self> {
        let mut config = Self::new();
        if let Some(patch) = store.load_optional::<CacheConfigPatch>(CACHE_CONFIG_FILE)? {
            config.apply(patch)?;
        }
        Ok(config)
    }

    // ========================================================================
    // Merge / Validate
    // ========================================================================

    /// Merge overrides. The patch is applied all-or-nothing: if the merged
    /// result fails validation, `self` is left unchanged.
    pub fn apply(&mut self, patch: CacheConfigPatch) -> Result<()> {
        let mut next = self.clone();
        next.merge(patch);
        next.validate()?;
        *self = next;
        Ok(())
    }

    fn merge(&mut self, patch: CacheConfigPatch) {
        if let Some(v) = patch.default_ttl {
            self.default_ttl = v;
        }
        if let Some(v) = patch.api_ttl {
            self.api_ttl = v;
        }
        if let Some(v) = patch.resource_ttl {
            self.resource_ttl = v;
        }
        if let Some(v) = patch.max_memory_cache_size {
            self.max_memory_cache_size = v;
        }
        if let Some(v) = patch.max_storage_cache_size {
            self.max_storage_cache_size = v;
        }
        if let Some(v) = patch.storage_prefix {
            self.storage_prefix = v;
        }
        if let Some(v) = patch.version_key {
            self.version_key = v;
        }
        if let Some(v) = patch.version {
            self.version = v;
        }
        if let Some(v) = patch.max_entry_bytes {
            self.max_entry_bytes = v;
        }
        if let Some(v) = patch.eviction_target {
            self.eviction_target = v;
        }
        if let Some(v) = patch.quota_evict_fraction {
            self.quota_evict_fraction = v;
        }
        if let Some(v) = patch.storage_pressure_evict_fraction {
            self.storage_pressure_evict_fraction = v;
        }
        if let Some(v) = patch.promotion_threshold {
            self.promotion_threshold = v;
        }
        if let Some(v) = patch.sweep_interval {
            self.sweep_interval = v;
        }
        if let Some(v) = patch.heap_check_interval {
            self.heap_check_interval = v;
        }
        if patch.storage_check_interval.is_some() {
            self.storage_check_interval = patch.storage_check_interval;
        }
    }

    /// Check every field against its allowed range
    pub fn validate(&self) -> Result<()> {
        if self.max_memory_cache_size == 0 {
            return Err(Error::Validation(
                "maxMemoryCacheSize must be at least 1".to_string(),
            ));
        }
        if self.max_storage_cache_size == 0 {
            return Err(Error::Validation(
                "maxStorageCacheSize must be at least 1".to_string(),
            ));
        }
        if self.max_entry_bytes == 0 {
            return Err(Error::Validation(
                "maxEntryBytes must be at least 1".to_string(),
            ));
        }
        for (name, ttl) in [
            ("defaultTtl", self.default_ttl),
            ("apiTtl", self.api_ttl),
            ("resourceTtl", self.resource_ttl),
        ] {
            if ttl.is_zero() {
                return Err(Error::Validation(format!("{} must be positive", name)));
            }
        }
        for (name, interval) in [
            ("sweepInterval", self.sweep_interval),
            ("heapCheckInterval", self.heap_check_interval),
        ] {
            if interval.is_zero() {
                return Err(Error::Validation(format!("{} must be positive", name)));
            }
        }
        if self.storage_check_interval.is_some_and(|d| d.is_zero()) {
            return Err(Error::Validation(
                "storageCheckInterval must be positive".to_string(),
            ));
        }
        for (name, fraction) in [
            ("evictionTarget", self.eviction_target),
            ("quotaEvictFraction", self.quota_evict_fraction),
            (
                "storagePressureEvictFraction",
                self.storage_pressure_evict_fraction,
            ),
        ] {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(Error::Validation(format!(
                    "{} must be in (0, 1], got {}",
                    name, fraction
                )));
            }
        }
        if self.storage_prefix.is_empty() {
            return Err(Error::Validation("storagePrefix must not be empty".to_string()));
        }
        if self.version_key.is_empty() || self.version_key.starts_with(&self.storage_prefix) {
            return Err(Error::Validation(format!(
                "versionKey '{}' must be non-empty and outside the '{}' namespace",
                self.version_key, self.storage_prefix
            )));
        }
        if self.version.is_empty() {
            return Err(Error::Validation("version must not be empty".to_string()));
        }
        Ok(())
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn memory_capacity(mut self, entries: usize) -> Self {
        self.max_memory_cache_size = entries;
        self
    }

    pub fn storage_capacity(mut self, entries: usize) -> Self {
        self.max_storage_cache_size = entries;
        self
    }

    pub fn storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = prefix.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// Partial configuration: every field optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfigPatch {
    #[serde(default, with = "option_duration_ms", skip_serializing_if = "Option::is_none")]
    pub default_ttl: Option<Duration>,
    #[serde(default, with = "option_duration_ms", skip_serializing_if = "Option::is_none")]
    pub api_ttl: Option<Duration>,
    #[serde(default, with = "option_duration_ms", skip_serializing_if = "Option::is_none")]
    pub resource_ttl: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_cache_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_storage_cache_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entry_bytes: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_target: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_evict_fraction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_pressure_evict_fraction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion_threshold: Option<u32>,
    #[serde(default, with = "option_duration_ms", skip_serializing_if = "Option::is_none")]
    pub sweep_interval: Option<Duration>,
    #[serde(default, with = "option_duration_ms", skip_serializing_if = "Option::is_none")]
    pub heap_check_interval: Option<Duration>,
    #[serde(default, with = "option_duration_ms", skip_serializing_if = "Option::is_none")]
    pub storage_check_interval: Option<Duration>,
}

impl CacheConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Durations as integer milliseconds on disk
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
