//! Cache entry envelope
//!
//! Wraps a cached payload with the metadata both tiers rank and expire by.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use cachet_foundation::Error;

/// Cached data. Anything serde can represent round-trips through both tiers.
pub type Payload = serde_json::Value;

/// Retention priority. Ordered `Low < Normal < High`; higher survives eviction longer.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(Error::InvalidInput(format!("unknown priority '{}'", other))),
        }
    }
}

/// A cached payload plus age, TTL, priority and access statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data: Payload,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "ttlMs", with = "ttl_ms")]
    pub ttl: Duration,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub priority: Priority,
    pub size_bytes: usize,
}

impl CacheEntry {
    /// Fresh entry: one access, size estimated from `data`
    pub fn new(data: Payload, ttl: Duration, priority: Priority, now: DateTime<Utc>) -> Self {
        let size_bytes = estimate_size(&data);
        Self {
            data,
            created_at: now,
            ttl,
            last_accessed_at: now,
            access_count: 1,
            priority,
            size_bytes,
        }
    }

    /// Time since creation (zero if the clock went backwards)
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// `now - created_at < ttl`
    #[inline]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.age(now) < self.ttl
    }

    /// Record a successful read
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
        self.access_count = self.access_count.saturating_add(1);
    }
}

/// Byte length of the JSON form of `data`; 0 if it cannot be serialized.
pub fn estimate_size<T: Serialize + ?Sized>(data: &T) -> usize {
    serde_json::to_vec(data).map(|bytes| bytes.len()).unwrap_or(0)
}

mod ttl_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
