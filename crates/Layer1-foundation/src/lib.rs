//! # cachet-foundation
//!
//! Foundation layer for Cachet:
//! - Error: the single error type shared by every layer
//! - Storage: durable key-value stores (SQLite, in-process) and JSON config files
//! - Config: cache configuration with file loading and runtime patches
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  cachet-core (CacheManager)                             │
//! │        │                          │                     │
//! │        ▼                          ▼                     │
//! │  CacheConfig ◄── JsonStore   DurableStore (trait)       │
//! │                               ├── SqliteStore           │
//! │                               └── MemoryStore           │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{CacheConfig, CacheConfigPatch, CACHE_CONFIG_FILE};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{DurableStore, JsonStore, MemoryStore, SqliteStore, StorageEstimate};
