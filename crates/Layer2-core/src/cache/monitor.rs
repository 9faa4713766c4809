//! Pressure monitors
//!
//! Heap and storage-quota observers. Both are advisory: when no introspection
//! is available they do nothing.

use parking_lot::Mutex;
use sysinfo::{Pid, System};

/// Heap ratio above which the memory tier is halved
pub const HEAP_CRITICAL_RATIO: f64 = 0.8;
/// Heap ratio above which the memory tier is trimmed to 80%
pub const HEAP_ELEVATED_RATIO: f64 = 0.6;
/// Storage ratio above which the persistent tier is trimmed
pub const STORAGE_CRITICAL_RATIO: f64 = 0.8;

/// Heap usage sample, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapUsage {
    pub used: u64,
    pub limit: u64,
}

impl HeapUsage {
    pub fn ratio(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        self.used as f64 / self.limit as f64
    }
}

/// Source of heap usage samples
pub trait HeapProbe: Send + Sync {
    /// `None` when the runtime cannot tell
    fn sample(&self) -> Option<HeapUsage>;
}

/// Probe for runtimes without heap introspection
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHeapProbe;

impl HeapProbe for NoHeapProbe {
    fn sample(&self) -> Option<HeapUsage> {
        None
    }
}

/// Probe backed by `sysinfo`.
///
/// With a limit, reports this process's resident memory against it.
/// Without one, reports system-wide used memory against total memory.
pub struct SystemHeapProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
    limit: Option<u64>,
}

impl std::fmt::Debug for SystemHeapProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemHeapProbe")
            .field("pid", &self.pid)
            .field("limit", &self.limit)
            .finish()
    }
}

impl SystemHeapProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
            limit: None,
        }
    }

    /// Measure the current process against a fixed byte budget
    pub fn with_limit(limit_bytes: u64) -> Self {
        Self {
            limit: Some(limit_bytes),
            ..Self::new()
        }
    }
}

impl Default for SystemHeapProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapProbe for SystemHeapProbe {
    fn sample(&self) -> Option<HeapUsage> {
        let mut sys = self.system.lock();

        if let (Some(limit), Some(pid)) = (self.limit, self.pid) {
            if !sys.refresh_process(pid) {
                return None;
            }
            let used = sys.process(pid)?.memory();
            return Some(HeapUsage { used, limit });
        }

        sys.refresh_memory();
        let limit = sys.total_memory();
        if limit == 0 {
            return None;
        }
        Some(HeapUsage {
            used: sys.used_memory(),
            limit,
        })
    }
}

/// Fraction of the memory tier to keep at a given heap ratio, if any action
/// is needed
pub fn heap_keep_ratio(ratio: f64) -> Option<f64> {
    if ratio > HEAP_CRITICAL_RATIO {
        Some(0.5)
    } else if ratio > HEAP_ELEVATED_RATIO {
        Some(0.8)
    } else {
        None
    }
}

/// Whether storage usage calls for proactive eviction
pub fn storage_under_pressure(ratio: f64) -> bool {
    ratio > STORAGE_CRITICAL_RATIO
}
