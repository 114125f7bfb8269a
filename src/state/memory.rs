//! Remembered heap size for forked git subprocesses
//!
//! A fetch or patch subprocess that runs out of memory is retried with a
//! larger heap. [`HeapLadder`] yields the sizes to try and writes each one
//! through to the repository's state file, so the next run starts from the
//! size that last got used instead of from scratch.

use super::store::RepositoryStateStore;
use crate::error::MirrorResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

const HEAP_KEY: &str = "xmx";

/// Growth of the heap between two attempts
pub const DEFAULT_HEAP_FACTOR: f32 = 1.4;

const MB: u64 = 1024 * 1024;

/// Which kind of subprocess the value applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TuningScope {
    Fetch,
    Patch,
}

impl TuningScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Patch => "patch",
        }
    }
}

impl fmt::Display for TuningScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TuningScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetch" => Ok(Self::Fetch),
            "patch" => Ok(Self::Patch),
            other => Err(format!("unknown tuning scope '{other}', expected fetch or patch")),
        }
    }
}

/// Heap size in megabytes that last worked for a subprocess of one scope
#[derive(Debug, Clone)]
pub struct MemoryTuning {
    store: RepositoryStateStore,
}

impl MemoryTuning {
    pub fn new(repo_dir: &Path, scope: TuningScope) -> Self {
        Self {
            store: RepositoryStateStore::new(repo_dir, scope.as_str()),
        }
    }

    pub fn with_file_name(repo_dir: &Path, file_name: &str, scope: TuningScope) -> Self {
        Self {
            store: RepositoryStateStore::with_file_name(repo_dir, file_name, scope.as_str()),
        }
    }

    pub fn remembered_heap_mb(&self) -> Option<i64> {
        self.store.read(HEAP_KEY)
    }

    pub fn remember_heap_mb(&self, megabytes: i64) -> MirrorResult<()> {
        self.store.write(HEAP_KEY, Some(megabytes))
    }

    pub fn forget(&self) -> MirrorResult<()> {
        self.store.write(HEAP_KEY, None)
    }

    /// Heap sizes to try for one subprocess run
    pub fn ladder(&self, limits: HeapLimits) -> HeapLadder<'_> {
        HeapLadder {
            tuning: self,
            limits,
            prev: None,
            limit_reached: false,
        }
    }
}

/// Bounds on the heap sizes a [`HeapLadder`] hands out, all in megabytes
#[derive(Debug, Clone, PartialEq)]
pub struct HeapLimits {
    /// Fixed heap size; disables escalation and clears the remembered value
    pub explicit_mb: Option<i64>,
    /// Cap on escalation; replaces the system and free memory caps
    pub max_mb: Option<i64>,
    /// Cap imposed by the platform
    pub system_max_mb: i64,
    /// First size when nothing is remembered
    pub default_start_mb: i64,
    /// Growth per attempt; 1 or less disables escalation
    pub factor: f32,
    /// Free physical memory, when known
    pub free_ram_mb: Option<i64>,
    /// Memory kept back for the host when capping by free memory
    pub reserved_mb: i64,
}

impl Default for HeapLimits {
    fn default() -> Self {
        Self {
            explicit_mb: None,
            max_mb: None,
            system_max_mb: system_max_heap_mb(),
            default_start_mb: 1024,
            factor: DEFAULT_HEAP_FACTOR,
            free_ram_mb: None,
            reserved_mb: 0,
        }
    }
}

impl HeapLimits {
    /// Defaults with the free memory of this machine filled in
    pub fn detect() -> Self {
        let free_ram_mb = free_ram_mb();
        Self {
            default_start_mb: match free_ram_mb {
                Some(free) if free > 1024 => 1024,
                _ => 512,
            },
            free_ram_mb,
            ..Self::default()
        }
    }
}

/// Successive heap sizes for one subprocess run
///
/// The first size is the remembered one, or the default start. Each further
/// size is the previous one times the factor, until a cap is hit; the capped
/// size is handed out once and the ladder ends. Every size handed out is
/// remembered. An explicit size is handed out once and is never remembered.
pub struct HeapLadder<'a> {
    tuning: &'a MemoryTuning,
    limits: HeapLimits,
    prev: Option<i64>,
    limit_reached: bool,
}

impl HeapLadder<'_> {
    /// Heap size for the next attempt, `None` when there is nothing left to try
    pub fn next_heap_mb(&mut self) -> Option<i64> {
        let first = self.prev.is_none();
        let escalation_disabled = self.limits.factor <= 1.0;

        if first {
            let fixed = match self.limits.explicit_mb {
                Some(explicit) => {
                    debug!("Automatic heap sizing is disabled, using explicit {}M", explicit);
                    Some(explicit)
                }
                None if escalation_disabled => {
                    debug!("Heap escalation is disabled, using {}M", self.limits.default_start_mb);
                    Some(self.limits.default_start_mb)
                }
                None => None,
            };
            if let Some(fixed) = fixed {
                if let Err(e) = self.tuning.forget() {
                    warn!("Cannot clear remembered heap size: {}", e);
                }
                self.prev = Some(fixed);
                self.limit_reached = true;
                return Some(fixed);
            }
        }
        if self.limit_reached {
            return None;
        }

        let next = self.candidate()?;
        if let Some(prev) = self.prev.filter(|prev| next > *prev) {
            info!(
                "Not enough memory with {}M heap, will retry with {}M",
                prev, next
            );
        }
        if let Err(e) = self.tuning.remember_heap_mb(next) {
            warn!("Cannot remember heap size {}M: {}", next, e);
        }
        self.prev = Some(next);
        Some(next)
    }

    fn candidate(&mut self) -> Option<i64> {
        let next = match self.prev {
            None => match self.tuning.remembered_heap_mb() {
                Some(remembered) => {
                    debug!("Using remembered heap size {}M", remembered);
                    remembered
                }
                None => self.limits.default_start_mb,
            },
            Some(prev) => (prev as f32 * self.limits.factor) as i64,
        };

        if let Some(max) = self.limits.max_mb {
            return Some(self.cap(next, max, "configured maximum"));
        }
        if next >= self.limits.system_max_mb {
            return Some(self.cap(next, self.limits.system_max_mb, "system maximum"));
        }

        let Some(free) = self.limits.free_ram_mb else {
            return Some(next);
        };
        let max = free - self.limits.reserved_mb;
        if max <= 0 || next < max {
            return Some(next);
        }
        self.limit_reached = true;
        match self.prev {
            Some(prev) if prev >= max => None,
            _ => {
                if next > max {
                    info!("Heap size limited by free memory to {}M", max);
                }
                Some(max)
            }
        }
    }

    fn cap(&mut self, next: i64, max: i64, what: &str) -> i64 {
        if next < max {
            return next;
        }
        self.limit_reached = true;
        if next > max {
            info!("Heap size limited by the {} to {}M", what, max);
        }
        max
    }
}

impl Iterator for HeapLadder<'_> {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        self.next_heap_mb()
    }
}

/// Largest heap worth asking for on this platform
fn system_max_heap_mb() -> i64 {
    if cfg!(target_pointer_width = "64") {
        4 * 1024
    } else if cfg!(windows) {
        1024
    } else {
        2 * 1024
    }
}

/// Parse a size such as `512M`, `2g` or `1048576` (bytes) into megabytes
pub fn parse_memory_mb(value: &str) -> Option<i64> {
    let value = value.trim().to_ascii_lowercase();
    if value.is_empty() {
        return None;
    }

    let (number, unit) = if let Some(n) = value.strip_suffix('g') {
        (n, 1024 * MB)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, MB)
    } else if let Some(n) = value.strip_suffix('k') {
        (n, 1024)
    } else {
        (value.as_str(), 1)
    };

    let bytes = number.trim().parse::<u64>().ok()?.checked_mul(unit)?;
    i64::try_from(bytes / MB).ok()
}

/// Available physical memory in megabytes
#[cfg(target_os = "linux")]
fn free_ram_mb() -> Option<i64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let line = meminfo.lines().find(|l| l.starts_with("MemAvailable:"))?;
    let kb: i64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}

#[cfg(not(target_os = "linux"))]
fn free_ram_mb() -> Option<i64> {
    None
}
