//! Configuration schema for gitmirror
//!
//! Configuration is stored at `~/.config/gitmirror/config.toml`

use crate::state::{parse_memory_mb, HeapLimits, DEFAULT_HEAP_FACTOR, DEFAULT_STATE_FILE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Mirror cache settings
    pub mirrors: MirrorsConfig,

    /// Per-repository state settings
    pub state: StateConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Mirror cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorsConfig {
    /// Cache root; defaults to the platform cache dir
    pub cache_dir: Option<PathBuf>,

    /// Remove mirrors unused for longer than this (0 = never)
    pub expiration_hours: u64,
}

impl Default for MirrorsConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            expiration_hours: 168,
        }
    }
}

impl MirrorsConfig {
    /// Cache root to use
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    /// Expiration as a duration, `None` when disabled
    pub fn expiration(&self) -> Option<chrono::Duration> {
        if self.expiration_hours == 0 {
            return None;
        }
        i64::try_from(self.expiration_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
    }
}

/// Per-repository state configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// State file name inside a repository directory
    pub file_name: String,

    /// Fixed subprocess heap, e.g. "2G"; disables escalation
    pub heap_size: Option<String>,

    /// Cap on heap escalation, e.g. "4G"
    pub heap_max: Option<String>,

    /// Heap growth between attempts (1 = no growth)
    pub heap_factor: f32,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            file_name: DEFAULT_STATE_FILE.to_string(),
            heap_size: None,
            heap_max: None,
            heap_factor: DEFAULT_HEAP_FACTOR,
        }
    }
}

impl StateConfig {
    /// Heap limits for subprocesses on this machine
    pub fn heap_limits(&self) -> HeapLimits {
        HeapLimits {
            explicit_mb: self.heap_size.as_deref().and_then(parse_memory_mb),
            max_mb: self.heap_max.as_deref().and_then(parse_memory_mb),
            factor: self.heap_factor,
            ..HeapLimits::detect()
        }
    }
}

/// Platform default cache root
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gitmirror")
        .join("mirrors")
}
