//! Error types for gitmirror
//!
//! All modules use `MirrorResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gitmirror operations
pub type MirrorResult<T> = Result<T, MirrorError>;

/// All errors that can occur in gitmirror
#[derive(Error, Debug)]
pub enum MirrorError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Mirror bookkeeping errors
    #[error("Failed to persist mirror map {path}: {source}")]
    MirrorPersist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a mirror directory of {root}: {dir}")]
    NotAMirror { dir: PathBuf, root: PathBuf },

    #[error("Unknown cache: {0}")]
    UnknownCache(String),

    #[error("Reset of cache {0} is already running")]
    ResetInProgress(String),

    // Repository state errors
    #[error("Invalid state {what} '{name}': {reason}")]
    InvalidStateKey {
        what: &'static str,
        name: String,
        reason: &'static str,
    },

    // Locking errors
    #[error("Failed to lock {path}: {source}")]
    LockAcquire {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MirrorError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a lock acquisition error
    pub fn lock(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LockAcquire {
            path: path.into(),
            source,
        }
    }

    /// Check if the failed operation may succeed when retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResetInProgress(_) | Self::LockAcquire { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::UnknownCache(_) => Some("Run: gitmirror cache list"),
            Self::ResetInProgress(_) => Some("Wait for the running reset to finish"),
            Self::NotAMirror { .. } => Some("Run: gitmirror list"),
            Self::InvalidStateKey { .. } => Some("Use names without '=', '#', line breaks or surrounding spaces"),
            Self::ConfigInvalid { .. } => Some("Fix the file or run: gitmirror config init --force"),
            _ => None,
        }
    }
}
