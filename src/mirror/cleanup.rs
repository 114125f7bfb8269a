//! Physical removal of mirror directories
//!
//! Every removal runs under the mirror's remove lock. Bookkeeping follows the
//! physical outcome: a deleted mirror is forgotten so its name may be issued
//! again, a mirror that could not be deleted is invalidated so its name never
//! is.

use super::manager::MirrorManager;
use chrono::Duration;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Deletes directories from disk
pub trait DirectoryRemover: Send + Sync {
    /// Remove `dir` and everything below it; a missing directory is not an error
    fn remove_dir(&self, dir: &Path) -> io::Result<()>;
}

/// Removes directories with `std::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct FsRemover;

impl DirectoryRemover for FsRemover {
    fn remove_dir(&self, dir: &Path) -> io::Result<()> {
        match fs::remove_dir_all(dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// A directory that could not be removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalFailure {
    pub dir: PathBuf,
    pub reason: String,
}

/// Outcome of removing a batch of mirrors
///
/// Failures are collected, never raised on the first error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<RemovalFailure>,
}

impl RemovalReport {
    /// True when every removal succeeded
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Total number of directories attempted
    pub fn attempted(&self) -> usize {
        self.removed.len() + self.failed.len()
    }

    fn record_failure(&mut self, dir: &Path, reason: impl ToString) {
        self.failed.push(RemovalFailure {
            dir: dir.to_path_buf(),
            reason: reason.to_string(),
        });
    }
}

/// Delete one mirror under its remove lock and update the map accordingly
pub fn remove_mirror(
    manager: &MirrorManager,
    remover: &dyn DirectoryRemover,
    dir: &Path,
    report: &mut RemovalReport,
) {
    remove_locked(manager, remover, dir, report, true);
}

/// Delete a directory no URL maps to
///
/// The map is left alone on success: once the directory is gone its name
/// may be claimed by another instance.
pub fn remove_orphan(
    manager: &MirrorManager,
    remover: &dyn DirectoryRemover,
    dir: &Path,
    report: &mut RemovalReport,
) {
    remove_locked(manager, remover, dir, report, false);
}

fn remove_locked(
    manager: &MirrorManager,
    remover: &dyn DirectoryRemover,
    dir: &Path,
    report: &mut RemovalReport,
    forget: bool,
) {
    let lock = manager.locks().lock_for(dir);
    let _guard = match lock.lock() {
        Ok(guard) => guard,
        Err(e) => {
            error!("Cannot lock {} for removal: {}", dir.display(), e);
            report.record_failure(dir, e);
            return;
        }
    };

    debug!("Delete mirror {}", dir.display());
    match remover.remove_dir(dir) {
        Ok(()) => {
            if forget {
                if let Err(e) = manager.forget_mirror_dir(dir) {
                    error!("Removed {} but cannot update the map: {}", dir.display(), e);
                }
            }
            report.removed.push(dir.to_path_buf());
        }
        Err(e) => {
            error!("Cannot delete mirror dir {}: {}", dir.display(), e);
            if let Err(inv) = manager.invalidate(dir) {
                error!("Cannot invalidate {}: {}", dir.display(), inv);
            }
            report.record_failure(dir, e);
        }
    }
}

/// Remove mirrors unused for longer than `timeout`
pub fn remove_expired(
    manager: &MirrorManager,
    remover: &dyn DirectoryRemover,
    timeout: Duration,
) -> RemovalReport {
    let mut report = RemovalReport::default();
    let expired = manager.expired_dirs(timeout);
    debug!("Remove unused git repository clones started");

    for dir in expired {
        info!("Remove unused git repository dir {}", dir.display());
        remove_mirror(manager, remover, &dir, &mut report);
    }

    debug!("Remove unused git repository clones finished");
    report
}
