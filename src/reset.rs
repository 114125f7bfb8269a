//! Named-cache reset integration
//!
//! Exposes the mirror cache to a cache administration host that manages
//! several named caches. This cache answers to the single name `git`.

use crate::error::{MirrorError, MirrorResult};
use crate::mirror::{remove_mirror, DirectoryRemover, FsRemover, MirrorManager, RemovalReport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name under which the mirror cache is exposed
pub const GIT_CACHE_NAME: &str = "git";

/// List, inspect and reset the mirror cache
pub struct CacheResetController {
    manager: Arc<MirrorManager>,
    remover: Box<dyn DirectoryRemover>,
    running: AtomicBool,
}

/// Clears the running flag even if the reset unwinds
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CacheResetController {
    /// Create a controller that deletes mirrors from disk
    pub fn new(manager: Arc<MirrorManager>) -> Self {
        Self::with_remover(manager, Box::new(FsRemover))
    }

    /// Create a controller with a custom remover
    pub fn with_remover(manager: Arc<MirrorManager>, remover: Box<dyn DirectoryRemover>) -> Self {
        Self {
            manager,
            remover,
            running: AtomicBool::new(false),
        }
    }

    /// Names of the caches this controller manages
    pub fn list_caches(&self) -> Vec<String> {
        vec![GIT_CACHE_NAME.to_string()]
    }

    /// Whether the named cache holds no mirrors
    pub fn is_empty(&self, name: &str) -> MirrorResult<bool> {
        check_name(name)?;
        Ok(self.manager.mappings().is_empty())
    }

    /// Delete every known mirror
    ///
    /// Each mirror is deleted under its remove lock, independently of the
    /// others. Deleted mirrors are forgotten, the ones that could not be
    /// deleted are invalidated, and all failures are returned in the report.
    pub fn reset(&self, name: &str) -> MirrorResult<RemovalReport> {
        check_name(name)?;
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Git mirrors reset is already running");
            return Err(MirrorError::ResetInProgress(name.to_string()));
        }
        let _running = RunningGuard(&self.running);

        info!("Start resetting git caches");
        let mut report = RemovalReport::default();
        for (url, mirror) in self.manager.mappings() {
            debug!("Delete of the repository {} ({})", url, mirror.display());
            remove_mirror(&self.manager, self.remover.as_ref(), &mirror, &mut report);
        }

        if report.is_success() {
            info!("Git caches reset, {} mirrors removed", report.removed.len());
        } else {
            warn!(
                "Git caches reset with errors: {} removed, {} failed",
                report.removed.len(),
                report.failed.len()
            );
        }
        Ok(report)
    }

    /// Whether a reset is currently running
    pub fn is_resetting(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn check_name(name: &str) -> MirrorResult<()> {
    if name == GIT_CACHE_NAME {
        Ok(())
    } else {
        Err(MirrorError::UnknownCache(name.to_string()))
    }
}
