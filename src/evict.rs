//! Eviction candidates for the host's disk-space cleaner
//!
//! The evictor does not delete mirrors that are still mapped. It proposes
//! the ones the current job does not reference, with their last-used time,
//! and leaves the decision to the host. Directories that are already
//! retired or unknown to the map are deleted on the spot.

use crate::mirror::discovery::cleanup_enabled;
use crate::mirror::{remove_orphan, DirectoryRemover, FsRemover, MirrorManager, RemovalReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Host service that decides which directories to delete
pub trait CleanerRegistry {
    fn register_candidate(&mut self, dir: &Path, last_used: DateTime<Utc>);
}

/// A directory proposed for eviction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvictionCandidate {
    pub dir: PathBuf,
    pub last_used: DateTime<Utc>,
}

impl CleanerRegistry for Vec<EvictionCandidate> {
    fn register_candidate(&mut self, dir: &Path, last_used: DateTime<Utc>) {
        self.push(EvictionCandidate {
            dir: dir.to_path_buf(),
            last_used,
        });
    }
}

/// Submodule URLs of a repository
pub trait SubmoduleLookup: Send + Sync {
    fn submodules(&self, url: &str) -> Vec<String>;
}

/// Lookup for hosts that do not track submodules
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSubmodules;

impl SubmoduleLookup for NoSubmodules {
    fn submodules(&self, _url: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Source of last-used times
pub trait LastUsedReader: Send + Sync {
    fn last_used(&self, dir: &Path) -> Option<DateTime<Utc>>;
}

impl LastUsedReader for MirrorManager {
    fn last_used(&self, dir: &Path) -> Option<DateTime<Utc>> {
        self.last_used_time(dir)
    }
}

/// What one eviction pass did
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvictionReport {
    /// Mirrors handed to the registry
    pub registered: Vec<PathBuf>,
    /// Mirrors referenced by the job
    pub in_use: Vec<PathBuf>,
    /// Mirrors left alone: cleanup disabled or no readable last-used time
    pub skipped: Vec<PathBuf>,
    /// URLs whose directory had vanished
    pub forgotten: Vec<String>,
    /// Retired or unmapped directories deleted during the pass
    pub orphans: RemovalReport,
}

/// Proposes unused mirrors for eviction
pub struct MirrorEvictor {
    manager: Arc<MirrorManager>,
    submodules: Box<dyn SubmoduleLookup>,
    remover: Box<dyn DirectoryRemover>,
    last_used: Option<Box<dyn LastUsedReader>>,
}

impl MirrorEvictor {
    pub fn new(manager: Arc<MirrorManager>) -> Self {
        Self {
            manager,
            submodules: Box::new(NoSubmodules),
            remover: Box::new(FsRemover),
            last_used: None,
        }
    }

    pub fn with_submodules(mut self, submodules: Box<dyn SubmoduleLookup>) -> Self {
        self.submodules = submodules;
        self
    }

    pub fn with_remover(mut self, remover: Box<dyn DirectoryRemover>) -> Self {
        self.remover = remover;
        self
    }

    /// Read last-used times from `reader` instead of the mirrors' timestamp files
    pub fn with_last_used(mut self, reader: Box<dyn LastUsedReader>) -> Self {
        self.last_used = Some(reader);
        self
    }

    fn last_used(&self, dir: &Path) -> Option<DateTime<Utc>> {
        match &self.last_used {
            Some(reader) => reader.last_used(dir),
            None => self.manager.last_used_time(dir),
        }
    }

    /// Register every mirror not referenced by the current job
    ///
    /// `referenced` holds the job's repository URLs. Their submodules are
    /// kept too. A mirror whose last-used time cannot be read is skipped
    /// without affecting the others.
    pub fn register_candidates<'a, I>(&self, referenced: I, registry: &mut dyn CleanerRegistry) -> EvictionReport
    where
        I: IntoIterator<Item = &'a str>,
    {
        let in_use = self.expand_submodules(referenced);
        let mut report = EvictionReport::default();

        for (url, dir) in self.manager.mappings() {
            if in_use.contains(&url) {
                debug!("Mirror {} of {} is used by the job", dir.display(), url);
                report.in_use.push(dir);
                continue;
            }

            if !dir.is_dir() {
                match self.manager.forget_mirror_dir(&dir) {
                    Ok(_) => {
                        debug!("Mirror {} of {} is gone, forget it", dir.display(), url);
                        report.forgotten.push(url);
                    }
                    Err(e) => warn!("Cannot forget vanished mirror {}: {}", dir.display(), e),
                }
                continue;
            }

            if !cleanup_enabled(&dir) {
                debug!("Cleanup is disabled for {}", dir.display());
                report.skipped.push(dir);
                continue;
            }

            match self.last_used(&dir) {
                Some(last_used) => {
                    registry.register_candidate(&dir, last_used);
                    report.registered.push(dir);
                }
                None => {
                    warn!("Cannot read last used time of {}, skip it", dir.display());
                    report.skipped.push(dir);
                }
            }
        }

        self.remove_orphans(&mut report.orphans);
        info!(
            "Registered {} mirrors for eviction, {} in use",
            report.registered.len(),
            report.in_use.len()
        );
        report
    }

    /// Referenced URLs plus all submodules reachable from them
    fn expand_submodules<'a, I>(&self, referenced: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<String> = referenced.into_iter().map(str::to_string).collect();
        while let Some(url) = queue.pop_front() {
            if !seen.insert(url.clone()) {
                continue;
            }
            for sub in self.submodules.submodules(&url) {
                if !seen.contains(&sub) {
                    queue.push_back(sub);
                }
            }
        }
        seen
    }

    /// Delete directories that are invalidated or belong to no URL
    ///
    /// The map is re-read for every check, so mirrors allocated by other
    /// instances after this pass started are left alone.
    fn remove_orphans(&self, report: &mut RemovalReport) {
        for dir in self.manager.dirs_on_disk() {
            let Ok(name) = self.manager.dir_name(&dir) else {
                continue;
            };
            if self.manager.is_live_dir_name(&name) {
                continue;
            }

            let lock = self.manager.locks().lock_for(&dir);
            let _guard = match lock.lock() {
                Ok(guard) => guard,
                Err(e) => {
                    error!("Cannot lock {}: {}", dir.display(), e);
                    continue;
                }
            };
            // A concurrent resolve may have claimed the name meanwhile
            if self.manager.is_live_dir_name(&name) {
                continue;
            }
            info!("Remove unused mirror dir {}", dir.display());
            remove_orphan(&self.manager, self.remover.as_ref(), &dir, report);
        }
    }
}
