//! Mirror cache facade
//!
//! Resolves repository URLs to mirror directories under one cache root,
//! allocating and persisting new mappings on demand.

use super::discovery::{find_repository_dirs, remote_url};
use super::hash::{HashCalculator, Sha256Hash};
use super::locks::{FileLock, RepositoryLockRegistry, LOCKS_DIR};
use super::map::{is_valid_dir_name, MirrorMap};
use crate::error::{MirrorError, MirrorResult};
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Last-used timestamp file inside each mirror, epoch milliseconds
pub const TIMESTAMP_FILE: &str = "timestamp";

const MAP_LOCK_FILE: &str = "map.lock";

/// Cache of bare mirrors rooted at one directory
///
/// Mutations are serialized within the process by an internal mutex and
/// across processes by a file lock on `<root>/.locks/map.lock`. The map
/// files are re-read before every lookup and every mutation, so managers in
/// other processes (or other managers on the same root) are always seen.
pub struct MirrorManager {
    base_dir: PathBuf,
    map: Mutex<MirrorMap>,
    hash: Box<dyn HashCalculator>,
    locks: Arc<RepositoryLockRegistry>,
}

impl MirrorManager {
    /// Open the cache at `base_dir` with the default hash
    pub fn open(base_dir: impl Into<PathBuf>) -> MirrorResult<Self> {
        Self::with_hash(base_dir, Box::new(Sha256Hash))
    }

    /// Open the cache at `base_dir` with a custom hash
    ///
    /// Creates the directory if needed. When no map file exists yet, every
    /// bare repository already present is adopted under its current name.
    pub fn with_hash(base_dir: impl Into<PathBuf>, hash: Box<dyn HashCalculator>) -> MirrorResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|e| {
            MirrorError::io(format!("creating mirrors dir {}", base_dir.display()), e)
        })?;

        let manager = Self {
            map: Mutex::new(MirrorMap::new()),
            hash,
            locks: RepositoryLockRegistry::global(),
            base_dir,
        };

        {
            let mut map = manager.map.lock();
            let _file_lock = manager.lock_map_file()?;
            let loaded = MirrorMap::load(&manager.base_dir);
            *map = loaded.map;

            if !loaded.map_file_found {
                info!(
                    "No mapping file found in {}, restore mapping from existing repositories",
                    manager.base_dir.display()
                );
            }
            let adopted = adopt_existing(&manager.base_dir, &mut map);
            if !loaded.map_file_found || adopted > 0 {
                if let Err(e) = map.save(&manager.base_dir) {
                    warn!("Cannot write restored mapping: {}", e);
                }
            }
        }

        Ok(manager)
    }

    /// Use a specific lock registry instead of the process-wide one
    pub fn with_locks(mut self, locks: Arc<RepositoryLockRegistry>) -> Self {
        self.locks = locks;
        self
    }

    /// Cache root
    pub fn base_mirrors_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Remove locks for this cache's mirrors
    pub fn locks(&self) -> &Arc<RepositoryLockRegistry> {
        &self.locks
    }

    /// Mirror directory for `url`, allocating one if the URL is new
    ///
    /// The mapping is on disk before the path is returned, and the use is
    /// recorded on a best-effort basis. Repeated calls return the same
    /// directory until it is invalidated.
    pub fn resolve(&self, url: &str) -> MirrorResult<PathBuf> {
        let dir = self.mirror_dir(url)?;
        self.touch(&dir);
        Ok(dir)
    }

    /// Like [`resolve`](Self::resolve) but without recording a use
    pub fn mirror_dir(&self, url: &str) -> MirrorResult<PathBuf> {
        let mut map = self.map.lock();
        {
            let _shared = self.lock_map_file_shared()?;
            self.reload(&mut map);
        }
        if let Some(name) = map.get(url) {
            return Ok(self.base_dir.join(name));
        }

        let _file_lock = self.lock_map_file()?;
        self.reload(&mut map);
        if let Some(name) = map.get(url) {
            return Ok(self.base_dir.join(name));
        }

        let hash = self.hash.hash(url);
        let name = map.allocate(url, hash, |n| self.base_dir.join(n).exists());
        if let Err(e) = map.save(&self.base_dir) {
            map.remove(&name);
            return Err(e);
        }

        info!("Allocated mirror {} for {}", name, url);
        Ok(self.base_dir.join(name))
    }

    /// Record a use of the mirror mapped to `url`
    ///
    /// Best effort: failures are logged, never returned.
    pub fn record_use(&self, url: &str) {
        let name = self.current_map().get(url).map(str::to_string);
        match name {
            Some(name) => self.touch(&self.base_dir.join(name)),
            None => debug!("No mirror for {}, skip recording use", url),
        }
    }

    fn touch(&self, dir: &Path) {
        let lock = self.locks.lock_for(dir);
        let result = lock.lock().and_then(|_guard| {
            write_timestamp(dir, Utc::now())
                .map_err(|e| MirrorError::io(format!("updating timestamp in {}", dir.display()), e))
        });
        if let Err(e) = result {
            warn!("Error while updating timestamp in {}: {}", dir.display(), e);
        }
    }

    /// Retire the name of `dir` so it is never issued again
    ///
    /// The owning URL gets a fresh directory on its next resolve. Deleting
    /// the old directory is the caller's job.
    pub fn invalidate(&self, dir: &Path) -> MirrorResult<()> {
        let name = self.dir_name(dir)?;
        let mut map = self.map.lock();
        let _file_lock = self.lock_map_file()?;
        self.reload(&mut map);

        let url = map.invalidate(&name);
        map.save(&self.base_dir)?;
        match url {
            Some(url) => info!("Invalidated mirror {} of {}", name, url),
            None => info!("Invalidated unmapped mirror {}", name),
        }
        Ok(())
    }

    /// Drop the mapping for `dir` without retiring its name
    ///
    /// Used once the directory is gone. Returns the URL it was mapped to.
    pub fn forget_mirror_dir(&self, dir: &Path) -> MirrorResult<Option<String>> {
        let name = self.dir_name(dir)?;
        let mut map = self.map.lock();
        let _file_lock = self.lock_map_file()?;
        self.reload(&mut map);

        let url = map.remove(&name);
        if url.is_some() {
            map.save(&self.base_dir)?;
            debug!("Removed mirror {} from the list of mirrors", name);
        }
        Ok(url)
    }

    /// Snapshot of live mappings, url -> directory
    pub fn mappings(&self) -> BTreeMap<String, PathBuf> {
        self.current_map()
            .entries()
            .map(|(url, name)| (url.to_string(), self.base_dir.join(name)))
            .collect()
    }

    /// URL mapped to a directory name
    pub fn url_for_dir_name(&self, dir_name: &str) -> Option<String> {
        self.current_map().url_for(dir_name).map(str::to_string)
    }

    /// Whether a directory name is mapped to a URL and not invalidated
    ///
    /// Both checks run against the same fresh read of the map files.
    pub fn is_live_dir_name(&self, dir_name: &str) -> bool {
        let map = self.current_map();
        !map.is_invalid(dir_name) && map.url_for(dir_name).is_some()
    }

    /// Whether a directory name has been invalidated
    pub fn is_invalid_dir_name(&self, dir_name: &str) -> bool {
        self.current_map().is_invalid(dir_name)
    }

    /// When the mirror at `dir` was last used
    ///
    /// Falls back to the directory's modification time when no timestamp was
    /// recorded; absent when the directory does not exist.
    pub fn last_used_time(&self, dir: &Path) -> Option<DateTime<Utc>> {
        read_last_used(dir)
    }

    /// Mirror directories present under the cache root, sorted
    pub fn dirs_on_disk(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list {}: {}", self.base_dir.display(), e);
                return Vec::new();
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter(|e| is_valid_dir_name(&e.file_name().to_string_lossy()))
            .map(|e| e.path())
            .collect();
        dirs.sort();
        dirs
    }

    /// Mirror directories not used for longer than `timeout`
    pub fn expired_dirs(&self, timeout: Duration) -> Vec<PathBuf> {
        let cutoff = Utc::now() - timeout;
        self.dirs_on_disk()
            .into_iter()
            .filter(|dir| read_last_used(dir).is_some_and(|t| t < cutoff))
            .collect()
    }

    /// Name of a direct child of the cache root
    pub fn dir_name(&self, dir: &Path) -> MirrorResult<String> {
        let not_a_mirror = || MirrorError::NotAMirror {
            dir: dir.to_path_buf(),
            root: self.base_dir.clone(),
        };

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| is_valid_dir_name(n))
            .ok_or_else(not_a_mirror)?;
        let parent = dir.parent().ok_or_else(not_a_mirror)?;

        let same_root = parent == self.base_dir
            || match (parent.canonicalize(), self.base_dir.canonicalize()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            };
        if same_root {
            Ok(name)
        } else {
            Err(not_a_mirror())
        }
    }

    fn lock_map_file(&self) -> MirrorResult<FileLock> {
        FileLock::acquire(&self.base_dir.join(LOCKS_DIR).join(MAP_LOCK_FILE))
    }

    fn lock_map_file_shared(&self) -> MirrorResult<FileLock> {
        FileLock::acquire_shared(&self.base_dir.join(LOCKS_DIR).join(MAP_LOCK_FILE))
    }

    /// The map as currently persisted
    ///
    /// Falls back to the last loaded state when the map lock is unavailable.
    fn current_map(&self) -> MutexGuard<'_, MirrorMap> {
        let mut map = self.map.lock();
        match self.lock_map_file_shared() {
            Ok(_shared) => self.reload(&mut map),
            Err(e) => warn!("Cannot lock mirror map, using last loaded state: {}", e),
        }
        map
    }

    /// Pick up changes other processes wrote since the last read
    fn reload(&self, map: &mut MirrorMap) {
        let loaded = MirrorMap::load(&self.base_dir);
        if loaded.map_file_found {
            map.refresh_from(loaded.map);
        } else {
            map.extend_invalid(&loaded.map);
        }
    }
}

/// Adopt bare repositories that are on disk but not in the map
fn adopt_existing(base_dir: &Path, map: &mut MirrorMap) -> usize {
    let mut adopted = 0;
    for dir in find_repository_dirs(base_dir) {
        let Some(name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if !is_valid_dir_name(&name) || map.is_invalid(&name) || map.url_for(&name).is_some() {
            continue;
        }

        let Some(url) = remote_url(&dir) else {
            warn!("Cannot retrieve remote repository url for {}, skip it", name);
            continue;
        };
        if map.get(&url).is_some() {
            warn!("Skip {}: {} already has a mirror", name, url);
            continue;
        }
        if map.insert(&url, &name) {
            info!("Restored mapping {} = {}", url, name);
            adopted += 1;
        }
    }
    if adopted > 0 {
        info!("{} existing repositories adopted", adopted);
    }
    adopted
}

/// Write a last-used timestamp into `dir`, creating it if needed
pub fn write_timestamp(dir: &Path, at: DateTime<Utc>) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(TIMESTAMP_FILE), at.timestamp_millis().to_string())
}

fn read_last_used(dir: &Path) -> Option<DateTime<Utc>> {
    let recorded = fs::read_to_string(dir.join(TIMESTAMP_FILE))
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
    if recorded.is_some() {
        return recorded;
    }

    fs::metadata(dir)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .ok()
}
