//! Per-mirror remove locks
//!
//! Any code that deletes, moves or wholesale overwrites a mirror directory
//! holds the mirror's [`RepositoryLock`] for the duration. Within a process
//! the lock is a reentrant mutex shared through [`RepositoryLockRegistry`];
//! across processes it is an advisory `flock` on
//! `<root>/.locks/<name>.lock`, honoured only by cooperating processes.

use crate::error::{MirrorError, MirrorResult};
use fs2::FileExt;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Directory inside the cache root holding lock files
pub const LOCKS_DIR: &str = ".locks";

/// Advisory lock on a file, released on drop
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
}

impl FileLock {
    /// Block until the exclusive lock on `path` is held
    pub(crate) fn acquire(path: &Path) -> MirrorResult<Self> {
        let file = open_lock_file(path)?;
        file.lock_exclusive().map_err(|e| MirrorError::lock(path, e))?;
        Ok(Self { file })
    }

    /// Block until a shared lock on `path` is held
    ///
    /// Readers share the lock with each other and exclude writers.
    pub(crate) fn acquire_shared(path: &Path) -> MirrorResult<Self> {
        let file = open_lock_file(path)?;
        file.lock_shared().map_err(|e| MirrorError::lock(path, e))?;
        Ok(Self { file })
    }
}

fn open_lock_file(path: &Path) -> MirrorResult<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| MirrorError::lock(path, e))?;
    }

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| MirrorError::lock(path, e))
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[derive(Debug, Default)]
struct Held {
    depth: usize,
    file: Option<FileLock>,
}

/// Remove lock for one mirror directory
#[derive(Debug)]
pub struct RepositoryLock {
    dir: PathBuf,
    lock_file: PathBuf,
    state: ReentrantMutex<RefCell<Held>>,
}

impl RepositoryLock {
    fn new(dir: PathBuf) -> Self {
        let lock_file = lock_file_for(&dir);
        Self {
            dir,
            lock_file,
            state: ReentrantMutex::new(RefCell::new(Held::default())),
        }
    }

    /// Canonical directory this lock guards
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cross-process lock file backing this lock
    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    /// Block until the lock is held by the current thread
    ///
    /// Reentrant: a thread already holding the lock gets a nested guard. The
    /// file lock is taken by the outermost acquisition only.
    pub fn lock(&self) -> MirrorResult<RepositoryLockGuard<'_>> {
        let guard = self.state.lock();
        {
            let mut held = guard.borrow_mut();
            if held.depth == 0 {
                held.file = Some(FileLock::acquire(&self.lock_file)?);
                debug!("Acquired remove lock for {}", self.dir.display());
            }
            held.depth += 1;
        }
        Ok(RepositoryLockGuard { guard })
    }

    /// Whether some thread of this process holds the lock
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }
}

/// Held remove lock; released when dropped
pub struct RepositoryLockGuard<'a> {
    guard: ReentrantMutexGuard<'a, RefCell<Held>>,
}

impl Drop for RepositoryLockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.guard.borrow_mut();
        held.depth -= 1;
        if held.depth == 0 {
            held.file = None;
        }
    }
}

/// Process-wide table of remove locks keyed by canonical directory path
#[derive(Debug, Default)]
pub struct RepositoryLockRegistry {
    locks: Mutex<HashMap<PathBuf, Arc<RepositoryLock>>>,
}

impl RepositoryLockRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by everything in this process
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<RepositoryLockRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Self::new())).clone()
    }

    /// The lock for `dir`; the same path always yields the same lock
    pub fn lock_for(&self, dir: &Path) -> Arc<RepositoryLock> {
        let key = canonical_key(dir);
        self.locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RepositoryLock::new(key)))
            .clone()
    }

    /// Drop the entry for `dir` if nobody outside the registry references it
    pub fn forget(&self, dir: &Path) -> bool {
        let key = canonical_key(dir);
        let mut locks = self.locks.lock();
        match locks.get(&key) {
            Some(lock) if Arc::strong_count(lock) == 1 && !lock.is_locked() => {
                locks.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Number of registered locks
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonical form of a directory that may not exist yet
///
/// Resolves the parent when the directory itself is missing so the key does
/// not change once the directory is created.
fn canonical_key(dir: &Path) -> PathBuf {
    if let Ok(canonical) = dir.canonicalize() {
        return canonical;
    }
    if let (Some(parent), Some(name)) = (dir.parent(), dir.file_name()) {
        if let Ok(parent) = parent.canonicalize() {
            return parent.join(name);
        }
    }
    std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf())
}

fn lock_file_for(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    let parent = dir.parent().unwrap_or(dir);
    parent.join(LOCKS_DIR).join(format!("{name}.lock"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn same_path_same_lock() {
        let dir = TempDir::new().unwrap();
        let registry = RepositoryLockRegistry::new();
        let mirror = dir.path().join("git-1.git");

        let a = registry.lock_for(&mirror);
        let b = registry.lock_for(&dir.path().join("x").join("..").join("git-1.git"));
        fs::create_dir_all(&mirror).unwrap();
        let c = registry.lock_for(&mirror);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn different_paths_different_locks() {
        let dir = TempDir::new().unwrap();
        let registry = RepositoryLockRegistry::new();
        let a = registry.lock_for(&dir.path().join("git-1.git"));
        let b = registry.lock_for(&dir.path().join("git-2.git"));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn lock_is_reentrant() {
        let dir = TempDir::new().unwrap();
        let registry = RepositoryLockRegistry::new();
        let lock = registry.lock_for(&dir.path().join("git-1.git"));

        let outer = lock.lock().unwrap();
        let inner = lock.lock().unwrap();
        drop(inner);
        assert!(lock.is_locked());
        drop(outer);
        assert!(!lock.is_locked());
    }

    #[test]
    fn lock_file_blocks_other_descriptors() {
        let dir = TempDir::new().unwrap();
        let registry = RepositoryLockRegistry::new();
        let lock = registry.lock_for(&dir.path().join("git-1.git"));
        assert_eq!(
            lock.lock_file(),
            dir.path().canonicalize().unwrap().join(LOCKS_DIR).join("git-1.git.lock")
        );

        let guard = lock.lock().unwrap();
        let other = File::open(lock.lock_file()).unwrap();
        assert!(other.try_lock_exclusive().is_err());

        drop(guard);
        assert!(other.try_lock_exclusive().is_ok());
        FileExt::unlock(&other).unwrap();
    }

    #[test]
    fn lock_excludes_other_threads() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(RepositoryLockRegistry::new());
        let mirror = dir.path().join("git-1.git");
        let lock = registry.lock_for(&mirror);
        let entered = Arc::new(AtomicBool::new(false));

        let guard = lock.lock().unwrap();
        let handle = {
            let registry = Arc::clone(&registry);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                let lock = registry.lock_for(&mirror);
                let _guard = lock.lock().unwrap();
                entered.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!entered.load(Ordering::SeqCst));
        drop(guard);
        handle.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn forget_only_unreferenced_locks() {
        let dir = TempDir::new().unwrap();
        let registry = RepositoryLockRegistry::new();
        let mirror = dir.path().join("git-1.git");

        let lock = registry.lock_for(&mirror);
        assert!(!registry.forget(&mirror));
        drop(lock);
        assert!(registry.forget(&mirror));
        assert!(registry.is_empty());
    }

    #[test]
    fn global_registry_is_shared() {
        assert!(Arc::ptr_eq(
            &RepositoryLockRegistry::global(),
            &RepositoryLockRegistry::global()
        ));
    }
}
