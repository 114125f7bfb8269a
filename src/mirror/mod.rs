//! Mirror cache: URL to bare-repository directory mapping
//!
//! Maps arbitrary remote URLs to dedicated directories under one cache root
//! so repeated fetches reuse downloaded objects.
//!
//! # On-disk layout
//!
//! | Path | Contents |
//! |------|----------|
//! | `map` | `url = dirName` lines |
//! | `invalid` | retired directory names, never issued again |
//! | `.locks/` | advisory lock files (`map.lock`, `<dirName>.lock`) |
//! | `git-XXXXXXXX.git/` | a mirror; `timestamp` holds its last use |
//!
//! # Invariants
//!
//! - Two different URLs never resolve to the same live directory, whatever
//!   the hash returns.
//! - An invalidated name is never handed out again, also after a restart.
//! - Deleting a mirror directory requires holding its remove lock.

pub mod cleanup;
pub mod discovery;
pub mod hash;
pub mod locks;
pub mod manager;
pub mod map;

pub use cleanup::{remove_expired, remove_mirror, remove_orphan, DirectoryRemover, FsRemover, RemovalFailure, RemovalReport};
pub use hash::{HashCalculator, Sha256Hash};
pub use locks::{RepositoryLock, RepositoryLockGuard, RepositoryLockRegistry};
pub use manager::{write_timestamp, MirrorManager, TIMESTAMP_FILE};
pub use map::MirrorMap;
