//! Discovery of existing bare repositories under a cache root
//!
//! Used to adopt mirrors created before a map file existed and to read the
//! per-mirror settings stored in each repository's git `config`.

use git2::{Config, ErrorClass, ErrorCode};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File that marks a directory as a bare repository
pub const GIT_CONFIG_FILE: &str = "config";

/// Open the `config` file of a bare repository
///
/// Only that file is read, never the user's or the system's config.
fn open_config(repo_dir: &Path) -> Result<Config, git2::Error> {
    let path = repo_dir.join(GIT_CONFIG_FILE);
    if !path.is_file() {
        return Err(git2::Error::new(
            ErrorCode::NotFound,
            ErrorClass::Config,
            format!("{} does not exist", path.display()),
        ));
    }
    Config::open(&path)
}

/// Remote URL a mirror was cloned from
///
/// Prefers `teamcity.remote`, falls back to `remote.origin.url`.
pub fn remote_url(repo_dir: &Path) -> Option<String> {
    let config = match open_config(repo_dir) {
        Ok(c) => c,
        Err(e) => {
            warn!("Cannot read git config of {}: {}", repo_dir.display(), e.message());
            return None;
        }
    };

    ["teamcity.remote", "remote.origin.url"]
        .into_iter()
        .find_map(|key| config.get_string(key).ok().filter(|url| !url.is_empty()))
}

/// Whether disk-space cleanup may evict this mirror
///
/// Defaults to true when the flag is unset, unparsable or the config is
/// unreadable.
pub fn cleanup_enabled(repo_dir: &Path) -> bool {
    open_config(repo_dir)
        .and_then(|c| c.get_bool("teamcity.freeDiskSpaceCleanupEnabled"))
        .unwrap_or(true)
}

/// Subdirectories of `root` that look like bare repositories, sorted by name
pub fn find_repository_dirs(root: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {}", root.display(), e);
            return Vec::new();
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir() && p.join(GIT_CONFIG_FILE).is_file())
        .collect();
    dirs.sort();
    dirs
}
