//! Persistent URL to mirror directory table
//!
//! Two plain-text files live in the cache root:
//!
//! | File | Format |
//! |------|--------|
//! | `map` | one `url = dirName` mapping per line |
//! | `invalid` | one invalidated directory name per line |
//!
//! Both are rewritten atomically on every mutation. The invalid set is
//! written first so a crash between the two writes can only leave a mapping
//! that points at an invalidated name, which loading discards.

use super::hash::candidate_dir_name;
use crate::error::{MirrorError, MirrorResult};
use crate::persist::write_atomic;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, error, warn};

/// Mapping file name inside the cache root
pub const MAP_FILE: &str = "map";

/// Invalidated names file inside the cache root
pub const INVALID_FILE: &str = "invalid";

const SEPARATOR: &str = " = ";

/// In-memory mirror table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorMap {
    /// url -> directory name
    entries: BTreeMap<String, String>,
    invalid: BTreeSet<String>,
}

/// Result of reading the map files from a cache root
#[derive(Debug, Default)]
pub struct LoadedMap {
    pub map: MirrorMap,
    /// False when the map file is missing or unreadable
    pub map_file_found: bool,
}

impl MirrorMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory name for a URL
    pub fn get(&self, url: &str) -> Option<&str> {
        self.entries.get(url).map(String::as_str)
    }

    /// URL owning a live directory name
    pub fn url_for(&self, dir_name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, name)| name.as_str() == dir_name)
            .map(|(url, _)| url.as_str())
    }

    /// Whether a name was invalidated and can never be issued again
    pub fn is_invalid(&self, dir_name: &str) -> bool {
        self.invalid.contains(dir_name)
    }

    /// Live mappings ordered by URL
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(u, d)| (u.as_str(), d.as_str()))
    }

    /// Invalidated names in sorted order
    pub fn invalid_names(&self) -> impl Iterator<Item = &str> {
        self.invalid.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a mapping with a known name
    ///
    /// Refused when the name is invalidated or already owned by another URL.
    pub fn insert(&mut self, url: &str, dir_name: &str) -> bool {
        if self.is_invalid(dir_name) {
            return false;
        }
        match self.url_for(dir_name) {
            Some(owner) if owner != url => false,
            _ => {
                self.entries.insert(url.to_string(), dir_name.to_string());
                true
            }
        }
    }

    /// Allocate a fresh name for `url` and record it
    ///
    /// Walks the collision attempts for `hash` until a name is found that no
    /// live mapping owns, that was never invalidated, and for which
    /// `exists_on_disk` is false.
    pub fn allocate(&mut self, url: &str, hash: u64, exists_on_disk: impl Fn(&str) -> bool) -> String {
        let mut attempt = 0u32;
        let name = loop {
            let candidate = candidate_dir_name(hash, attempt);
            if !self.is_occupied(&candidate, &exists_on_disk) {
                break candidate;
            }
            debug!("Mirror dir name {} is occupied, trying next", candidate);
            attempt += 1;
        };
        self.entries.insert(url.to_string(), name.clone());
        name
    }

    fn is_occupied(&self, name: &str, exists_on_disk: &impl Fn(&str) -> bool) -> bool {
        self.is_invalid(name) || self.url_for(name).is_some() || exists_on_disk(name)
    }

    /// Retire a directory name for good, dropping its mapping
    ///
    /// Returns the URL that owned the name, if any.
    pub fn invalidate(&mut self, dir_name: &str) -> Option<String> {
        let url = self.remove(dir_name);
        self.invalid.insert(dir_name.to_string());
        url
    }

    /// Drop the mapping that owns `dir_name` without retiring the name
    pub fn remove(&mut self, dir_name: &str) -> Option<String> {
        let url = self.url_for(dir_name)?.to_string();
        self.entries.remove(&url);
        Some(url)
    }

    /// Replace live mappings with `other`'s and union the invalid sets
    ///
    /// The invalid set only ever grows.
    pub fn refresh_from(&mut self, other: MirrorMap) {
        self.invalid.extend(other.invalid);
        self.entries = other.entries;
        let invalid = &self.invalid;
        self.entries.retain(|_, name| !invalid.contains(name));
    }

    /// Merge invalidated names from `other`
    pub fn extend_invalid(&mut self, other: &MirrorMap) {
        self.invalid.extend(other.invalid.iter().cloned());
        let invalid = &self.invalid;
        self.entries.retain(|_, name| !invalid.contains(name));
    }

    /// Parse `url = dirName` lines into live mappings
    pub fn parse_mappings(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim_end_matches('\r');
            let Some(idx) = line.rfind(SEPARATOR) else {
                if !line.trim().is_empty() {
                    warn!("Cannot parse mapping '{}', skip it", line);
                }
                continue;
            };

            let url = line[..idx].trim();
            let dir_name = line[idx + SEPARATOR.len()..].trim();
            if url.is_empty() || !is_valid_dir_name(dir_name) {
                warn!("Cannot parse mapping '{}', skip it", line);
                continue;
            }
            if self.is_invalid(dir_name) {
                debug!("Skip mapping {}: {} is invalidated", url, dir_name);
                continue;
            }
            if !self.insert(url, dir_name) {
                error!(
                    "Skip mapping {}: {} is used for url other than {}",
                    line, dir_name, url
                );
            }
        }
    }

    /// Parse invalidated names, one per line
    pub fn parse_invalid(&mut self, content: &str) {
        for line in content.lines() {
            let name = line.trim();
            if name.is_empty() {
                continue;
            }
            if is_valid_dir_name(name) {
                self.invalid.insert(name.to_string());
            } else {
                warn!("Cannot parse invalidated mirror name '{}', skip it", name);
            }
        }
    }

    /// Map file content
    pub fn render_mappings(&self) -> String {
        self.entries
            .iter()
            .map(|(url, dir)| format!("{url}{SEPARATOR}{dir}\n"))
            .collect()
    }

    /// Invalid file content
    pub fn render_invalid(&self) -> String {
        self.invalid.iter().map(|name| format!("{name}\n")).collect()
    }

    /// Read both files from `root`
    ///
    /// Never fails: unreadable files and lines are logged and treated as absent.
    pub fn load(root: &Path) -> LoadedMap {
        let mut map = MirrorMap::new();

        if let Some(content) = read_optional(&root.join(INVALID_FILE)) {
            map.parse_invalid(&content);
        }

        let map_path = root.join(MAP_FILE);
        let map_file_found = match read_optional(&map_path) {
            Some(content) => {
                map.parse_mappings(&content);
                true
            }
            None => false,
        };

        debug!(
            "Loaded {} mirror mappings and {} invalidated names from {}",
            map.len(),
            map.invalid.len(),
            root.display()
        );
        LoadedMap { map, map_file_found }
    }

    /// Write both files to `root`
    pub fn save(&self, root: &Path) -> MirrorResult<()> {
        let invalid_path = root.join(INVALID_FILE);
        write_atomic(&invalid_path, &self.render_invalid()).map_err(|e| {
            MirrorError::MirrorPersist {
                path: invalid_path.clone(),
                source: e,
            }
        })?;

        let map_path = root.join(MAP_FILE);
        debug!("Save mapping to {}", map_path.display());
        write_atomic(&map_path, &self.render_mappings()).map_err(|e| MirrorError::MirrorPersist {
            path: map_path.clone(),
            source: e,
        })
    }
}

/// A name that can safely be joined onto the cache root
pub fn is_valid_dir_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
}

fn read_optional(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            error!(
                "Error while reading {}, starting without it: {}",
                path.display(),
                e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn nothing_on_disk(_: &str) -> bool {
        false
    }

    #[test]
    fn allocate_same_hash_gives_distinct_names() {
        let mut map = MirrorMap::new();
        let a = map.allocate("git://some.org/a.git", 42, nothing_on_disk);
        let b = map.allocate("git://some.org/b.git", 42, nothing_on_disk);
        let c = map.allocate("git://some.org/c.git", 42, nothing_on_disk);

        assert_eq!(a, "git-0000002A.git");
        assert_eq!(b, "git-0000002A-1.git");
        assert_eq!(c, "git-0000002A-2.git");
    }

    #[test]
    fn allocate_skips_invalidated_names() {
        let mut map = MirrorMap::new();
        let first = map.allocate("git://some.org/a.git", 42, nothing_on_disk);
        map.invalidate(&first);

        let second = map.allocate("git://some.org/a.git", 42, nothing_on_disk);
        assert_ne!(first, second);
        assert!(map.is_invalid(&first));
        assert_eq!(map.get("git://some.org/a.git"), Some(second.as_str()));
    }

    #[test]
    fn allocate_skips_names_present_on_disk() {
        let mut map = MirrorMap::new();
        let name = map.allocate("git://some.org/a.git", 42, |n| n == "git-0000002A.git");
        assert_eq!(name, "git-0000002A-1.git");
    }

    #[test]
    fn insert_refuses_claimed_and_invalid_names() {
        let mut map = MirrorMap::new();
        assert!(map.insert("u1", "git-1.git"));
        assert!(!map.insert("u2", "git-1.git"));
        map.invalidate("git-2.git");
        assert!(!map.insert("u3", "git-2.git"));
        assert!(map.insert("u1", "git-1.git"));
    }

    #[test]
    fn parse_skips_malformed_lines() {
        let mut map = MirrorMap::new();
        map.parse_mappings(
            "git://a = git-1.git\n\
             garbage line\n\
             \n\
             git://b = ../escape\n\
             git://c = git-1.git\n\
             http://d?x=1 = git-2.git\r\n",
        );

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("git://a"), Some("git-1.git"));
        assert_eq!(map.get("http://d?x=1"), Some("git-2.git"));
        assert!(map.get("git://c").is_none());
    }

    #[test]
    fn refresh_keeps_invalid_names() {
        let mut map = MirrorMap::new();
        map.invalidate("git-1.git");

        let mut disk = MirrorMap::new();
        disk.insert("u1", "git-1.git");
        disk.insert("u2", "git-2.git");
        map.refresh_from(disk);

        assert!(map.is_invalid("git-1.git"));
        assert!(map.get("u1").is_none());
        assert_eq!(map.get("u2"), Some("git-2.git"));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut map = MirrorMap::new();
        map.insert("git://some.org/a.git", "git-1.git");
        map.insert("git://some.org/b.git", "git-2.git");
        map.invalidate("git-2.git");
        map.save(dir.path()).unwrap();

        let loaded = MirrorMap::load(dir.path());
        assert!(loaded.map_file_found);
        assert_eq!(loaded.map, map);
        assert_eq!(
            fs::read_to_string(dir.path().join(MAP_FILE)).unwrap(),
            "git://some.org/a.git = git-1.git\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join(INVALID_FILE)).unwrap(),
            "git-2.git\n"
        );
    }

    #[test]
    fn load_missing_files() {
        let dir = TempDir::new().unwrap();
        let loaded = MirrorMap::load(dir.path());
        assert!(!loaded.map_file_found);
        assert!(loaded.map.is_empty());
    }

    #[test]
    fn load_drops_mapping_to_invalid_name() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MAP_FILE), "git://a = git-1.git\n").unwrap();
        fs::write(dir.path().join(INVALID_FILE), "git-1.git\n").unwrap();

        let loaded = MirrorMap::load(dir.path());
        assert!(loaded.map.get("git://a").is_none());
        assert!(loaded.map.is_invalid("git-1.git"));
    }

    #[test]
    fn valid_dir_names() {
        assert!(is_valid_dir_name("git-0000002A.git"));
        assert!(!is_valid_dir_name(""));
        assert!(!is_valid_dir_name(".."));
        assert!(!is_valid_dir_name(".locks"));
        assert!(!is_valid_dir_name("a/b"));
    }
}
