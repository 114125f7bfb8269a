//! Per-repository key/value state file

use crate::error::{MirrorError, MirrorResult};
use crate::persist::{remove_file_if_exists, write_atomic};
use parking_lot::{const_mutex, Mutex};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default state file name inside a repository directory
pub const DEFAULT_STATE_FILE: &str = "gitmirror-state";

const COMMENT_MARKER: char = '#';

/// Serializes read-modify-write cycles within the process
static WRITE_LOCK: Mutex<()> = const_mutex(());

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Comment(String),
    Entry { key: String, value: String },
}

/// Parsed content of a state file
#[derive(Debug, Default, PartialEq, Eq)]
struct StateFile {
    lines: Vec<Line>,
}

impl StateFile {
    /// Parse `key=value` lines; blank and malformed lines are dropped
    fn parse(content: &str) -> Self {
        let mut file = Self::default();
        for raw in content.lines() {
            let raw = raw.trim_end_matches('\r');
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with(COMMENT_MARKER) {
                file.lines.push(Line::Comment(raw.to_string()));
                continue;
            }

            let parsed = line.rfind('=').map(|pos| (line[..pos].trim(), line[pos + 1..].trim()));
            match parsed {
                Some((key, value)) if !key.is_empty() && !value.is_empty() => file.set(key, Some(value)),
                _ => warn!("Skip state line '{}'", raw),
            }
        }
        file
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            Line::Entry { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Set or delete `key`; an existing key keeps its position
    fn set(&mut self, key: &str, value: Option<&str>) {
        let Some(value) = value else {
            self.lines
                .retain(|line| !matches!(line, Line::Entry { key: k, .. } if k == key));
            return;
        };

        for line in &mut self.lines {
            if let Line::Entry { key: k, value: v } = line {
                if k == key {
                    *v = value.to_string();
                    return;
                }
            }
        }
        self.lines.push(Line::Entry {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    fn has_entries(&self) -> bool {
        self.lines.iter().any(|line| matches!(line, Line::Entry { .. }))
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Comment(text) => out.push_str(text),
                Line::Entry { key, value } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(value);
                }
            }
            out.push('\n');
        }
        out
    }
}

/// Integer values stored in a repository directory under one namespace
///
/// Several stores with different namespaces may share the same file. Every
/// write re-reads the file, changes its own key and renames a fresh copy in
/// place, so values written by siblings are kept.
#[derive(Debug, Clone)]
pub struct RepositoryStateStore {
    path: PathBuf,
    namespace: String,
}

impl RepositoryStateStore {
    pub fn new(repo_dir: &Path, namespace: &str) -> Self {
        Self::with_file_name(repo_dir, DEFAULT_STATE_FILE, namespace)
    }

    pub fn with_file_name(repo_dir: &Path, file_name: &str, namespace: &str) -> Self {
        Self {
            path: repo_dir.join(file_name),
            namespace: namespace.to_string(),
        }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `namespace.key`, once both parts are known not to corrupt the file
    ///
    /// A namespace may not contain `.` either, so `a.b` + `c` can never
    /// alias `a` + `b.c`.
    fn full_key(&self, key: &str) -> MirrorResult<String> {
        check_name("namespace", &self.namespace, &['.'])?;
        check_name("key", key, &[])?;
        Ok(format!("{}.{}", self.namespace, key))
    }

    /// Fail unless `key` can be stored in this store
    pub fn check_key(&self, key: &str) -> MirrorResult<()> {
        self.full_key(key).map(|_| ())
    }

    /// Current value of `key`, absent when unset or unreadable
    pub fn read(&self, key: &str) -> Option<i64> {
        let full_key = match self.full_key(key) {
            Ok(full_key) => full_key,
            Err(e) => {
                warn!("{}", e);
                return None;
            }
        };
        let file = match self.load() {
            Ok(file) => file,
            Err(e) => {
                warn!("Cannot read state file {}: {}", self.path.display(), e);
                return None;
            }
        };

        let raw = file.get(&full_key)?;
        match raw.parse::<i64>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Cannot parse value of {} from '{}'", full_key, raw);
                None
            }
        }
    }

    /// Store `value` under `key`; `None` deletes the key
    ///
    /// The file is removed once it holds no entries.
    pub fn write(&self, key: &str, value: Option<i64>) -> MirrorResult<()> {
        let full_key = self.full_key(key)?;
        let _guard = WRITE_LOCK.lock();
        let mut file = self
            .load()
            .map_err(|e| MirrorError::io(format!("reading state file {}", self.path.display()), e))?;

        let rendered = value.map(|v| v.to_string());
        file.set(&full_key, rendered.as_deref());

        if !file.has_entries() {
            debug!("No state left in {}, remove it", self.path.display());
            return remove_file_if_exists(&self.path)
                .map_err(|e| MirrorError::io(format!("removing state file {}", self.path.display()), e));
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| MirrorError::io(format!("creating directory {}", parent.display()), e))?;
        }
        write_atomic(&self.path, &file.render())
            .map_err(|e| MirrorError::io(format!("writing state file {}", self.path.display()), e))?;
        debug!("Stored {} in {}", full_key, self.path.display());
        Ok(())
    }

    fn load(&self) -> io::Result<StateFile> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(StateFile::parse(&content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(StateFile::default()),
            Err(e) => Err(e),
        }
    }
}

fn check_name(what: &'static str, name: &str, also_forbidden: &[char]) -> MirrorResult<()> {
    let invalid = |reason| {
        Err(MirrorError::InvalidStateKey {
            what,
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return invalid("must not be empty");
    }
    if name.trim() != name {
        return invalid("must not start or end with whitespace");
    }
    if name.contains(['=', COMMENT_MARKER, '\n', '\r']) {
        return invalid("must not contain '=', '#' or line breaks");
    }
    if name.contains(also_forbidden) {
        return invalid("must not contain '.'");
    }
    Ok(())
}
