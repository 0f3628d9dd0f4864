// ABOUTME: SpoolStore is the directory-backed persistent store that holds the record log.
// ABOUTME: Answers space-usage (used/total) and directory-listing queries for operational reports.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::log::PersistentLog;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Space usage of the store against its nominal capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl StoreUsage {
    /// Used space as a whole percentage of capacity (0 when capacity is 0).
    pub fn percent_used(&self) -> u64 {
        if self.total_bytes == 0 {
            return 0;
        }
        self.used_bytes.saturating_mul(100) / self.total_bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

/// One entry of a store listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreEntry {
    pub name: String,
    pub kind: EntryKind,
    /// Size in bytes for regular files; `None` when unknown or not a file.
    pub size: Option<u64>,
}

/// A mounted store rooted at a directory, with a nominal capacity used for
/// usage reporting (the medium itself is not queried).
#[derive(Debug, Clone)]
pub struct SpoolStore {
    root: PathBuf,
    capacity_bytes: u64,
}

impl SpoolStore {
    /// Mount the store at `root`, creating the directory if it does not exist.
    pub fn open(root: PathBuf, capacity_bytes: u64) -> Result<Self, StoreError> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            capacity_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// The log stored under `name` in this store (not created).
    pub fn log(&self, name: &str) -> PersistentLog {
        PersistentLog::new(self.root.join(name))
    }

    /// Sum the sizes of all regular files under the store root.
    pub fn usage(&self) -> Result<StoreUsage, StoreError> {
        Ok(StoreUsage {
            total_bytes: self.capacity_bytes,
            used_bytes: dir_size(&self.root)?,
        })
    }

    /// List the top-level entries of the store, sorted by name.
    pub fn list(&self) -> Result<Vec<StoreEntry>, StoreError> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let (kind, size) = match entry.file_type() {
                Ok(t) if t.is_dir() => (EntryKind::Dir, None),
                Ok(t) if t.is_file() => (EntryKind::File, entry.metadata().ok().map(|m| m.len())),
                _ => (EntryKind::Other, None),
            };
            entries.push(StoreEntry { name, kind, size });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Log usage and listing at info level. Failures are logged, not returned.
    pub fn log_report(&self) {
        match self.usage() {
            Ok(usage) => tracing::info!(
                root = %self.root.display(),
                total = usage.total_bytes,
                used = usage.used_bytes,
                percent = usage.percent_used(),
                "store usage"
            ),
            Err(e) => tracing::error!(root = %self.root.display(), error = %e, "failed to read store usage"),
        }

        match self.list() {
            Ok(entries) => {
                for entry in entries {
                    tracing::info!(
                        name = %entry.name,
                        kind = ?entry.kind,
                        size = ?entry.size,
                        "store entry"
                    );
                }
            }
            Err(e) => tracing::error!(root = %self.root.display(), error = %e, "failed to list store"),
        }
    }
}

fn dir_size(dir: &Path) -> Result<u64, std::io::Error> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            total += dir_size(&entry.path())?;
        } else if file_type.is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("spool");
        let store = SpoolStore::open(root.clone(), 1024).unwrap();
        assert!(root.is_dir());
        assert_eq!(store.root(), root);
        assert_eq!(store.capacity_bytes(), 1024);
    }

    #[test]
    fn usage_counts_file_bytes_recursively() {
        let dir = TempDir::new().unwrap();
        let store = SpoolStore::open(dir.path().to_path_buf(), 1000).unwrap();
        fs::write(dir.path().join("log.txt"), vec![b'x'; 150]).unwrap();
        fs::create_dir(dir.path().join("old")).unwrap();
        fs::write(dir.path().join("old").join("log.1"), vec![b'y'; 100]).unwrap();

        let usage = store.usage().unwrap();
        assert_eq!(usage.total_bytes, 1000);
        assert_eq!(usage.used_bytes, 250);
        assert_eq!(usage.percent_used(), 25);
    }

    #[test]
    fn percent_is_zero_for_zero_capacity() {
        let usage = StoreUsage {
            total_bytes: 0,
            used_bytes: 10,
        };
        assert_eq!(usage.percent_used(), 0);
    }

    #[test]
    fn list_reports_kinds_and_sizes_sorted() {
        let dir = TempDir::new().unwrap();
        let store = SpoolStore::open(dir.path().to_path_buf(), 1000).unwrap();
        fs::write(dir.path().join("b.txt"), b"12345").unwrap();
        fs::create_dir(dir.path().join("a_dir")).unwrap();

        let entries = store.list().unwrap();
        assert_eq!(
            entries,
            vec![
                StoreEntry {
                    name: "a_dir".to_string(),
                    kind: EntryKind::Dir,
                    size: None,
                },
                StoreEntry {
                    name: "b.txt".to_string(),
                    kind: EntryKind::File,
                    size: Some(5),
                },
            ]
        );
    }

    #[test]
    fn log_is_placed_under_root() {
        let dir = TempDir::new().unwrap();
        let store = SpoolStore::open(dir.path().to_path_buf(), 1000).unwrap();
        let log = store.log("log.txt");
        assert_eq!(log.path(), dir.path().join("log.txt"));
        assert!(!log.exists());
    }
}
