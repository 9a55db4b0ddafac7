//! Workspace directory lifecycle and usage measurement.
//!
//! One exclusively-owned subtree per session under the configured root,
//! named by session id. Only this allocator and the eviction paths ever
//! create or delete these directories.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::StoreError;

#[derive(Debug)]
pub(crate) struct WorkspaceAllocator {
    root: PathBuf,
}

impl WorkspaceAllocator {
    pub(crate) fn new(root: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&root).map_err(|e| StoreError::unavailable(&root, e))?;
        Ok(Self { root })
    }

    pub(crate) fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    /// Create the session's subtree. Idempotent: concurrent creators of the
    /// same id race harmlessly onto the same directory.
    pub(crate) fn create(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        let path = self.path_for(session_id);
        fs::create_dir_all(&path).map_err(|e| StoreError::unavailable(&path, e))?;
        Ok(path)
    }

    /// Remove a session's subtree. Best-effort: a failed removal is logged
    /// and retried implicitly by the next orphan sweep.
    pub(crate) fn remove(&self, path: &Path) {
        if let Err(e) = fs::remove_dir_all(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to remove workspace");
            }
        }
    }

    /// Measure the byte size of a subtree. Unreadable entries count as zero
    /// rather than failing the scan.
    pub(crate) fn scan_usage(&self, path: &Path) -> u64 {
        let mut total = 0u64;
        let mut stack = vec![path.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let Ok(meta) = entry.metadata() else {
                    continue;
                };
                if meta.is_dir() {
                    stack.push(entry.path());
                } else {
                    total += meta.len();
                }
            }
        }
        total
    }

    /// Subtree names currently present under the root, for orphan cleanup.
    pub(crate) fn list_ids(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_measure_subtree() {
        let root = tempfile::tempdir().unwrap();
        let alloc = WorkspaceAllocator::new(root.path().to_path_buf()).unwrap();

        let path = alloc.create("s1").unwrap();
        fs::write(path.join("a.txt"), vec![0u8; 100]).unwrap();
        fs::create_dir(path.join("nested")).unwrap();
        fs::write(path.join("nested/b.txt"), vec![0u8; 50]).unwrap();

        assert_eq!(alloc.scan_usage(&path), 150);
        assert_eq!(alloc.list_ids(), vec!["s1"]);

        alloc.remove(&path);
        assert!(!path.exists());
        assert!(alloc.list_ids().is_empty());
    }

    #[test]
    fn remove_of_missing_path_is_silent() {
        let root = tempfile::tempdir().unwrap();
        let alloc = WorkspaceAllocator::new(root.path().to_path_buf()).unwrap();
        alloc.remove(&alloc.path_for("never-created"));
    }
}
