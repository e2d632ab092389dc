//! Files exempt from interpreter patching

use crate::RuntimeResult;
use std::collections::HashSet;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Set of files matched by the recipe's preserve patterns.
///
/// Membership is decided by file identity (device and inode), so a
/// symlink or hardlink to a preserved file is preserved too.
#[derive(Debug, Clone, Default)]
pub struct PreserveSet {
    files: Vec<PathBuf>,
    ids: HashSet<(u64, u64)>,
}

impl PreserveSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Expand glob patterns against each base path.
    ///
    /// Matched directories contribute every file below them.
    pub fn expand(patterns: &[String], base_paths: &[PathBuf]) -> RuntimeResult<Self> {
        let mut set = Self::new();
        for pattern in patterns {
            let pattern = pattern.trim_start_matches('/');
            for base in base_paths {
                let full = base.join(pattern);
                for entry in glob::glob(&full.to_string_lossy())? {
                    let Ok(matched) = entry else {
                        continue;
                    };
                    if matched.is_dir() {
                        for file in WalkDir::new(&matched)
                            .min_depth(1)
                            .into_iter()
                            .filter_map(|e| e.ok())
                        {
                            set.insert(file.into_path());
                        }
                    } else {
                        set.insert(matched);
                    }
                }
            }
        }
        tracing::debug!("Preserving {} files from patching", set.len());
        Ok(set)
    }

    /// Add a file to the set
    pub fn insert(&mut self, path: PathBuf) {
        if let Some(id) = file_id(&path) {
            self.ids.insert(id);
        }
        self.files.push(path);
    }

    /// Check whether `path` refers to a preserved file
    pub fn contains(&self, path: &Path) -> bool {
        file_id(path).is_some_and(|id| self.ids.contains(&id))
    }

    /// Preserved file paths, as matched
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Number of matched paths
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if nothing is preserved
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn file_id(path: &Path) -> Option<(u64, u64)> {
    path.metadata().ok().map(|m| (m.dev(), m.ino()))
}
