//! File discovery inside an AppDir

use crate::elf;
use glob::{MatchOptions, Pattern};
use std::collections::BTreeSet;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Predicate applied to candidate files
pub type FileCheck = fn(&Path) -> bool;

/// Pattern based file finder rooted at the AppDir
#[derive(Debug, Clone)]
pub struct Finder {
    base_path: PathBuf,
}

impl Finder {
    /// Create a finder for a base directory
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Root directory searched by this finder
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Files whose name matches `pattern` and pass every check
    pub fn find(&self, pattern: &str, checks: &[FileCheck]) -> Vec<PathBuf> {
        let Some(pattern) = compile(pattern) else {
            return Vec::new();
        };

        let mut found: Vec<PathBuf> = self
            .walk()
            .filter(|path| name_matches(&pattern, path))
            .filter(|path| checks.iter().all(|check| check(path)))
            .collect();
        found.sort();
        found
    }

    /// Directories containing at least one file matching `pattern` and
    /// passing every check, skipping files or directories that match any
    /// of `excluded_patterns`
    pub fn find_dirs_containing(
        &self,
        pattern: &str,
        file_checks: &[FileCheck],
        excluded_patterns: &[&str],
    ) -> Vec<PathBuf> {
        let Some(pattern) = compile(pattern) else {
            return Vec::new();
        };
        let excluded: Vec<Pattern> = excluded_patterns.iter().filter_map(|p| compile(p)).collect();

        let mut dirs = BTreeSet::new();
        for path in self.walk() {
            let Some(parent) = path.parent() else {
                continue;
            };
            if dirs.contains(parent) || !name_matches(&pattern, &path) {
                continue;
            }
            if is_excluded(&excluded, &path) || is_excluded(&excluded, parent) {
                continue;
            }
            if file_checks.iter().all(|check| check(&path)) {
                dirs.insert(parent.to_path_buf());
            }
        }
        dirs.into_iter().collect()
    }

    fn walk(&self) -> impl Iterator<Item = PathBuf> {
        WalkDir::new(&self.base_path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_type().is_dir())
            .map(|e| e.into_path())
    }

    /// File (or symlink to a file)
    pub fn is_file(path: &Path) -> bool {
        path.is_file()
    }

    /// Regular file that is not a symlink
    pub fn is_regular_file(path: &Path) -> bool {
        path.symlink_metadata()
            .map(|m| m.file_type().is_file())
            .unwrap_or(false)
    }

    /// Executable by anyone
    pub fn is_executable(path: &Path) -> bool {
        path.metadata()
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    /// Starts with the ELF magic bytes
    pub fn is_elf(path: &Path) -> bool {
        elf::has_magic_bytes(path)
    }

    /// ELF shared object
    pub fn is_elf_shared_lib(path: &Path) -> bool {
        elf::is_shared_object(path)
    }
}

fn compile(pattern: &str) -> Option<Pattern> {
    match Pattern::new(pattern) {
        Ok(p) => Some(p),
        Err(e) => {
            tracing::warn!("Ignoring invalid pattern '{}': {}", pattern, e);
            None
        }
    }
}

fn name_matches(pattern: &Pattern, path: &Path) -> bool {
    path.file_name()
        .map(|name| pattern.matches(&name.to_string_lossy()))
        .unwrap_or(false)
}

fn is_excluded(excluded: &[Pattern], path: &Path) -> bool {
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    excluded
        .iter()
        .any(|p| p.matches_path_with(path, options))
}
