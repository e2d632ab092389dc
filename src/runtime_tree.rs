//! `runtime/default` and `runtime/compat` symlink trees
//!
//! Patched scripts name their interpreter relative to the working
//! directory, and the launcher chdirs into one of these trees before
//! running them. Each tree mirrors the interpreter paths with symlinks:
//! into the bundle when the interpreter is shipped, to the host otherwise.

use crate::RuntimeResult;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

/// Relative symlink target reaching a bundled interpreter from
/// `runtime/<tree>/<interp>`
pub fn bundled_link_target(interp: &str) -> String {
    let depth = interp.matches('/').count() + 2;
    format!("{}{}", "../".repeat(depth), interp)
}

/// The two runtime trees of an AppDir
#[derive(Debug, Clone)]
pub struct RuntimeTrees {
    appdir: PathBuf,
    default: PathBuf,
    compat: PathBuf,
}

impl RuntimeTrees {
    pub fn new(appdir: impl Into<PathBuf>) -> Self {
        let appdir = appdir.into();
        let runtime = appdir.join("runtime");
        Self {
            default: runtime.join("default"),
            compat: runtime.join("compat"),
            appdir,
        }
    }

    pub fn default_dir(&self) -> &Path {
        &self.default
    }

    pub fn compat_dir(&self) -> &Path {
        &self.compat
    }

    /// Link an interpreter (bundle relative, e.g. `usr/bin/python3`) into
    /// both trees, replacing existing links. Returns the link target.
    pub fn link_interpreter(&self, interp: &str) -> RuntimeResult<String> {
        let bundled = fs::symlink_metadata(self.appdir.join(interp)).is_ok();
        let target = if bundled {
            bundled_link_target(interp)
        } else {
            tracing::warn!(
                "Interpreter /{} is not bundled, executables using it will not run on systems without it",
                interp
            );
            format!("/{}", interp)
        };

        for tree in [&self.compat, &self.default] {
            let link = tree.join(interp);
            if fs::symlink_metadata(&link).is_ok() {
                fs::remove_file(&link)?;
            }
            create_link(&target, &link)?;
        }
        tracing::debug!("Linked interpreter {} -> {}", interp, target);
        Ok(target)
    }

    /// Point the default tree at the host dynamic loaders. Existing entries
    /// are left in place; returns how many links were created.
    pub fn seed_default_runtime(&self, linker_paths: &[&str]) -> RuntimeResult<usize> {
        let mut created = 0;
        for ld in linker_paths {
            let ld = ld.trim_start_matches('/');
            if ld.is_empty() {
                continue;
            }
            let link = self.default.join(ld);
            if fs::symlink_metadata(&link).is_ok() {
                continue;
            }
            create_link(&format!("/{}", ld), &link)?;
            created += 1;
        }
        Ok(created)
    }
}

fn create_link(target: &str, link: &Path) -> RuntimeResult<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    symlink(target, link)?;
    Ok(())
}
