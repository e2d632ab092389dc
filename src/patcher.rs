//! Interpreter directive patching
//!
//! Scripts are made relocatable by turning their absolute `#!` interpreter
//! into a path relative to the working directory, e.g.
//! `#!/usr/bin/python3` becomes `#!usr/bin/python3`. The launcher runs
//! programs from inside `runtime/default` (or `runtime/compat`), where the
//! generator places a link for every interpreter recorded here.

use crate::executables::InterpretedExecutable;
use crate::scanner::parse_shebang;
use crate::{RuntimeError, RuntimeResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Executable path to the bundle relative interpreter it runs with
pub type InterpreterUsageMap = BTreeMap<PathBuf, String>;

/// Rewrites interpreter directives and records which interpreters are used
#[derive(Debug, Default)]
pub struct ExecutablesPatcher {
    used_interpreters: InterpreterUsageMap,
}

impl ExecutablesPatcher {
    /// Create a new patcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite the interpreter directive of a script.
    ///
    /// Returns `false` when the file was already patched; the interpreter
    /// is recorded either way.
    pub fn patch_interpreted_executable(
        &mut self,
        executable: &InterpretedExecutable,
    ) -> RuntimeResult<bool> {
        let path = &executable.path;
        let content = fs::read(path)?;
        let line_end = content
            .iter()
            .position(|&b| b == b'\n')
            .unwrap_or(content.len());
        let first_line = String::from_utf8_lossy(&content[..line_end]);

        let (token, _) = parse_shebang(first_line.trim_end()).ok_or_else(|| RuntimeError::Patch {
            path: path.clone(),
            reason: "missing interpreter directive".to_string(),
        })?;

        let interpreter = executable.relative_interpreter();
        let already_patched = !token.starts_with('/');
        if !already_patched {
            let directive = patched_directive(&interpreter, &executable.args);
            let mut updated = directive.into_bytes();
            updated.extend_from_slice(&content[line_end..]);
            write_in_place(path, &updated)?;
            tracing::debug!("Patched interpreter of {}: {}", path.display(), interpreter);
        } else {
            tracing::debug!("Already patched: {}", path.display());
        }

        self.used_interpreters.insert(path.clone(), interpreter);
        Ok(!already_patched)
    }

    /// Interpreters recorded so far
    pub fn used_interpreters(&self) -> &InterpreterUsageMap {
        &self.used_interpreters
    }

    /// Consume the patcher, returning the usage map
    pub fn into_used_interpreters(self) -> InterpreterUsageMap {
        self.used_interpreters
    }
}

fn patched_directive(interpreter: &str, args: &[String]) -> String {
    let mut line = format!("#!{}", interpreter);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Overwrite the file contents, keeping its inode and permissions
fn write_in_place(path: &Path, content: &[u8]) -> RuntimeResult<()> {
    fs::write(path, content).map_err(|e| RuntimeError::Patch {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
