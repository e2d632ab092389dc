//! Shared object dependency resolution
//!
//! Runs the dynamic linker dependency lister (`ldd`) over a batch of ELF
//! files and collects the absolute paths of every resolved library.

use crate::{RuntimeError, RuntimeResult};
use rayon::prelude::*;
use regex::Regex;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

/// `<ws>/abs/path<ws>(0xaddress)`; lines for unresolved libraries never
/// carry an absolute path and are skipped
static DEPENDENCY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s(/.*?)\s+\((?:0x)?[0-9a-fA-F]+\)").expect("valid dependency line regex")
});

const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Immutable snapshot of the process environment used for subprocesses
#[derive(Debug, Clone, Default)]
pub struct HostEnvironment {
    vars: Arc<Vec<(OsString, OsString)>>,
}

impl HostEnvironment {
    /// Capture the current process environment
    pub fn capture() -> Self {
        Self::from_vars(std::env::vars_os())
    }

    /// Build a snapshot from explicit variables
    pub fn from_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        Self {
            vars: Arc::new(vars.into_iter().collect()),
        }
    }

    /// Captured variables
    pub fn vars(&self) -> &[(OsString, OsString)] {
        &self.vars
    }
}

/// Result of resolving a batch of files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedDependencies {
    /// Union of every resolved library path
    pub resolved: BTreeSet<PathBuf>,
    /// Inputs given more than once
    pub duplicates: BTreeSet<PathBuf>,
}

/// Resolves shared library dependencies through the dynamic linker
#[derive(Debug, Clone)]
pub struct SharedObjectDependenciesResolver {
    lister: PathBuf,
    extra_library_paths: Vec<PathBuf>,
    host_env: HostEnvironment,
    timeout: Option<Duration>,
}

impl SharedObjectDependenciesResolver {
    /// Create a resolver using `ldd` and the current process environment
    pub fn new() -> Self {
        Self {
            lister: PathBuf::from("ldd"),
            extra_library_paths: Vec::new(),
            host_env: HostEnvironment::capture(),
            timeout: None,
        }
    }

    /// Search these directories before the system ones
    pub fn with_library_paths(mut self, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.extra_library_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Use a different dependency lister executable
    pub fn with_lister(mut self, lister: impl Into<PathBuf>) -> Self {
        self.lister = lister.into();
        self
    }

    /// Run the lister with this environment instead of the captured one
    pub fn with_environment(mut self, env: HostEnvironment) -> Self {
        self.host_env = env;
        self
    }

    /// Kill lister invocations running longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolve the dependencies of every file.
    ///
    /// Each distinct file is listed once; repeated inputs are reported as
    /// duplicates and kept out of the resolved set.
    pub fn resolve(&self, files: &[PathBuf]) -> RuntimeResult<ResolvedDependencies> {
        let mut visited = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        let mut unique = Vec::new();
        for file in files {
            if visited.insert(file.clone()) {
                unique.push(file.clone());
            } else {
                duplicates.insert(file.clone());
            }
        }

        let listings: Vec<RuntimeResult<BTreeSet<PathBuf>>> = unique
            .par_iter()
            .map(|file| self.list_dependencies(file))
            .collect();

        let mut resolved = BTreeSet::new();
        for listing in listings {
            resolved.extend(listing?);
        }
        resolved.retain(|path| !duplicates.contains(path));

        tracing::debug!(
            "Resolved {} dependencies from {} files ({} duplicates)",
            resolved.len(),
            unique.len(),
            duplicates.len()
        );
        Ok(ResolvedDependencies {
            resolved,
            duplicates,
        })
    }

    /// List the resolved dependencies of a single file
    pub fn list_dependencies(&self, file: &Path) -> RuntimeResult<BTreeSet<PathBuf>> {
        let output = self.run_lister(file)?;
        Ok(parse_lister_output(&output))
    }

    /// Drop from `include` every ELF file another included file links to.
    ///
    /// The remaining files are the ones that have to be listed explicitly;
    /// the others are pulled in by the linker anyway.
    pub fn filter_linked_libraries(
        &self,
        include: &BTreeSet<PathBuf>,
    ) -> RuntimeResult<BTreeSet<PathBuf>> {
        let so_files: Vec<PathBuf> = include
            .iter()
            .filter(|path| crate::elf::has_magic_bytes(path))
            .cloned()
            .collect();

        let linked = self.resolve(&so_files)?.resolved;
        Ok(include
            .iter()
            .filter(|path| !linked.contains(*path))
            .cloned()
            .collect())
    }

    fn run_lister(&self, file: &Path) -> RuntimeResult<String> {
        let lister_error = |reason: String| RuntimeError::DependencyLister {
            path: file.to_path_buf(),
            reason,
        };

        let mut command = Command::new(&self.lister);
        command
            .arg(file)
            .env_clear()
            .envs(self.host_env.vars().iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if !self.extra_library_paths.is_empty() {
            let joined = std::env::join_paths(&self.extra_library_paths)
                .map_err(|e| lister_error(e.to_string()))?;
            command.env(LIBRARY_PATH_VAR, joined);
        }

        let mut child = command
            .spawn()
            .map_err(|e| lister_error(format!("{}: {}", self.lister.display(), e)))?;

        let Some(timeout) = self.timeout else {
            let output = child
                .wait_with_output()
                .map_err(|e| lister_error(e.to_string()))?;
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        };

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| lister_error("stdout not captured".to_string()))?;
        let reader = std::thread::spawn(move || {
            let mut buffer = Vec::new();
            stdout.read_to_end(&mut buffer).map(|_| buffer)
        });

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait().map_err(|e| lister_error(e.to_string()))? {
                Some(_) => break,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(lister_error(format!("timed out after {:?}", timeout)));
                }
                None => std::thread::sleep(Duration::from_millis(10)),
            }
        }

        let buffer = reader
            .join()
            .map_err(|_| lister_error("output reader panicked".to_string()))?
            .map_err(|e| lister_error(e.to_string()))?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}

impl Default for SharedObjectDependenciesResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the absolute library paths from dependency lister output
pub fn parse_lister_output(output: &str) -> BTreeSet<PathBuf> {
    output
        .lines()
        .filter_map(|line| DEPENDENCY_LINE.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| PathBuf::from(m.as_str()))
        .collect()
}
