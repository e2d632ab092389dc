//! Prebuilt launcher (`AppRun`) and hook library resolution

use crate::downloader::Downloader;
use crate::executables::Architecture;
use crate::{RuntimeError, RuntimeResult};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the launcher binary
pub const APPRUN_FILE_NAME: &str = "AppRun";

/// File name of the hook library
pub const HOOKS_FILE_NAME: &str = "libapprun_hooks.so";

const RELEASES_URL: &str = "https://github.com/AppImageCrafters/AppRun/releases/download";

/// Locates the launcher and hook binaries for an architecture
pub trait RuntimeBinariesResolver {
    /// Path of the launcher executable
    fn resolve_executable(&self, arch: Architecture) -> RuntimeResult<PathBuf>;

    /// Path of the hook shared library
    fn resolve_hooks_library(&self, arch: Architecture) -> RuntimeResult<PathBuf>;
}

/// Resolver reading binaries from a local directory laid out as
/// `<root>/<arch>/AppRun` and `<root>/<arch>/libapprun_hooks.so`
#[derive(Debug, Clone)]
pub struct LocalBinariesResolver {
    root: PathBuf,
}

impl LocalBinariesResolver {
    /// Create a resolver for a directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn lookup(&self, arch: Architecture, name: &str) -> RuntimeResult<PathBuf> {
        let path = self.root.join(arch.as_str()).join(name);
        if !path.is_file() {
            return Err(RuntimeError::Config(format!(
                "{} for {} not found: {}",
                name,
                arch,
                path.display()
            )));
        }
        Ok(path)
    }
}

impl RuntimeBinariesResolver for LocalBinariesResolver {
    fn resolve_executable(&self, arch: Architecture) -> RuntimeResult<PathBuf> {
        self.lookup(arch, APPRUN_FILE_NAME)
    }

    fn resolve_hooks_library(&self, arch: Architecture) -> RuntimeResult<PathBuf> {
        self.lookup(arch, HOOKS_FILE_NAME)
    }
}

/// Resolver fetching AppRun release archives from GitHub
#[derive(Debug, Clone)]
pub struct AppRunBinariesResolver {
    version: String,
    debug: bool,
    releases_url: String,
    downloader: Downloader,
    checksums: HashMap<Architecture, String>,
}

impl AppRunBinariesResolver {
    /// Create a resolver for a release version (e.g. `continuous`, `v2.0.0`)
    pub fn new(version: impl Into<String>, debug: bool) -> Self {
        Self {
            version: version.into(),
            debug,
            releases_url: RELEASES_URL.to_string(),
            downloader: Downloader::new(default_cache_dir()),
            checksums: HashMap::new(),
        }
    }

    /// Fetch releases from a mirror laid out like the GitHub release
    /// downloads (`<url>/<version>/<asset>`). Plain `http` mirrors also
    /// need a downloader built with `allow_insecure(true)`.
    pub fn with_mirror(mut self, url: impl Into<String>) -> Self {
        self.releases_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Use a custom downloader (cache location, offline mode, checksum
    /// and transport policy)
    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = downloader;
        self
    }

    /// Expected SHA256/SHA512 of the release archive for `arch`
    pub fn with_checksum(mut self, arch: Architecture, checksum: impl Into<String>) -> Self {
        self.checksums.insert(arch, checksum.into());
        self
    }

    fn build_type(&self) -> &'static str {
        if self.debug {
            "Debug"
        } else {
            "Release"
        }
    }

    /// Name of the release asset for an architecture
    pub fn archive_name(&self, arch: Architecture) -> String {
        format!("AppRun-{}-{}.tar.gz", self.build_type(), arch)
    }

    /// Download URL of the release asset for an architecture
    pub fn archive_url(&self, arch: Architecture) -> String {
        format!("{}/{}/{}", self.releases_url, self.version, self.archive_name(arch))
    }

    /// Directory holding the extracted binaries for an architecture
    fn extracted_dir(&self, arch: Architecture) -> PathBuf {
        self.downloader.cache_dir().join(format!(
            "AppRun-{}-{}-{}",
            self.version,
            self.build_type(),
            arch
        ))
    }

    fn ensure_extracted(&self, arch: Architecture) -> RuntimeResult<PathBuf> {
        let dir = self.extracted_dir(arch);
        if dir.join(APPRUN_FILE_NAME).is_file() {
            return Ok(dir);
        }

        let name = format!("{}-{}", self.version, self.archive_name(arch));
        let checksum = self.checksums.get(&arch).map(String::as_str);
        let archive = self.downloader.download(&name, &self.archive_url(arch), checksum)?;

        // stage next to the final location so the rename stays on one filesystem
        let staging = tempfile::tempdir_in(self.downloader.cache_dir())?;
        self.downloader.extract_tar_gz(&archive, staging.path(), 0)?;
        let root = locate_binaries(staging.path()).ok_or_else(|| {
            RuntimeError::Download(format!("{} does not contain {}", name, APPRUN_FILE_NAME))
        })?;

        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::rename(&root, &dir)?;
        tracing::info!("AppRun {} ({}) ready at {}", self.version, arch, dir.display());
        Ok(dir)
    }
}

impl RuntimeBinariesResolver for AppRunBinariesResolver {
    fn resolve_executable(&self, arch: Architecture) -> RuntimeResult<PathBuf> {
        Ok(self.ensure_extracted(arch)?.join(APPRUN_FILE_NAME))
    }

    fn resolve_hooks_library(&self, arch: Architecture) -> RuntimeResult<PathBuf> {
        let path = self.ensure_extracted(arch)?.join(HOOKS_FILE_NAME);
        if !path.is_file() {
            return Err(RuntimeError::Download(format!(
                "{} missing from AppRun {} ({})",
                HOOKS_FILE_NAME, self.version, arch
            )));
        }
        Ok(path)
    }
}

/// Directory inside an extracted archive that holds the launcher
fn locate_binaries(root: &Path) -> Option<PathBuf> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.file_name() == APPRUN_FILE_NAME)
        .and_then(|e| e.path().parent().map(Path::to_path_buf))
}

/// Default cache location for downloaded releases
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("appdir-runtime")
        .join("apprun")
}
