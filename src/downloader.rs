//! Download and cache management for prebuilt runtime binaries
//!
//! This module provides functionality for:
//! - Downloading release archives over HTTPS
//! - Caching downloaded artifacts
//! - Checksum verification (SHA256/SHA512)
//! - Extraction of tar.gz archives with strip_components support

use crate::error::{RuntimeError, RuntimeResult};
use sha2::{Digest, Sha256, Sha512};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable switching the downloader to cache-only mode
pub const OFFLINE_ENV: &str = "APPDIR_RUNTIME_OFFLINE";

/// Download manager for launcher and hook binaries
#[derive(Debug, Clone)]
pub struct Downloader {
    /// Cache directory for downloaded artifacts
    cache_dir: PathBuf,
    /// Allow insecure HTTP downloads
    allow_insecure: bool,
    /// Require checksum for all downloads
    require_checksum: bool,
    /// Offline mode (only use cache)
    offline: bool,
}

impl Downloader {
    /// Create a new downloader
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            allow_insecure: false,
            require_checksum: false,
            offline: std::env::var(OFFLINE_ENV)
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
        }
    }

    /// Set insecure mode
    pub fn allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure = allow;
        self
    }

    /// Set whether to require checksum
    pub fn require_checksum(mut self, require: bool) -> Self {
        self.require_checksum = require;
        self
    }

    /// Set offline mode
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Download a file with caching and verification
    pub fn download(&self, name: &str, url: &str, checksum: Option<&str>) -> RuntimeResult<PathBuf> {
        info!(
            target: "appdir_runtime::download",
            name = %name,
            url = %url,
            has_checksum = checksum.is_some(),
            offline = self.offline,
            "Starting download"
        );

        if self.offline {
            return self.get_from_cache(name, checksum);
        }

        self.validate_url(url)?;

        if checksum.is_none() && self.require_checksum {
            return Err(RuntimeError::Download(format!(
                "Checksum required but not provided for {}",
                name
            )));
        }

        if let Ok(cached) = self.get_from_cache(name, checksum) {
            info!(
                target: "appdir_runtime::download",
                name = %name,
                path = %cached.display(),
                "Using cached artifact"
            );
            return Ok(cached);
        }

        let content = self.fetch_url(url)?;

        if let Some(expected) = checksum {
            self.verify_checksum(&content, expected)?;
        } else {
            warn!("No checksum provided for {}, skipping verification", name);
        }

        self.save_to_cache(name, &content)?;
        Ok(self.cache_dir.join(name))
    }

    /// Extract a tar.gz archive into `dest`
    pub fn extract_tar_gz(
        &self,
        archive_path: &Path,
        dest: &Path,
        strip_components: usize,
    ) -> RuntimeResult<()> {
        info!(
            "Extracting {} to {} (strip: {})",
            archive_path.display(),
            dest.display(),
            strip_components
        );
        fs::create_dir_all(dest)?;

        let file = fs::File::open(archive_path)?;
        let decoder = flate2::read::GzDecoder::new(file);
        let mut archive = tar::Archive::new(decoder);

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_path_buf();
            if let Some(output_path) = strip_path_components(&path, strip_components) {
                let full_path = dest.join(output_path);
                if let Some(parent) = full_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                entry.unpack(&full_path)?;
            }
        }

        Ok(())
    }

    /// Validate URL against security rules
    fn validate_url(&self, url: &str) -> RuntimeResult<()> {
        let parsed = url::Url::parse(url)
            .map_err(|e| RuntimeError::Download(format!("Invalid URL {}: {}", url, e)))?;

        if !self.allow_insecure && parsed.scheme() != "https" {
            warn!(
                target: "appdir_runtime::security",
                url = %url,
                scheme = %parsed.scheme(),
                "Insecure protocol blocked"
            );
            return Err(RuntimeError::Download(format!(
                "Insecure URL scheme ({}), HTTPS required",
                parsed.scheme()
            )));
        }

        Ok(())
    }

    /// Fetch URL content
    fn fetch_url(&self, url: &str) -> RuntimeResult<Vec<u8>> {
        let response = ureq::get(url)
            .call()
            .map_err(|e| RuntimeError::Download(format!("Failed to download {}: {}", url, e)))?;

        let mut buffer = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut buffer)
            .map_err(|e| RuntimeError::Download(format!("Failed to read response: {}", e)))?;

        debug!("Downloaded {} bytes from {}", buffer.len(), url);
        Ok(buffer)
    }

    /// Verify checksum, picking the algorithm from the digest length
    fn verify_checksum(&self, content: &[u8], expected: &str) -> RuntimeResult<()> {
        let actual = match expected.len() {
            64 => format!("{:x}", Sha256::digest(content)),
            128 => format!("{:x}", Sha512::digest(content)),
            len => {
                return Err(RuntimeError::Download(format!(
                    "Invalid checksum length: {} (expected 64 for SHA256 or 128 for SHA512)",
                    len
                )))
            }
        };

        if !actual.eq_ignore_ascii_case(expected) {
            return Err(RuntimeError::Download(format!(
                "Checksum mismatch:\n  Expected: {}\n  Actual:   {}",
                expected, actual
            )));
        }

        debug!("Checksum verified successfully");
        Ok(())
    }

    /// Get artifact from cache (with optional checksum verification)
    fn get_from_cache(&self, name: &str, checksum: Option<&str>) -> RuntimeResult<PathBuf> {
        let path = self.cache_dir.join(name);
        if !path.exists() {
            return Err(RuntimeError::Download(format!("Cache miss: {}", name)));
        }

        if let Some(expected) = checksum {
            let content = fs::read(&path)?;
            self.verify_checksum(&content, expected)?;
        }

        Ok(path)
    }

    /// Save content to cache
    fn save_to_cache(&self, name: &str, content: &[u8]) -> RuntimeResult<()> {
        fs::create_dir_all(&self.cache_dir)?;
        fs::write(self.cache_dir.join(name), content)?;
        info!("Saved to cache: {} ({} bytes)", name, content.len());
        Ok(())
    }
}

/// Strip N path components from the beginning
fn strip_path_components(path: &Path, n: usize) -> Option<PathBuf> {
    let components: Vec<_> = path.components().skip(n).collect();
    if components.is_empty() {
        None
    } else {
        Some(components.iter().collect())
    }
}
