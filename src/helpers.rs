//! Ecosystem configuration helpers
//!
//! Helpers tune the runtime environment for a library ecosystem (GTK, Qt,
//! Python, ...). They run in a fixed order because later helpers read
//! variables set by earlier ones:
//!
//! 1. GdkPixbuf
//! 2. GLib
//! 3. GStreamer
//! 4. Gtk
//! 5. LibC
//! 6. Java
//! 7. LibGL
//! 8. OpenSSL
//! 9. Python
//! 10. Qt

use crate::environment::Environment;
use crate::finder::Finder;
use crate::preserve::PreserveSet;
use crate::RuntimeResult;
use std::fmt;
use std::path::{Path, PathBuf};

/// Loader paths (relative to the AppDir) read by the launcher
pub const LIBC_LINKER_PATH_KEY: &str = "APPDIR_LIBC_LINKER_PATH";

/// Directories holding the bundled libc
pub const LIBC_LIBRARY_PATH_KEY: &str = "APPDIR_LIBC_LIBRARY_PATH";

/// Helper families, declared in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HelperKind {
    GdkPixbuf,
    GLib,
    GStreamer,
    Gtk,
    LibC,
    Java,
    LibGL,
    OpenSSL,
    Python,
    Qt,
}

impl HelperKind {
    /// Every kind, in execution order
    pub const ORDER: [HelperKind; 10] = [
        HelperKind::GdkPixbuf,
        HelperKind::GLib,
        HelperKind::GStreamer,
        HelperKind::Gtk,
        HelperKind::LibC,
        HelperKind::Java,
        HelperKind::LibGL,
        HelperKind::OpenSSL,
        HelperKind::Python,
        HelperKind::Qt,
    ];

    /// Helper name for logs
    pub fn name(&self) -> &'static str {
        match self {
            HelperKind::GdkPixbuf => "GdkPixbuf",
            HelperKind::GLib => "GLib",
            HelperKind::GStreamer => "GStreamer",
            HelperKind::Gtk => "Gtk",
            HelperKind::LibC => "LibC",
            HelperKind::Java => "Java",
            HelperKind::LibGL => "LibGL",
            HelperKind::OpenSSL => "OpenSSL",
            HelperKind::Python => "Python",
            HelperKind::Qt => "Qt",
        }
    }
}

impl fmt::Display for HelperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A step that adjusts the runtime environment for one ecosystem
pub trait ConfigurationHelper {
    /// Which family this helper belongs to
    fn kind(&self) -> HelperKind;

    /// Mutate the environment; files in `preserve` must be left untouched
    fn configure(&self, env: &mut Environment, preserve: &PreserveSet) -> RuntimeResult<()>;
}

/// Ordered list of configuration helpers
#[derive(Default)]
pub struct HelperPipeline {
    helpers: Vec<Box<dyn ConfigurationHelper>>,
}

impl HelperPipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline with the helpers shipped in this crate
    pub fn with_defaults(appdir: impl Into<PathBuf>, finder: &Finder) -> Self {
        Self::new().register(LibCHelper::new(appdir, finder.clone()))
    }

    /// Add a helper; it runs after every registered helper of an earlier
    /// or equal kind
    pub fn register(mut self, helper: impl ConfigurationHelper + 'static) -> Self {
        let kind = helper.kind();
        let idx = self
            .helpers
            .iter()
            .position(|h| h.kind() > kind)
            .unwrap_or(self.helpers.len());
        self.helpers.insert(idx, Box::new(helper));
        self
    }

    /// Kinds of the registered helpers, in execution order
    pub fn kinds(&self) -> Vec<HelperKind> {
        self.helpers.iter().map(|h| h.kind()).collect()
    }

    /// Number of registered helpers
    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    /// Check if no helper is registered
    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }

    /// Run every helper in order
    pub fn run(&self, env: &mut Environment, preserve: &PreserveSet) -> RuntimeResult<()> {
        for helper in &self.helpers {
            tracing::info!("Running configuration helper: {}", helper.kind());
            helper.configure(env, preserve)?;
        }
        Ok(())
    }
}

/// Exposes a bundled dynamic loader and libc to the launcher
#[derive(Debug, Clone)]
pub struct LibCHelper {
    appdir: PathBuf,
    finder: Finder,
}

impl LibCHelper {
    pub fn new(appdir: impl Into<PathBuf>, finder: Finder) -> Self {
        Self {
            appdir: appdir.into(),
            finder,
        }
    }

    fn is_runtime_path(&self, path: &Path) -> bool {
        path.starts_with(self.appdir.join("runtime"))
    }
}

impl ConfigurationHelper for LibCHelper {
    fn kind(&self) -> HelperKind {
        HelperKind::LibC
    }

    fn configure(&self, env: &mut Environment, _preserve: &PreserveSet) -> RuntimeResult<()> {
        let loaders: Vec<String> = self
            .finder
            .find("ld-linux*.so*", &[Finder::is_file])
            .into_iter()
            .filter(|path| !self.is_runtime_path(path))
            .filter_map(|path| {
                path.strip_prefix(&self.appdir)
                    .ok()
                    .map(|rel| rel.to_string_lossy().to_string())
            })
            .collect();

        if loaders.is_empty() {
            tracing::debug!("No bundled dynamic loader found");
            return Ok(());
        }
        tracing::info!("Bundled dynamic loaders: {:?}", loaders);
        env.set(LIBC_LINKER_PATH_KEY, loaders);

        let libc_dirs: Vec<String> = self
            .finder
            .find_dirs_containing("libc.so.6", &[Finder::is_file], &["*/runtime/*"])
            .into_iter()
            .map(|dir| dir.to_string_lossy().to_string())
            .collect();
        if !libc_dirs.is_empty() {
            env.set(LIBC_LIBRARY_PATH_KEY, libc_dirs);
        }
        Ok(())
    }
}
