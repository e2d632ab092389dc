//! Generator configuration
//!
//! [`GeneratorConfig`] is what the runtime generator consumes. It is built
//! either programmatically or from a [`Recipe`].

use crate::environment::{EnvValue, Environment, APPDIR_PLACEHOLDER};
use crate::recipe::{EnvInput, Recipe};
use crate::{RuntimeError, RuntimeResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default launcher release
pub const DEFAULT_RUNTIME_VERSION: &str = "continuous";

/// Default arguments forwarded to the main executable
pub const DEFAULT_EXEC_ARGS: &str = "$@";

/// Variables whose `:`-joined user values are split into lists
const PATH_LIST_KEYS: [&str; 3] = ["PATH", "APPDIR_LIBRARY_PATH", "APPDIR_LIBC_LIBRARY_PATH"];

/// Runtime generation settings
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    appdir: PathBuf,
    exec: String,
    exec_args: String,
    runtime_version: String,
    debug: bool,
    hooks: bool,
    path_mappings: Vec<String>,
    preserve: Vec<String>,
    user_env: Environment,
    lister_timeout: Option<Duration>,
    progress: bool,
}

impl GeneratorConfig {
    /// Create a configuration for an AppDir and its main executable
    /// (relative to the AppDir)
    pub fn new(appdir: impl Into<PathBuf>, exec: impl Into<String>) -> Self {
        Self {
            appdir: appdir.into(),
            exec: exec.into(),
            exec_args: DEFAULT_EXEC_ARGS.to_string(),
            runtime_version: DEFAULT_RUNTIME_VERSION.to_string(),
            debug: false,
            hooks: true,
            path_mappings: Vec::new(),
            preserve: Vec::new(),
            user_env: Environment::new(),
            lister_timeout: None,
            progress: false,
        }
    }

    /// Build a configuration from a recipe; a relative AppDir path is
    /// resolved against `base_dir`
    pub fn from_recipe(recipe: &Recipe, base_dir: &Path) -> RuntimeResult<Self> {
        recipe.validate()?;

        let appdir = if recipe.app_dir_path().is_absolute() {
            recipe.app_dir_path().to_path_buf()
        } else {
            base_dir.join(recipe.app_dir_path())
        };

        let mut config = Self::new(appdir, recipe.exec())
            .with_debug(recipe.runtime_debug())
            .with_hooks(!recipe.no_hooks())
            .with_path_mappings(recipe.path_mappings().to_vec())
            .with_preserve(recipe.preserve().to_vec());
        if let Some(args) = recipe.exec_args() {
            config = config.with_exec_args(args);
        }
        if let Some(version) = recipe.runtime_version() {
            config = config.with_runtime_version(version);
        }
        for (key, value) in recipe.runtime_env().iter() {
            config = match value {
                EnvInput::Scalar(s) => config.with_env_var(key, s.as_str()),
                EnvInput::List(items) => config.with_env_var(key, items.clone()),
            };
        }
        Ok(config)
    }

    pub fn with_appdir(mut self, appdir: impl Into<PathBuf>) -> Self {
        self.appdir = appdir.into();
        self
    }

    pub fn with_exec_args(mut self, args: impl Into<String>) -> Self {
        self.exec_args = args.into();
        self
    }

    pub fn with_runtime_version(mut self, version: impl Into<String>) -> Self {
        self.runtime_version = version.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Enable or disable deployment of the hook library
    pub fn with_hooks(mut self, hooks: bool) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_path_mappings(mut self, mappings: Vec<String>) -> Self {
        self.path_mappings = mappings;
        self
    }

    /// Glob patterns (relative to the AppDir) of files to leave unpatched
    pub fn with_preserve(mut self, patterns: Vec<String>) -> Self {
        self.preserve = patterns;
        self
    }

    /// Add a user environment override
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<EnvValue>) -> Self {
        self.user_env.set(key, value);
        self
    }

    /// Kill dependency lister invocations running longer than `timeout`
    pub fn with_lister_timeout(mut self, timeout: Duration) -> Self {
        self.lister_timeout = Some(timeout);
        self
    }

    /// Show terminal progress while generating
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Check the configuration before any file is touched
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.exec.trim().is_empty() {
            return Err(RuntimeError::Config("main executable not set".to_string()));
        }
        if !self.path_mappings.is_empty() && !self.hooks {
            return Err(RuntimeError::PathMappingsWithoutHooks);
        }
        if !self.appdir.is_dir() {
            return Err(RuntimeError::Config(format!(
                "AppDir not found: {}",
                self.appdir.display()
            )));
        }
        Ok(())
    }

    pub fn appdir(&self) -> &Path {
        &self.appdir
    }

    pub fn exec(&self) -> &str {
        &self.exec
    }

    /// Absolute path of the main executable
    pub fn exec_path(&self) -> PathBuf {
        self.appdir.join(&self.exec)
    }

    pub fn exec_args(&self) -> &str {
        &self.exec_args
    }

    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn hooks_enabled(&self) -> bool {
        self.hooks
    }

    pub fn path_mappings(&self) -> &[String] {
        &self.path_mappings
    }

    pub fn preserve(&self) -> &[String] {
        &self.preserve
    }

    pub fn lister_timeout(&self) -> Option<Duration> {
        self.lister_timeout
    }

    pub fn progress(&self) -> bool {
        self.progress
    }

    /// User overrides with `$APPDIR` expanded to the literal AppDir path
    /// and path-list variables split into lists
    pub fn user_environment(&self) -> Environment {
        let appdir = self.appdir.to_string_lossy();
        let expand = |s: &str| {
            s.replace("${APPDIR}", &appdir)
                .replace(APPDIR_PLACEHOLDER, &appdir)
        };

        let mut env = Environment::new();
        for (key, value) in self.user_env.iter() {
            let value = match value {
                EnvValue::Scalar(s) if PATH_LIST_KEYS.contains(&key) => {
                    EnvValue::from(s.split(':').map(&expand).collect::<Vec<_>>())
                }
                EnvValue::Scalar(s) => EnvValue::Scalar(expand(s)),
                EnvValue::List(items) => {
                    EnvValue::from(items.iter().map(|s| expand(s)).collect::<Vec<_>>())
                }
                EnvValue::Unset => EnvValue::Unset,
            };
            env.set(key, value);
        }
        env
    }
}
