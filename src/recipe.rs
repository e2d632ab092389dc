//! Recipe file support
//!
//! A recipe describes the AppDir to process:
//!
//! ```toml
//! [app_dir]
//! path = "./AppDir"
//!
//! [app_dir.app_info]
//! exec = "usr/bin/app"
//! exec_args = "$@"
//!
//! [app_dir.runtime]
//! version = "continuous"
//! debug = false
//! path_mappings = ["/usr/share/app:$APPDIR/usr/share/app"]
//! preserve = ["usr/share/app/scripts/*"]
//!
//! [app_dir.runtime.env]
//! PYTHONHOME = "$APPDIR/usr"
//! PATH = ["$APPDIR/opt/tool/bin", "$PATH"]
//! ```

use crate::{RuntimeError, RuntimeResult};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default recipe file name
pub const RECIPE_FILE_NAME: &str = "AppImageBuilder.toml";

/// Value of a user environment entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvInput {
    Scalar(String),
    List(Vec<String>),
}

/// `[app_dir.runtime.env]` entries in the order they appear in the recipe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvEntries(Vec<(String, EnvInput)>);

impl EnvEntries {
    pub fn get(&self, key: &str) -> Option<&EnvInput> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EnvInput)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for EnvEntries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

impl<'de> Deserialize<'de> for EnvEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = EnvEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a table of environment variables")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<EnvEntries, A::Error> {
                let mut entries: Vec<(String, EnvInput)> = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, EnvInput>()? {
                    entries.retain(|(k, _)| *k != key);
                    entries.push((key, value));
                }
                Ok(EnvEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Root of a recipe file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub app_dir: AppDirSection,
}

/// `[app_dir]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppDirSection {
    /// AppDir location, relative to the recipe directory unless absolute
    pub path: PathBuf,

    pub app_info: AppInfoSection,

    #[serde(default)]
    pub runtime: RuntimeSection,
}

/// `[app_dir.app_info]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfoSection {
    /// Main executable, relative to the AppDir
    pub exec: String,

    #[serde(default)]
    pub exec_args: Option<String>,
}

/// `[app_dir.runtime]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeSection {
    /// AppRun release to deploy
    #[serde(default)]
    pub version: Option<String>,

    /// Use the debug AppRun build
    #[serde(default)]
    pub debug: bool,

    /// Skip deploying the hook library
    #[serde(default)]
    pub no_hooks: bool,

    /// `host:bundle` path mappings
    #[serde(default)]
    pub path_mappings: Vec<String>,

    /// Globs of files the patcher must leave alone
    #[serde(default)]
    pub preserve: Vec<String>,

    #[serde(default)]
    pub env: EnvEntries,
}

impl Recipe {
    /// Load a recipe from a file
    pub fn from_file(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::InvalidRecipe(format!(
                "Failed to read recipe file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// Parse a recipe from a TOML string
    pub fn parse(content: &str) -> RuntimeResult<Self> {
        let recipe: Recipe = toml::from_str(content)?;
        recipe.validate()?;
        Ok(recipe)
    }

    /// Find a recipe file in a directory
    pub fn find_in_dir(dir: impl AsRef<Path>) -> Option<PathBuf> {
        let dir = dir.as_ref();
        [RECIPE_FILE_NAME, "appimage-builder.toml"]
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Validate the recipe
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.exec().trim().is_empty() {
            return Err(RuntimeError::InvalidRecipe(
                "'exec' must be specified in [app_dir.app_info]".to_string(),
            ));
        }
        if self.app_dir.path.as_os_str().is_empty() {
            return Err(RuntimeError::InvalidRecipe(
                "'path' must be specified in [app_dir]".to_string(),
            ));
        }
        if !self.path_mappings().is_empty() && self.no_hooks() {
            return Err(RuntimeError::PathMappingsWithoutHooks);
        }
        Ok(())
    }

    pub fn app_dir_path(&self) -> &Path {
        &self.app_dir.path
    }

    pub fn exec(&self) -> &str {
        &self.app_dir.app_info.exec
    }

    pub fn exec_args(&self) -> Option<&str> {
        self.app_dir.app_info.exec_args.as_deref()
    }

    pub fn runtime_version(&self) -> Option<&str> {
        self.app_dir.runtime.version.as_deref()
    }

    pub fn runtime_debug(&self) -> bool {
        self.app_dir.runtime.debug
    }

    pub fn runtime_env(&self) -> &EnvEntries {
        &self.app_dir.runtime.env
    }

    pub fn no_hooks(&self) -> bool {
        self.app_dir.runtime.no_hooks
    }

    pub fn path_mappings(&self) -> &[String] {
        &self.app_dir.runtime.path_mappings
    }

    pub fn preserve(&self) -> &[String] {
        &self.app_dir.runtime.preserve
    }
}
