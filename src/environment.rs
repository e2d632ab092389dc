//! Runtime environment model
//!
//! An [`Environment`] is an insertion-ordered set of variables whose values
//! are either a single string or a search-path list. It is built up by the
//! generator and the configuration helpers, then turned into a
//! [`FinalEnvironment`] which is the only form that can be serialized.
//!
//! The serialized form is one variable per line:
//!
//! ```text
//! APPDIR=$ORIGIN/;
//! PATH=$APPDIR/usr/bin:$PATH;
//! ```

use crate::RuntimeResult;
use std::fs;
use std::path::Path;

/// Placeholder the launcher expands to the bundle location at runtime
pub const APPDIR_PLACEHOLDER: &str = "$APPDIR";

/// Variable holding the `host:bundle` path mappings read by the hooks
pub const PATH_MAPPINGS_KEY: &str = "APPDIR_PATH_MAPPINGS";

/// Value of an environment variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    /// Explicitly absent; dropped when the environment is finalized
    Unset,
    /// A single string
    Scalar(String),
    /// An ordered, duplicate free list rendered `:`-joined
    List(Vec<String>),
}

impl EnvValue {
    /// Check whether the value would render as nothing
    pub fn is_empty(&self) -> bool {
        match self {
            EnvValue::Unset => true,
            EnvValue::Scalar(s) => s.is_empty(),
            EnvValue::List(items) => items.iter().all(|i| i.is_empty()),
        }
    }

    /// View the value as a list of entries
    pub fn entries(&self) -> Vec<&str> {
        match self {
            EnvValue::Unset => Vec::new(),
            EnvValue::Scalar(s) => vec![s.as_str()],
            EnvValue::List(items) => items.iter().map(String::as_str).collect(),
        }
    }

    fn render(&self) -> String {
        match self {
            EnvValue::Unset => String::new(),
            EnvValue::Scalar(s) => s.clone(),
            EnvValue::List(items) => items.join(":"),
        }
    }

    fn map_strings(&mut self, mut f: impl FnMut(&str) -> String) {
        match self {
            EnvValue::Unset => {}
            EnvValue::Scalar(s) => *s = f(s),
            EnvValue::List(items) => {
                for item in items.iter_mut() {
                    *item = f(item);
                }
            }
        }
    }
}

fn dedup(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

impl From<&str> for EnvValue {
    fn from(value: &str) -> Self {
        EnvValue::Scalar(value.to_string())
    }
}

impl From<String> for EnvValue {
    fn from(value: String) -> Self {
        EnvValue::Scalar(value)
    }
}

impl From<Vec<String>> for EnvValue {
    fn from(value: Vec<String>) -> Self {
        EnvValue::List(dedup(value))
    }
}

impl From<Vec<&str>> for EnvValue {
    fn from(value: Vec<&str>) -> Self {
        EnvValue::List(dedup(value.into_iter().map(str::to_string)))
    }
}

impl From<Option<String>> for EnvValue {
    fn from(value: Option<String>) -> Self {
        value.map(EnvValue::Scalar).unwrap_or(EnvValue::Unset)
    }
}

/// Mutable, insertion-ordered environment under construction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    entries: Vec<(String, EnvValue)>,
}

impl Environment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an environment from key/value pairs, keeping their order
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<EnvValue>,
    {
        let mut env = Self::new();
        for (key, value) in pairs {
            env.set(key, value);
        }
        env
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    /// Get the value of a variable
    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.position(key).map(|i| &self.entries[i].1)
    }

    /// Check whether a variable is present (even if unset)
    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Set a variable, keeping its original position if it already exists.
    ///
    /// Returns the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<EnvValue>) -> Option<EnvValue> {
        let key = key.into();
        let value = match value.into() {
            EnvValue::List(items) => EnvValue::List(dedup(items)),
            other => other,
        };
        match self.position(&key) {
            Some(i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Append an entry to a list variable, promoting scalars to lists.
    ///
    /// Entries already present are skipped.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        let Some(i) = self.position(&key) else {
            self.entries.push((key, EnvValue::List(vec![value])));
            return;
        };

        let slot = &mut self.entries[i].1;
        *slot = match std::mem::replace(slot, EnvValue::Unset) {
            EnvValue::List(mut items) => {
                if !items.contains(&value) {
                    items.push(value);
                }
                EnvValue::List(items)
            }
            EnvValue::Scalar(current) if !current.is_empty() => {
                EnvValue::List(dedup([current, value]))
            }
            _ => EnvValue::List(vec![value]),
        };
    }

    /// Remove a variable
    pub fn remove(&mut self, key: &str) -> Option<EnvValue> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    /// Merge another environment on top of this one.
    ///
    /// Lists present on both sides are concatenated without duplicates;
    /// every other combination is overwritten by `other`.
    pub fn merge(&mut self, other: &Environment) {
        for (key, value) in &other.entries {
            let Some(i) = self.position(key) else {
                self.entries.push((key.clone(), value.clone()));
                continue;
            };

            let slot = &mut self.entries[i].1;
            match (&mut *slot, value) {
                (EnvValue::List(current), EnvValue::List(extra)) => {
                    for item in extra {
                        if !current.contains(item) {
                            current.push(item.clone());
                        }
                    }
                }
                (current, _) => {
                    if *current != EnvValue::Unset && current != value {
                        tracing::info!("Overriding runtime environment {}", key);
                    }
                    *current = value.clone();
                }
            }
        }
    }

    /// Remove every variable whose value is empty or unset
    pub fn drop_empty_keys(&mut self) {
        self.entries.retain(|(_, v)| !v.is_empty());
    }

    /// Iterate over variables in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EnvValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Variable names in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the environment is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Close the environment for modification, dropping empty keys
    pub fn finalize(mut self) -> FinalEnvironment {
        self.drop_empty_keys();
        FinalEnvironment {
            entries: self.entries,
        }
    }
}

/// Environment after all merges completed, ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalEnvironment {
    entries: Vec<(String, EnvValue)>,
}

impl FinalEnvironment {
    /// Replace the literal build directory with `$APPDIR` in every value.
    ///
    /// The `<build_dir>:$APPDIR` entry of the path mappings is kept verbatim
    /// so caches created at build time still resolve once relocated.
    pub fn substitute_build_dir(mut self, build_dir: &Path) -> Self {
        let build = build_dir.to_string_lossy().to_string();
        if build.is_empty() {
            return self;
        }
        let build_mapping = format!("{}:{}", build, APPDIR_PLACEHOLDER);

        for (key, value) in self.entries.iter_mut() {
            let is_mappings = key == PATH_MAPPINGS_KEY;
            value.map_strings(|s| {
                if is_mappings && s == build_mapping {
                    s.to_string()
                } else {
                    s.replace(&build, APPDIR_PLACEHOLDER)
                }
            });
        }
        self
    }

    /// Get the value of a variable
    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Variable names in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Render as `KEY=value;` lines
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            if value.is_empty() {
                continue;
            }
            out.push_str(key);
            out.push('=');
            out.push_str(&value.render());
            out.push_str(";\n");
        }
        out
    }

    /// Serialize and write to a file
    pub fn write_to(&self, path: &Path) -> RuntimeResult<()> {
        fs::write(path, self.serialize())?;
        tracing::debug!("Wrote runtime environment: {}", path.display());
        Ok(())
    }
}
