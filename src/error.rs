//! Error types for appdir-runtime

use std::path::PathBuf;
use thiserror::Error;

/// Result type for runtime generation operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur while generating an AppDir runtime
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid recipe file
    #[error("Invalid recipe: {0}")]
    InvalidRecipe(String),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Invalid glob pattern in the recipe
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// Path mappings only work through the runtime hooks
    #[error("Path mappings set without hooks")]
    PathMappingsWithoutHooks,

    /// No binary executable was found in the AppDir
    #[error("Unable to determine the bundle architecture")]
    NoArchitecture,

    /// ELF machine field outside the supported set
    #[error("Unsupported ELF machine {machine:#x} in {}", path.display())]
    UnknownArchitecture { path: PathBuf, machine: u16 },

    /// File without a decodable ELF header
    #[error("Invalid ELF file {}: {reason}", path.display())]
    InvalidElf { path: PathBuf, reason: String },

    /// The configured main executable is not an ELF file
    #[error("Main executable is not an elf executable: {}", .0.display())]
    MainExecutableNotElf(PathBuf),

    /// The dynamic linker dependency lister could not be run
    #[error("Failed to list dependencies of {}: {reason}", path.display())]
    DependencyLister { path: PathBuf, reason: String },

    /// An executable could not be patched
    #[error("Failed to patch {}: {reason}", path.display())]
    Patch { path: PathBuf, reason: String },

    /// Download error
    #[error("Download error: {0}")]
    Download(String),

    /// A configuration helper failed
    #[error("Configuration helper {name} failed: {reason}")]
    Helper { name: String, reason: String },
}
