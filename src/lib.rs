//! AppDir Runtime - Relocatable Linux Application Bundles
//!
//! This crate turns an AppDir (a directory tree of installed application
//! files) into a self-contained bundle that runs from any location, using
//! the libraries and interpreters shipped inside it instead of the host's.
//!
//! # What a run does
//!
//! 1. Builds the runtime environment: XDG directories, the bundle library
//!    and executable search paths, ecosystem helper settings and user
//!    overrides
//! 2. Finds every executable and classifies it as an ELF binary or a
//!    script with an interpreter directive
//! 3. Deploys the `libapprun_hooks.so` hook library for each detected
//!    architecture
//! 4. Rewrites script directives to relative paths (`#!/bin/sh` becomes
//!    `#!bin/sh`) and mirrors the interpreters into the `runtime/default`
//!    and `runtime/compat` symlink trees
//! 5. Writes `AppRun.env` and deploys the `AppRun` launcher
//!
//! # Quick Start
//!
//! ```no_run
//! use appdir_runtime::{AppRunBinariesResolver, GeneratorConfig, RuntimeGenerator};
//!
//! let config = GeneratorConfig::new("./AppDir", "usr/bin/app")
//!     .with_env_var("PYTHONHOME", "$APPDIR/usr");
//! let resolver = AppRunBinariesResolver::new("continuous", false);
//!
//! let output = RuntimeGenerator::new(config, resolver)?.generate()?;
//! println!("launcher: {}", output.apprun.display());
//! # Ok::<(), appdir_runtime::RuntimeError>(())
//! ```
//!
//! # Recipe File (AppImageBuilder.toml)
//!
//! ```toml
//! [app_dir]
//! path = "./AppDir"
//!
//! [app_dir.app_info]
//! exec = "usr/bin/app"
//!
//! [app_dir.runtime]
//! version = "continuous"
//! path_mappings = ["/usr/share/app:$APPDIR/usr/share/app"]
//!
//! [app_dir.runtime.env]
//! PATH = "$APPDIR/opt/bin:$PATH"
//! ```
//!
//! # Environment File Format
//!
//! ```text
//! APPDIR=$ORIGIN/;
//! APPIMAGE_UUID=aB3dE5f;
//! APPDIR_EXEC_PATH=$APPDIR/usr/bin/app;
//! APPDIR_EXEC_ARGS=$@;
//! PATH=$APPDIR/usr/bin:$PATH;
//! ```

mod binaries;
mod config;
mod dependencies;
mod downloader;
mod elf;
mod environment;
mod error;
mod executables;
mod finder;
mod generator;
mod helpers;
mod identifier;
mod patcher;
mod preserve;
pub mod progress;
mod recipe;
mod runtime_tree;
mod scanner;

pub use binaries::{
    default_cache_dir, AppRunBinariesResolver, LocalBinariesResolver, RuntimeBinariesResolver,
    APPRUN_FILE_NAME, HOOKS_FILE_NAME,
};
pub use config::{GeneratorConfig, DEFAULT_EXEC_ARGS, DEFAULT_RUNTIME_VERSION};
pub use dependencies::{
    parse_lister_output, HostEnvironment, ResolvedDependencies, SharedObjectDependenciesResolver,
};
pub use downloader::{Downloader, OFFLINE_ENV};
pub use elf::{architecture as elf_architecture, has_magic_bytes, is_shared_object};
pub use environment::{
    EnvValue, Environment, FinalEnvironment, APPDIR_PLACEHOLDER, PATH_MAPPINGS_KEY,
};
pub use error::{RuntimeError, RuntimeResult};
pub use executables::{Architecture, BinaryExecutable, Executable, InterpretedExecutable};
pub use finder::{FileCheck, Finder};
pub use generator::{
    GenerationStage, RuntimeGenerator, RuntimeOutput, ENV_FILE_NAME, LIBRARY_PATH_KEY,
};
pub use helpers::{
    ConfigurationHelper, HelperKind, HelperPipeline, LibCHelper, LIBC_LIBRARY_PATH_KEY,
    LIBC_LINKER_PATH_KEY,
};
pub use identifier::{BundleIdGenerator, FixedBundleId, RandomBundleId, BUNDLE_ID_LENGTH};
pub use patcher::{ExecutablesPatcher, InterpreterUsageMap};
pub use preserve::PreserveSet;
pub use progress::{GenerationProgress, ProgressExt, ProgressStyles};
pub use recipe::{
    AppDirSection, AppInfoSection, EnvEntries, EnvInput, Recipe, RuntimeSection, RECIPE_FILE_NAME,
};
pub use runtime_tree::{bundled_link_target, RuntimeTrees};
pub use scanner::{determine_architectures, ExecutablesScanner};

/// Version of appdir-runtime
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
