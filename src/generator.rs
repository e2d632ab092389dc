//! Runtime generation orchestrator
//!
//! [`RuntimeGenerator::generate`] walks a fixed sequence of stages over an
//! AppDir. Any failing stage aborts the run; the AppDir should then be
//! considered unusable and regenerated from a clean copy.

use crate::binaries::{RuntimeBinariesResolver, APPRUN_FILE_NAME, HOOKS_FILE_NAME};
use crate::config::GeneratorConfig;
use crate::dependencies::SharedObjectDependenciesResolver;
use crate::elf;
use crate::environment::{Environment, PATH_MAPPINGS_KEY};
use crate::executables::{Architecture, Executable};
use crate::finder::Finder;
use crate::helpers::{HelperPipeline, LIBC_LINKER_PATH_KEY};
use crate::identifier::{BundleIdGenerator, RandomBundleId};
use crate::patcher::{ExecutablesPatcher, InterpreterUsageMap};
use crate::preserve::PreserveSet;
use crate::progress::{GenerationProgress, ProgressExt};
use crate::runtime_tree::RuntimeTrees;
use crate::scanner::{determine_architectures, ExecutablesScanner};
use crate::{RuntimeError, RuntimeResult};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Name of the environment file written at the AppDir root
pub const ENV_FILE_NAME: &str = "AppRun.env";

/// Library search path read by the launcher
pub const LIBRARY_PATH_KEY: &str = "APPDIR_LIBRARY_PATH";

/// Directories never added to the library search path
const LIBRARY_PATH_EXCLUDES: [&str; 7] = [
    "*/runtime/*",
    "*/qt5/plugins*",
    "*/perl*",
    "*/perl-base*",
    "*/gio/modules",
    "*/gtk-*/modules",
    "*/libgtk-*-0",
];

/// Stages of a generation run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GenerationStage {
    ConfigureEnvironment,
    ScanExecutables,
    DetermineArchitectures,
    DeployHooks,
    PatchInterpreted,
    LinkInterpreters,
    CreateDefaultRuntime,
    WritePathMappings,
    WriteEnvironmentFile,
    DeployLauncher,
}

impl GenerationStage {
    pub const ALL: [GenerationStage; 10] = [
        GenerationStage::ConfigureEnvironment,
        GenerationStage::ScanExecutables,
        GenerationStage::DetermineArchitectures,
        GenerationStage::DeployHooks,
        GenerationStage::PatchInterpreted,
        GenerationStage::LinkInterpreters,
        GenerationStage::CreateDefaultRuntime,
        GenerationStage::WritePathMappings,
        GenerationStage::WriteEnvironmentFile,
        GenerationStage::DeployLauncher,
    ];

    fn description(&self) -> &'static str {
        match self {
            GenerationStage::ConfigureEnvironment => "Configuring runtime environment",
            GenerationStage::ScanExecutables => "Scanning executables",
            GenerationStage::DetermineArchitectures => "Determining bundle architectures",
            GenerationStage::DeployHooks => "Deploying runtime hooks",
            GenerationStage::PatchInterpreted => "Patching interpreted executables",
            GenerationStage::LinkInterpreters => "Linking interpreters",
            GenerationStage::CreateDefaultRuntime => "Creating default runtime",
            GenerationStage::WritePathMappings => "Writing path mappings",
            GenerationStage::WriteEnvironmentFile => "Writing environment file",
            GenerationStage::DeployLauncher => "Deploying launcher",
        }
    }
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// What a successful run produced
#[derive(Debug, Clone)]
pub struct RuntimeOutput {
    /// Deployed launcher
    pub apprun: PathBuf,
    /// Written environment file
    pub env_file: PathBuf,
    /// Architectures of the bundled binaries
    pub architectures: BTreeSet<Architecture>,
    /// Deployed hook libraries, one per architecture
    pub hooks: Vec<PathBuf>,
    /// Script path to the interpreter it runs with
    pub interpreters: InterpreterUsageMap,
}

/// Turns an AppDir into a relocatable bundle
pub struct RuntimeGenerator {
    config: GeneratorConfig,
    finder: Finder,
    trees: RuntimeTrees,
    resolver: Box<dyn RuntimeBinariesResolver>,
    helpers: HelperPipeline,
    bundle_id: Box<dyn BundleIdGenerator>,
}

impl RuntimeGenerator {
    /// Create a generator; the configuration is validated here so no file
    /// is touched when it is inconsistent
    pub fn new(
        config: GeneratorConfig,
        resolver: impl RuntimeBinariesResolver + 'static,
    ) -> RuntimeResult<Self> {
        config.validate()?;
        let appdir = std::path::absolute(config.appdir())?;
        let config = config.with_appdir(&appdir);

        if !config.hooks_enabled() {
            tracing::warn!("Runtime hooks will not be deployed");
        }

        let finder = Finder::new(&appdir);
        Ok(Self {
            helpers: HelperPipeline::with_defaults(&appdir, &finder),
            trees: RuntimeTrees::new(&appdir),
            finder,
            config,
            resolver: Box::new(resolver),
            bundle_id: Box::new(RandomBundleId),
        })
    }

    /// Replace the configuration helpers
    pub fn with_helpers(mut self, helpers: HelperPipeline) -> Self {
        self.helpers = helpers;
        self
    }

    /// Replace the bundle identifier source
    pub fn with_bundle_id(mut self, generator: impl BundleIdGenerator + 'static) -> Self {
        self.bundle_id = Box::new(generator);
        self
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    fn appdir(&self) -> &Path {
        self.config.appdir()
    }

    /// Dependency resolver searching the AppDir library directories first
    pub fn dependency_resolver(&self) -> SharedObjectDependenciesResolver {
        let resolver =
            SharedObjectDependenciesResolver::new().with_library_paths(self.library_paths());
        match self.config.lister_timeout() {
            Some(timeout) => resolver.with_timeout(timeout),
            None => resolver,
        }
    }

    /// Run every stage over the AppDir
    pub fn generate(&self) -> RuntimeResult<RuntimeOutput> {
        let progress = GenerationProgress::new(self.config.progress());
        tracing::info!("Generating runtime for {}", self.appdir().display());

        let preserve = PreserveSet::expand(
            self.config.preserve(),
            &[
                self.appdir().to_path_buf(),
                self.trees.compat_dir().to_path_buf(),
            ],
        )?;

        let mut env = self.run_stage(&progress, GenerationStage::ConfigureEnvironment, || {
            self.configure_environment(&preserve)
        })?;

        let executables = self.run_stage(&progress, GenerationStage::ScanExecutables, || {
            self.find_executables(&progress)
        })?;

        let architectures = self.run_stage(&progress, GenerationStage::DetermineArchitectures, || {
            determine_architectures(&executables)
        })?;
        tracing::info!("Bundle architectures: {:?}", architectures);

        let hooks = if self.config.hooks_enabled() {
            self.run_stage(&progress, GenerationStage::DeployHooks, || {
                self.deploy_hooks(&mut env, &architectures)
            })?
        } else {
            Vec::new()
        };

        let interpreters = self.run_stage(&progress, GenerationStage::PatchInterpreted, || {
            self.patch_interpreted(&executables, &preserve)
        })?;

        let used: BTreeSet<&str> = interpreters.values().map(String::as_str).collect();

        self.run_stage(&progress, GenerationStage::LinkInterpreters, || {
            used.iter()
                .try_for_each(|interp| self.trees.link_interpreter(interp).map(|_| ()))
        })?;

        self.run_stage(&progress, GenerationStage::CreateDefaultRuntime, || {
            self.create_default_runtime(&env)
        })?;

        self.run_stage(&progress, GenerationStage::WritePathMappings, || {
            self.setup_path_mappings(&mut env, &used);
            Ok(())
        })?;

        let env_file = self.run_stage(&progress, GenerationStage::WriteEnvironmentFile, || {
            self.write_environment_file(&env)
        })?;

        let apprun = self.run_stage(&progress, GenerationStage::DeployLauncher, || {
            self.deploy_launcher()
        })?;

        Ok(RuntimeOutput {
            apprun,
            env_file,
            architectures,
            hooks,
            interpreters,
        })
    }

    fn run_stage<T>(
        &self,
        progress: &GenerationProgress,
        stage: GenerationStage,
        f: impl FnOnce() -> RuntimeResult<T>,
    ) -> RuntimeResult<T> {
        tracing::info!("{}", stage);
        let pb = progress.stage(&stage.to_string());
        let result = f();
        if let Some(pb) = pb {
            match &result {
                Ok(_) => pb.finish_success(stage.description()),
                Err(e) => pb.finish_error(&format!("{}: {}", stage, e)),
            }
        }
        result
    }

    fn configure_environment(&self, preserve: &PreserveSet) -> RuntimeResult<Environment> {
        let mut env = Environment::new();
        env.set("APPIMAGE_UUID", self.bundle_id.generate());
        env.set(
            "XDG_DATA_DIRS",
            vec![
                "$APPDIR/usr/local/share",
                "$APPDIR/usr/share",
                "$XDG_DATA_DIRS",
            ],
        );
        env.set("XDG_CONFIG_DIRS", vec!["$APPDIR/etc/xdg", "$XDG_CONFIG_DIRS"]);
        env.set(LIBRARY_PATH_KEY, self.library_paths());

        let mut path = self.bin_paths();
        path.push("$PATH".to_string());
        env.set("PATH", path);

        self.helpers.run(&mut env, preserve)?;

        for (key, value) in self.config.user_environment().iter() {
            if env.contains_key(key) {
                tracing::info!("Overriding runtime environment {}", key);
            }
            env.set(key, value.clone());
        }

        env.set(PATH_MAPPINGS_KEY, self.config.path_mappings().to_vec());
        Ok(env)
    }

    /// Directories holding shared libraries, outside known problematic trees
    fn library_paths(&self) -> Vec<String> {
        self.finder
            .find_dirs_containing(
                "*.so*",
                &[Finder::is_file, Finder::is_elf_shared_lib],
                &LIBRARY_PATH_EXCLUDES,
            )
            .into_iter()
            .map(|dir| dir.to_string_lossy().to_string())
            .collect()
    }

    fn bin_paths(&self) -> Vec<String> {
        self.finder
            .find_dirs_containing(
                "*",
                &[Finder::is_file, Finder::is_executable],
                &["*/runtime/compat*"],
            )
            .into_iter()
            .map(|dir| dir.to_string_lossy().to_string())
            .collect()
    }

    fn find_executables(&self, progress: &GenerationProgress) -> RuntimeResult<Vec<Executable>> {
        let files = self
            .finder
            .find("*", &[Finder::is_regular_file, Finder::is_executable]);
        let scanner = ExecutablesScanner::new(self.appdir(), &self.finder);

        let bar = progress.files(files.len() as u64, "Scanning executables");
        let executables = scanner.scan_all(&files, bar.as_ref())?;
        if let Some(bar) = bar {
            bar.finish_success(&format!("Found {} executables", executables.len()));
        }
        tracing::debug!("Found {} executables in {} files", executables.len(), files.len());
        Ok(executables)
    }

    fn deploy_hooks(
        &self,
        env: &mut Environment,
        architectures: &BTreeSet<Architecture>,
    ) -> RuntimeResult<Vec<PathBuf>> {
        let mut deployed = Vec::new();
        for arch in architectures {
            let dir = self.appdir().join("lib").join(arch.as_str());
            fs::create_dir_all(&dir)?;

            let source = self.resolver.resolve_hooks_library(*arch)?;
            let target = dir.join(HOOKS_FILE_NAME);
            replace_file(&source, &target)?;
            tracing::info!("Deployed hooks for {}: {}", arch, target.display());

            env.append(LIBRARY_PATH_KEY, dir.to_string_lossy().to_string());
            deployed.push(target);
        }
        Ok(deployed)
    }

    fn patch_interpreted(
        &self,
        executables: &[Executable],
        preserve: &PreserveSet,
    ) -> RuntimeResult<InterpreterUsageMap> {
        let mut patcher = ExecutablesPatcher::new();
        for executable in executables {
            let Executable::Interpreted(script) = executable else {
                continue;
            };
            if preserve.contains(&script.path) {
                tracing::debug!("Preserving {}", script.path.display());
                continue;
            }
            patcher.patch_interpreted_executable(script)?;
        }
        Ok(patcher.into_used_interpreters())
    }

    fn create_default_runtime(&self, env: &Environment) -> RuntimeResult<()> {
        fs::create_dir_all(self.trees.default_dir())?;
        let linkers = env
            .get(LIBC_LINKER_PATH_KEY)
            .map(|value| value.entries())
            .unwrap_or_default();
        let created = self.trees.seed_default_runtime(&linkers)?;
        tracing::debug!("Seeded default runtime with {} loader links", created);
        Ok(())
    }

    fn setup_path_mappings(&self, env: &mut Environment, interpreters: &BTreeSet<&str>) {
        for interp in interpreters {
            env.append(PATH_MAPPINGS_KEY, format!("/{}:$APPDIR/{}", interp, interp));
        }
        // build dir mapping keeps build time caches valid after relocation
        env.append(
            PATH_MAPPINGS_KEY,
            format!("{}:$APPDIR", self.appdir().to_string_lossy()),
        );
    }

    fn write_environment_file(&self, global: &Environment) -> RuntimeResult<PathBuf> {
        let mut env = Environment::new();
        env.set("APPDIR", "$ORIGIN/");
        env.set("APPIMAGE_UUID", None::<String>);
        env.set("APPDIR_EXEC_PATH", format!("$APPDIR/{}", self.config.exec()));
        env.set("APPDIR_EXEC_ARGS", self.config.exec_args());

        env.merge(global);
        env.merge(&self.config.user_environment());

        let path = self.appdir().join(ENV_FILE_NAME);
        env.finalize()
            .substitute_build_dir(self.appdir())
            .write_to(&path)?;
        Ok(path)
    }

    fn deploy_launcher(&self) -> RuntimeResult<PathBuf> {
        let exec_path = self.config.exec_path();
        if !elf::has_magic_bytes(&exec_path) {
            return Err(RuntimeError::MainExecutableNotElf(exec_path));
        }
        let arch = elf::architecture(&exec_path)?;

        let source = self.resolver.resolve_executable(arch)?;
        let target = self.appdir().join(APPRUN_FILE_NAME);
        replace_file(&source, &target)?;

        let mut permissions = fs::metadata(&target)?.permissions();
        permissions.set_mode(permissions.mode() | 0o555);
        fs::set_permissions(&target, permissions)?;

        tracing::info!("Deployed AppRun ({}) to {}", arch, target.display());
        Ok(target)
    }
}

/// Copy `source` (following symlinks) over `target`, removing a previous
/// file or link first
fn replace_file(source: &Path, target: &Path) -> RuntimeResult<()> {
    if fs::symlink_metadata(target).is_ok() {
        fs::remove_file(target)?;
    }
    fs::copy(source, target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let mut sorted = GenerationStage::ALL;
        sorted.sort();
        assert_eq!(sorted, GenerationStage::ALL);
        assert_eq!(GenerationStage::ALL[0], GenerationStage::ConfigureEnvironment);
        assert_eq!(GenerationStage::ALL[9], GenerationStage::DeployLauncher);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(GenerationStage::DeployHooks.to_string(), "Deploying runtime hooks");
    }
}
