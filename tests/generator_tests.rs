//! Integration tests for RuntimeGenerator
//!
//! These tests run the full generation pipeline over synthetic AppDirs.
//!
//! ## Fixtures
//!
//! All tests use `tempfile::tempdir()` for throwaway AppDirs. ELF binaries
//! are minimal 64-byte headers, which is all the generator reads from them.
//! Launcher and hook binaries come from a local directory laid out the way
//! `LocalBinariesResolver` expects.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use appdir_runtime::{
    Architecture, FixedBundleId, GenerationStage, GeneratorConfig, HelperPipeline,
    LocalBinariesResolver, RuntimeError, RuntimeGenerator, ENV_FILE_NAME,
};
use tempfile::{tempdir, TempDir};

const EM_X86_64: u16 = 62;
const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;

/// Minimal little-endian ELF64 header
fn elf_header(machine: u16, e_type: u16) -> Vec<u8> {
    let mut header = vec![0u8; 64];
    header[..4].copy_from_slice(b"\x7fELF");
    header[4] = 2; // 64-bit
    header[5] = 1; // little endian
    header[6] = 1; // version
    header[16..18].copy_from_slice(&e_type.to_le_bytes());
    header[18..20].copy_from_slice(&machine.to_le_bytes());
    header[20..24].copy_from_slice(&1u32.to_le_bytes());
    header[52..54].copy_from_slice(&64u16.to_le_bytes());
    header[54..56].copy_from_slice(&56u16.to_le_bytes());
    header[58..60].copy_from_slice(&64u16.to_le_bytes());
    header
}

fn write_file(path: &Path, content: &[u8], mode: u32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

/// Local launcher/hook binaries for x86_64
fn binaries_dir() -> TempDir {
    let dir = tempdir().unwrap();
    write_file(&dir.path().join("x86_64/AppRun"), b"apprun-launcher", 0o644);
    write_file(
        &dir.path().join("x86_64/libapprun_hooks.so"),
        b"apprun-hooks",
        0o644,
    );
    dir
}

/// AppDir with one native binary, one shared library and one shell script
fn sample_appdir() -> TempDir {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write_file(&root.join("usr/bin/app"), &elf_header(EM_X86_64, ET_EXEC), 0o755);
    write_file(
        &root.join("usr/lib/libfoo.so.1"),
        &elf_header(EM_X86_64, ET_DYN),
        0o644,
    );
    write_file(&root.join("usr/bin/run.sh"), b"#!/bin/sh\necho hello\n", 0o755);
    dir
}

fn generator(binaries: &Path, config: GeneratorConfig) -> RuntimeGenerator {
    RuntimeGenerator::new(config, LocalBinariesResolver::new(binaries))
        .unwrap()
        .with_helpers(HelperPipeline::new())
        .with_bundle_id(FixedBundleId::new("abc1234"))
}

// ============================================================================
// Full Pipeline Tests
// ============================================================================

#[test]
fn test_generate_full_pipeline() {
    let appdir = sample_appdir();
    let binaries = binaries_dir();
    let root = appdir.path();

    let config = GeneratorConfig::new(root, "usr/bin/app");
    let output = generator(binaries.path(), config).generate().unwrap();

    // launcher deployed and executable by everyone
    assert_eq!(output.apprun, root.join("AppRun"));
    assert_eq!(fs::read(&output.apprun).unwrap(), b"apprun-launcher");
    let mode = fs::metadata(&output.apprun).unwrap().permissions().mode();
    assert_eq!(mode & 0o555, 0o555);

    // hooks deployed per architecture
    assert_eq!(
        output.architectures.iter().copied().collect::<Vec<_>>(),
        vec![Architecture::X86_64]
    );
    assert_eq!(output.hooks, vec![root.join("lib/x86_64/libapprun_hooks.so")]);
    assert_eq!(fs::read(&output.hooks[0]).unwrap(), b"apprun-hooks");

    // script patched, interpreter recorded and linked
    assert_eq!(
        fs::read_to_string(root.join("usr/bin/run.sh")).unwrap(),
        "#!bin/sh\necho hello\n"
    );
    assert_eq!(
        output.interpreters.get(&root.join("usr/bin/run.sh")),
        Some(&"bin/sh".to_string())
    );
    for tree in ["runtime/default", "runtime/compat"] {
        assert_eq!(
            fs::read_link(root.join(tree).join("bin/sh")).unwrap(),
            PathBuf::from("/bin/sh")
        );
    }
}

#[test]
fn test_environment_file_contents() {
    let appdir = sample_appdir();
    let binaries = binaries_dir();
    let root = appdir.path();

    let config = GeneratorConfig::new(root, "usr/bin/app").with_env_var("MY_VAR", "$APPDIR/data");
    let output = generator(binaries.path(), config).generate().unwrap();
    assert_eq!(output.env_file, root.join(ENV_FILE_NAME));

    let content = fs::read_to_string(&output.env_file).unwrap();
    let lines: Vec<&str> = content.lines().collect();

    assert_eq!(lines[0], "APPDIR=$ORIGIN/;");
    assert_eq!(lines[1], "APPIMAGE_UUID=abc1234;");
    assert_eq!(lines[2], "APPDIR_EXEC_PATH=$APPDIR/usr/bin/app;");
    assert_eq!(lines[3], "APPDIR_EXEC_ARGS=$@;");
    assert!(lines.iter().all(|line| line.ends_with(';')));

    assert!(content.contains(
        "XDG_DATA_DIRS=$APPDIR/usr/local/share:$APPDIR/usr/share:$XDG_DATA_DIRS;"
    ));
    assert!(content.contains("XDG_CONFIG_DIRS=$APPDIR/etc/xdg:$XDG_CONFIG_DIRS;"));
    assert!(content.contains("APPDIR_LIBRARY_PATH=$APPDIR/usr/lib:$APPDIR/lib/x86_64;"));
    assert!(content.contains("PATH=$APPDIR/usr/bin:$PATH;"));
    assert!(content.contains("MY_VAR=$APPDIR/data;"));

    // only the build directory mapping keeps the literal path
    let literal = root.to_string_lossy().to_string();
    assert_eq!(content.matches(literal.as_str()).count(), 1);
    assert!(content.contains(&format!(
        "APPDIR_PATH_MAPPINGS=/bin/sh:$APPDIR/bin/sh:{}:$APPDIR;",
        literal
    )));
}

#[test]
fn test_generate_is_repeatable() {
    let appdir = sample_appdir();
    let binaries = binaries_dir();
    let root = appdir.path();

    let first = generator(binaries.path(), GeneratorConfig::new(root, "usr/bin/app"))
        .generate()
        .unwrap();
    let second = generator(binaries.path(), GeneratorConfig::new(root, "usr/bin/app"))
        .generate()
        .unwrap();

    // the rerun sees the patched directive and keeps it
    assert_eq!(
        fs::read_to_string(root.join("usr/bin/run.sh")).unwrap(),
        "#!bin/sh\necho hello\n"
    );
    assert_eq!(first.interpreters, second.interpreters);
    assert_eq!(first.hooks, second.hooks);

    let env = fs::read_to_string(&second.env_file).unwrap();
    assert!(env.contains("APPIMAGE_UUID=abc1234;"));
    assert!(env.contains("APPDIR_PATH_MAPPINGS=/bin/sh:$APPDIR/bin/sh:"));
}

#[test]
fn test_bundled_interpreter_links_into_bundle() {
    let appdir = sample_appdir();
    let binaries = binaries_dir();
    let root = appdir.path();
    write_file(&root.join("usr/bin/python3"), b"python", 0o755);
    write_file(
        &root.join("usr/bin/tool"),
        b"#!/usr/bin/env python3\nprint('hi')\n",
        0o755,
    );

    let output = generator(binaries.path(), GeneratorConfig::new(root, "usr/bin/app"))
        .generate()
        .unwrap();

    assert_eq!(
        fs::read_to_string(root.join("usr/bin/tool")).unwrap(),
        "#!usr/bin/python3\nprint('hi')\n"
    );
    assert_eq!(
        output.interpreters.get(&root.join("usr/bin/tool")),
        Some(&"usr/bin/python3".to_string())
    );
    let link = root.join("runtime/compat/usr/bin/python3");
    assert_eq!(
        fs::read_link(&link).unwrap(),
        PathBuf::from("../../../../usr/bin/python3")
    );
    assert_eq!(fs::read(&link).unwrap(), b"python");
}

#[test]
fn test_preserved_scripts_are_not_patched() {
    let appdir = sample_appdir();
    let binaries = binaries_dir();
    let root = appdir.path();

    let config =
        GeneratorConfig::new(root, "usr/bin/app").with_preserve(vec!["usr/bin/run.sh".to_string()]);
    let output = generator(binaries.path(), config).generate().unwrap();

    assert_eq!(
        fs::read_to_string(root.join("usr/bin/run.sh")).unwrap(),
        "#!/bin/sh\necho hello\n"
    );
    assert!(output.interpreters.is_empty());
}

#[test]
fn test_generate_without_hooks() {
    let appdir = sample_appdir();
    let binaries = binaries_dir();
    let root = appdir.path();

    let config = GeneratorConfig::new(root, "usr/bin/app").with_hooks(false);
    let output = generator(binaries.path(), config).generate().unwrap();

    assert!(output.hooks.is_empty());
    assert!(!root.join("lib/x86_64").exists());
}

#[test]
fn test_absolute_directive_into_build_dir() {
    let appdir = sample_appdir();
    let binaries = binaries_dir();
    let root = appdir.path();
    write_file(&root.join("usr/bin/python3"), b"python", 0o755);
    let directive = format!("#!{}/usr/bin/python3\nprint('hi')\n", root.display());
    write_file(&root.join("usr/bin/tool"), directive.as_bytes(), 0o755);

    let output = generator(binaries.path(), GeneratorConfig::new(root, "usr/bin/app"))
        .generate()
        .unwrap();

    assert_eq!(
        fs::read_to_string(root.join("usr/bin/tool")).unwrap(),
        "#!usr/bin/python3\nprint('hi')\n"
    );
    assert_eq!(
        output.interpreters.get(&root.join("usr/bin/tool")),
        Some(&"usr/bin/python3".to_string())
    );
    assert_eq!(
        fs::read_link(root.join("runtime/default/usr/bin/python3")).unwrap(),
        PathBuf::from("../../../../usr/bin/python3")
    );

    let content = fs::read_to_string(&output.env_file).unwrap();
    let literal = root.to_string_lossy().to_string();
    assert_eq!(content.matches(literal.as_str()).count(), 1);
    assert!(content.contains(&format!(
        "APPDIR_PATH_MAPPINGS=/bin/sh:$APPDIR/bin/sh:/usr/bin/python3:$APPDIR/usr/bin/python3:{}:$APPDIR;",
        literal
    )));
}

#[test]
fn test_malformed_elf_is_skipped() {
    let appdir = sample_appdir();
    let binaries = binaries_dir();
    let root = appdir.path();
    write_file(&root.join("usr/share/data/blob"), b"\x7fELF\x02\x01", 0o755);

    let output = generator(binaries.path(), GeneratorConfig::new(root, "usr/bin/app"))
        .generate()
        .unwrap();
    assert_eq!(
        output.architectures.iter().copied().collect::<Vec<_>>(),
        vec![Architecture::X86_64]
    );
    assert!(root.join("AppRun").exists());

    // the launcher still needs a readable main executable
    let config = GeneratorConfig::new(root, "usr/share/data/blob");
    let result = generator(binaries.path(), config).generate();
    assert!(matches!(result, Err(RuntimeError::InvalidElf { .. })));
}

#[test]
fn test_library_path_skips_plugin_trees() {
    let appdir = sample_appdir();
    let binaries = binaries_dir();
    let root = appdir.path();
    let library = elf_header(EM_X86_64, ET_DYN);
    write_file(&root.join("usr/lib/qt5/plugins/x/libp.so"), &library, 0o644);
    write_file(&root.join("usr/lib/perl5/libq.so"), &library, 0o644);
    write_file(&root.join("usr/lib/gio/modules/libg.so"), &library, 0o644);
    write_file(&root.join("runtime/compat/usr/lib/libr.so"), &library, 0o644);

    let output = generator(binaries.path(), GeneratorConfig::new(root, "usr/bin/app"))
        .generate()
        .unwrap();

    let content = fs::read_to_string(&output.env_file).unwrap();
    assert!(content.contains("APPDIR_LIBRARY_PATH=$APPDIR/usr/lib:$APPDIR/lib/x86_64;"));
    let line = content
        .lines()
        .find(|line| line.starts_with("APPDIR_LIBRARY_PATH="))
        .unwrap();
    for dir in ["qt5/plugins", "perl5", "gio/modules", "runtime/compat"] {
        assert!(!line.contains(dir), "{} in {}", dir, line);
    }
}

#[test]
fn test_default_helpers_seed_default_runtime() {
    let appdir = sample_appdir();
    let binaries = binaries_dir();
    let root = appdir.path();
    write_file(&root.join("lib64/ld-linux-x86-64.so.2"), b"loader", 0o644);

    let config = GeneratorConfig::new(root, "usr/bin/app");
    let output = RuntimeGenerator::new(config, LocalBinariesResolver::new(binaries.path()))
        .unwrap()
        .with_bundle_id(FixedBundleId::new("abc1234"))
        .generate()
        .unwrap();

    assert_eq!(
        fs::read_link(root.join("runtime/default/lib64/ld-linux-x86-64.so.2")).unwrap(),
        PathBuf::from("/lib64/ld-linux-x86-64.so.2")
    );
    let content = fs::read_to_string(&output.env_file).unwrap();
    assert!(content.contains("APPDIR_LIBC_LINKER_PATH=lib64/ld-linux-x86-64.so.2;"));
}

// ============================================================================
// Failure Tests
// ============================================================================

#[test]
fn test_path_mappings_without_hooks_fails_early() {
    let appdir = sample_appdir();
    let binaries = binaries_dir();
    let root = appdir.path();

    let config = GeneratorConfig::new(root, "usr/bin/app")
        .with_hooks(false)
        .with_path_mappings(vec!["/opt/data:$APPDIR/opt/data".to_string()]);
    let result = RuntimeGenerator::new(config, LocalBinariesResolver::new(binaries.path()));

    assert!(matches!(result, Err(RuntimeError::PathMappingsWithoutHooks)));
    assert!(!root.join(ENV_FILE_NAME).exists());
}

#[test]
fn test_main_executable_must_be_elf() {
    let appdir = sample_appdir();
    let binaries = binaries_dir();
    let root = appdir.path();

    let config = GeneratorConfig::new(root, "usr/bin/run.sh");
    let result = generator(binaries.path(), config).generate();

    assert!(matches!(result, Err(RuntimeError::MainExecutableNotElf(_))));
    assert!(!root.join("AppRun").exists());
}

#[test]
fn test_appdir_without_binaries_has_no_architecture() {
    let appdir = tempdir().unwrap();
    let binaries = binaries_dir();
    let root = appdir.path();
    write_file(&root.join("usr/bin/run.sh"), b"#!/bin/sh\n", 0o755);

    let config = GeneratorConfig::new(root, "usr/bin/run.sh");
    let result = generator(binaries.path(), config).generate();

    assert!(matches!(result, Err(RuntimeError::NoArchitecture)));
}

#[test]
fn test_missing_appdir_is_a_config_error() {
    let binaries = binaries_dir();
    let config = GeneratorConfig::new("/nonexistent/AppDir", "usr/bin/app");
    let result = RuntimeGenerator::new(config, LocalBinariesResolver::new(binaries.path()));
    assert!(matches!(result, Err(RuntimeError::Config(_))));
}

#[test]
fn test_generation_stage_names() {
    assert_eq!(GenerationStage::ALL.len(), 10);
    assert_eq!(
        GenerationStage::WriteEnvironmentFile.to_string(),
        "Writing environment file"
    );
}

#[test]
fn test_dependency_resolver_from_generator() {
    let appdir = sample_appdir();
    let binaries = binaries_dir();
    let root = appdir.path();

    let config = GeneratorConfig::new(root, "usr/bin/app")
        .with_lister_timeout(std::time::Duration::from_secs(10));
    let listing = root.join("listing.txt");
    fs::write(&listing, "\tlibfoo.so.1 => /opt/lib/libfoo.so.1 (0x1)\n").unwrap();

    let deps = generator(binaries.path(), config)
        .dependency_resolver()
        .with_lister("cat")
        .resolve(&[listing])
        .unwrap();
    assert!(deps.resolved.contains(Path::new("/opt/lib/libfoo.so.1")));
}
