//! Executable discovery and classification

use crate::elf;
use crate::executables::{Architecture, BinaryExecutable, Executable, InterpretedExecutable};
use crate::finder::Finder;
use crate::{RuntimeError, RuntimeResult};
use indicatif::ProgressBar;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Bytes read when looking for a `#!` line
const SHEBANG_READ_LIMIT: u64 = 1024;

/// Classifies files as binary or interpreted executables
#[derive(Debug, Clone)]
pub struct ExecutablesScanner {
    appdir: PathBuf,
    bin_paths: Vec<PathBuf>,
}

impl ExecutablesScanner {
    /// Create a scanner that resolves `env` indirections against the
    /// AppDir executable directories first, then the host `PATH`
    pub fn new(appdir: impl Into<PathBuf>, finder: &Finder) -> Self {
        let mut bin_paths = finder.find_dirs_containing(
            "*",
            &[Finder::is_file, Finder::is_executable],
            &["*/runtime/*"],
        );
        if let Some(host_path) = std::env::var_os("PATH") {
            bin_paths.extend(std::env::split_paths(&host_path));
        }
        Self::with_bin_paths(appdir, bin_paths)
    }

    /// Create a scanner with an explicit executable search path
    pub fn with_bin_paths(appdir: impl Into<PathBuf>, bin_paths: Vec<PathBuf>) -> Self {
        Self {
            appdir: appdir.into(),
            bin_paths,
        }
    }

    /// Classify a single file.
    ///
    /// Returns an empty list for files that are neither ELF binaries nor
    /// scripts with an interpreter directive.
    pub fn scan_file(&self, path: &Path) -> RuntimeResult<Vec<Executable>> {
        if elf::has_magic_bytes(path) {
            let arch = elf::architecture(path)?;
            return Ok(vec![Executable::Binary(BinaryExecutable {
                path: path.to_path_buf(),
                arch,
            })]);
        }

        let Some(line) = read_first_line(path)? else {
            return Ok(Vec::new());
        };
        let Some((token, args)) = parse_shebang(&line) else {
            return Ok(Vec::new());
        };

        let (interpreter, args) = if token == "env" || token.ends_with("/env") {
            match split_env_args(&args) {
                Some((program, rest)) => {
                    let dropped = args.len() - rest.len() - 1;
                    if dropped > 0 {
                        tracing::debug!(
                            "Dropping env options of {}: {:?}",
                            path.display(),
                            &args[..dropped]
                        );
                    }
                    (self.resolve_program(&program), rest)
                }
                None => (PathBuf::from(&token), args),
            }
        } else if token.starts_with('/') {
            (self.bundle_path(PathBuf::from(&token)), args)
        } else {
            // already rewritten to a bundle relative directive
            (Path::new("/").join(&token), args)
        };

        Ok(vec![Executable::Interpreted(InterpretedExecutable {
            path: path.to_path_buf(),
            interpreter,
            args,
        })])
    }

    /// Classify many files in parallel.
    ///
    /// Binaries of an unsupported architecture or with a malformed header
    /// are skipped with a warning; any other failure aborts the scan.
    pub fn scan_all(
        &self,
        files: &[PathBuf],
        progress: Option<&ProgressBar>,
    ) -> RuntimeResult<Vec<Executable>> {
        let results: Vec<RuntimeResult<Vec<Executable>>> = files
            .par_iter()
            .map(|file| {
                let result = self.scan_file(file);
                if let Some(pb) = progress {
                    pb.inc(1);
                }
                result
            })
            .collect();

        let mut executables = Vec::new();
        for result in results {
            match result {
                Ok(found) => executables.extend(found),
                Err(RuntimeError::UnknownArchitecture { path, machine }) => {
                    tracing::warn!(
                        "Skipping {}: unsupported ELF machine {:#x}",
                        path.display(),
                        machine
                    );
                }
                Err(RuntimeError::InvalidElf { path, reason }) => {
                    tracing::warn!("Skipping {}: {}", path.display(), reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(executables)
    }

    /// Resolve a program name used through `env` to an interpreter path
    /// as seen from inside the bundle
    fn resolve_program(&self, program: &str) -> PathBuf {
        if program.starts_with('/') {
            return PathBuf::from(program);
        }

        for dir in &self.bin_paths {
            let candidate = dir.join(program);
            if candidate.is_file() {
                return self.bundle_path(candidate);
            }
        }

        let fallback = Path::new("/usr/bin").join(program);
        tracing::warn!(
            "Unable to find '{}' in the executable search path, assuming {}",
            program,
            fallback.display()
        );
        fallback
    }

    /// Paths inside the AppDir as seen from the bundle root
    fn bundle_path(&self, path: PathBuf) -> PathBuf {
        match path.strip_prefix(&self.appdir) {
            Ok(rel) => Path::new("/").join(rel),
            Err(_) => path,
        }
    }
}

/// Union of the architectures of all binary executables.
///
/// A bundle without any native binary has no architecture and cannot be
/// given a launcher.
pub fn determine_architectures(executables: &[Executable]) -> RuntimeResult<BTreeSet<Architecture>> {
    let archs: BTreeSet<Architecture> = executables.iter().filter_map(Executable::arch).collect();
    if archs.is_empty() {
        return Err(RuntimeError::NoArchitecture);
    }
    Ok(archs)
}

fn read_first_line(path: &Path) -> RuntimeResult<Option<String>> {
    let mut buffer = Vec::new();
    File::open(path)?
        .take(SHEBANG_READ_LIMIT)
        .read_to_end(&mut buffer)?;
    if !buffer.starts_with(b"#!") {
        return Ok(None);
    }
    let end = buffer.iter().position(|&b| b == b'\n').unwrap_or(buffer.len());
    Ok(Some(String::from_utf8_lossy(&buffer[..end]).trim_end().to_string()))
}

/// Split a `#!` line into the interpreter token and its arguments
pub(crate) fn parse_shebang(line: &str) -> Option<(String, Vec<String>)> {
    let rest = line.strip_prefix("#!")?;
    let mut parts = rest.split_whitespace();
    let token = parts.next()?.to_string();
    Some((token, parts.map(str::to_string).collect()))
}

/// Find the program run by `env`, skipping its options and assignments
fn split_env_args(args: &[String]) -> Option<(String, Vec<String>)> {
    let idx = args
        .iter()
        .position(|a| !a.starts_with('-') && !a.contains('='))?;
    Some((args[idx].clone(), args[idx + 1..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::fake_header;
    use goblin::elf::header::{EM_X86_64, ET_EXEC};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_exec(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_parse_shebang() {
        assert_eq!(
            parse_shebang("#! /usr/bin/python3 -u"),
            Some(("/usr/bin/python3".to_string(), vec!["-u".to_string()]))
        );
        assert_eq!(parse_shebang("#!"), None);
        assert_eq!(parse_shebang("echo"), None);
    }

    #[test]
    fn test_split_env_args() {
        let args: Vec<String> = ["-S", "LANG=C", "python3", "-u"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            split_env_args(&args),
            Some(("python3".to_string(), vec!["-u".to_string()]))
        );
    }

    #[test]
    fn test_scan_binary() {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("usr/bin/app");
        write_exec(&app, &fake_header(EM_X86_64, ET_EXEC));

        let scanner = ExecutablesScanner::with_bin_paths(temp.path(), vec![]);
        let found = scanner.scan_file(&app).unwrap();
        assert_eq!(
            found,
            vec![Executable::Binary(BinaryExecutable {
                path: app,
                arch: Architecture::X86_64
            })]
        );
    }

    #[test]
    fn test_scan_env_script_resolves_bundled_interpreter() {
        let temp = TempDir::new().unwrap();
        let python = temp.path().join("usr/bin/python3");
        write_exec(&python, b"binary");
        let script = temp.path().join("usr/bin/tool");
        write_exec(&script, b"#!/usr/bin/env python3\nprint('hi')\n");

        let scanner =
            ExecutablesScanner::with_bin_paths(temp.path(), vec![temp.path().join("usr/bin")]);
        let found = scanner.scan_file(&script).unwrap();

        match &found[..] {
            [Executable::Interpreted(exe)] => {
                assert_eq!(exe.interpreter, PathBuf::from("/usr/bin/python3"));
            }
            other => panic!("unexpected scan result: {:?}", other),
        }
    }

    #[test]
    fn test_scan_patched_script() {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("run.sh");
        write_exec(&script, b"#!bin/sh\necho\n");

        let scanner = ExecutablesScanner::with_bin_paths(temp.path(), vec![]);
        let found = scanner.scan_file(&script).unwrap();
        assert_eq!(found[0].path(), script.as_path());
        match &found[0] {
            Executable::Interpreted(exe) => assert_eq!(exe.interpreter, PathBuf::from("/bin/sh")),
            other => panic!("unexpected scan result: {:?}", other),
        }
    }

    #[test]
    fn test_scan_plain_file() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data.txt");
        fs::write(&data, "hello").unwrap();

        let scanner = ExecutablesScanner::with_bin_paths(temp.path(), vec![]);
        assert!(scanner.scan_file(&data).unwrap().is_empty());
    }

    #[test]
    fn test_scan_all_skips_unknown_arch() {
        let temp = TempDir::new().unwrap();
        let good = temp.path().join("good");
        let odd = temp.path().join("odd");
        write_exec(&good, &fake_header(EM_X86_64, ET_EXEC));
        write_exec(&odd, &fake_header(8, ET_EXEC));

        let scanner = ExecutablesScanner::with_bin_paths(temp.path(), vec![]);
        let found = scanner.scan_all(&[good, odd], None).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_scan_all_skips_malformed_header() {
        let temp = TempDir::new().unwrap();
        let good = temp.path().join("usr/bin/app");
        let blob = temp.path().join("usr/share/data/blob");
        write_exec(&good, &fake_header(EM_X86_64, ET_EXEC));
        write_exec(&blob, b"\x7fELF\x02\x01");

        let scanner = ExecutablesScanner::with_bin_paths(temp.path(), vec![]);
        assert!(matches!(
            scanner.scan_file(&blob),
            Err(RuntimeError::InvalidElf { .. })
        ));
        let found = scanner.scan_all(&[good.clone(), blob], None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path(), good.as_path());
    }

    #[test]
    fn test_scan_absolute_directive_into_appdir() {
        let temp = TempDir::new().unwrap();
        write_exec(&temp.path().join("usr/bin/python3"), b"binary");
        let script = temp.path().join("usr/bin/tool");
        let directive = format!("#!{}/usr/bin/python3 -u\n", temp.path().display());
        write_exec(&script, directive.as_bytes());

        let scanner = ExecutablesScanner::with_bin_paths(temp.path(), vec![]);
        match &scanner.scan_file(&script).unwrap()[..] {
            [Executable::Interpreted(exe)] => {
                assert_eq!(exe.interpreter, PathBuf::from("/usr/bin/python3"));
                assert_eq!(exe.args, vec!["-u".to_string()]);
            }
            other => panic!("unexpected scan result: {:?}", other),
        }
    }

    #[test]
    fn test_determine_architectures() {
        assert!(matches!(
            determine_architectures(&[]),
            Err(RuntimeError::NoArchitecture)
        ));

        let exes = vec![Executable::Binary(BinaryExecutable {
            path: PathBuf::from("/AppDir/usr/bin/app"),
            arch: Architecture::X86_64,
        })];
        let archs = determine_architectures(&exes).unwrap();
        assert_eq!(archs.into_iter().collect::<Vec<_>>(), vec![Architecture::X86_64]);
    }
}
