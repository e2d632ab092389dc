//! Executable classification types

use std::fmt;
use std::path::{Path, PathBuf};

/// Machine architectures a bundle can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Architecture {
    /// AMD64 / Intel 64
    X86_64,
    /// 32-bit x86
    I386,
    /// 32-bit ARM, hard-float ABI
    Arm,
    /// 64-bit ARM
    Aarch64,
}

impl Architecture {
    /// All supported architectures
    pub const ALL: [Architecture; 4] = [
        Architecture::X86_64,
        Architecture::I386,
        Architecture::Arm,
        Architecture::Aarch64,
    ];

    /// Map an ELF `e_machine` value
    pub fn from_elf_machine(machine: u16) -> Option<Self> {
        use goblin::elf::header::{EM_386, EM_AARCH64, EM_ARM, EM_X86_64};
        match machine {
            EM_X86_64 => Some(Architecture::X86_64),
            EM_386 => Some(Architecture::I386),
            EM_ARM => Some(Architecture::Arm),
            EM_AARCH64 => Some(Architecture::Aarch64),
            _ => None,
        }
    }

    /// Name used for launcher releases and `lib/<arch>` directories
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::I386 => "i386",
            Architecture::Arm => "gnueabihf",
            Architecture::Aarch64 => "aarch64",
        }
    }

    /// Parse an architecture name (accepts common aliases)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "x86_64" | "x86-64" | "amd64" => Some(Architecture::X86_64),
            "i386" | "i686" | "x86" => Some(Architecture::I386),
            "gnueabihf" | "arm" | "armhf" => Some(Architecture::Arm),
            "aarch64" | "arm64" => Some(Architecture::Aarch64),
            _ => None,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Native ELF executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryExecutable {
    pub path: PathBuf,
    pub arch: Architecture,
}

/// Script started through a `#!` interpreter directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpretedExecutable {
    pub path: PathBuf,
    /// Absolute interpreter path as seen from inside the bundle
    /// (e.g. `/usr/bin/python3`), with any `env` indirection resolved
    pub interpreter: PathBuf,
    /// Arguments following the interpreter on the directive line
    pub args: Vec<String>,
}

impl InterpretedExecutable {
    /// Interpreter path without its leading `/`
    pub fn relative_interpreter(&self) -> String {
        self.interpreter
            .to_string_lossy()
            .trim_start_matches('/')
            .to_string()
    }
}

/// Executable found in the AppDir
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Executable {
    Binary(BinaryExecutable),
    Interpreted(InterpretedExecutable),
}

impl Executable {
    /// Path of the executable file
    pub fn path(&self) -> &Path {
        match self {
            Executable::Binary(b) => &b.path,
            Executable::Interpreted(i) => &i.path,
        }
    }

    /// Architecture, for binary executables
    pub fn arch(&self) -> Option<Architecture> {
        match self {
            Executable::Binary(b) => Some(b.arch),
            Executable::Interpreted(_) => None,
        }
    }
}
