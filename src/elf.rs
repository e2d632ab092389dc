//! Minimal ELF header inspection

use crate::executables::Architecture;
use crate::{RuntimeError, RuntimeResult};
use goblin::elf::header::{Header, ELFMAG, ET_DYN, SELFMAG};
use goblin::elf::Elf;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Largest ELF header (64-bit)
const HEADER_LEN: u64 = 64;

fn read_prefix(path: &Path, len: u64) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(len as usize);
    File::open(path)?.take(len).read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// Parse the ELF header of a file, `Ok(None)` when the magic is missing
fn parse_header(path: &Path) -> RuntimeResult<Option<Result<Header, String>>> {
    let bytes = read_prefix(path, HEADER_LEN)?;
    if bytes.len() < SELFMAG || &bytes[..SELFMAG] != ELFMAG {
        return Ok(None);
    }
    Ok(Some(Elf::parse_header(&bytes).map_err(|e| e.to_string())))
}

fn read_header(path: &Path) -> RuntimeResult<Option<Header>> {
    match parse_header(path)? {
        Some(Ok(header)) => Ok(Some(header)),
        Some(Err(reason)) => {
            tracing::debug!("Malformed ELF header in {}: {}", path.display(), reason);
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Check whether a file starts with the ELF magic bytes
pub fn has_magic_bytes(path: &Path) -> bool {
    read_prefix(path, SELFMAG as u64)
        .map(|bytes| bytes.as_slice() == ELFMAG)
        .unwrap_or(false)
}

/// Detect the architecture of an ELF file.
///
/// Files without the magic bytes or with a header that cannot be decoded
/// fail with [`RuntimeError::InvalidElf`].
pub fn architecture(path: &Path) -> RuntimeResult<Architecture> {
    let header = match parse_header(path)? {
        Some(Ok(header)) => header,
        Some(Err(reason)) => {
            return Err(RuntimeError::InvalidElf {
                path: path.to_path_buf(),
                reason,
            })
        }
        None => {
            return Err(RuntimeError::InvalidElf {
                path: path.to_path_buf(),
                reason: "missing ELF magic".to_string(),
            })
        }
    };
    Architecture::from_elf_machine(header.e_machine).ok_or_else(|| {
        RuntimeError::UnknownArchitecture {
            path: path.to_path_buf(),
            machine: header.e_machine,
        }
    })
}

/// Check whether a file is an ELF shared object (`ET_DYN`)
pub fn is_shared_object(path: &Path) -> bool {
    matches!(read_header(path), Ok(Some(header)) if header.e_type == ET_DYN)
}

/// Build a minimal little-endian 64-bit ELF header, for test fixtures
#[cfg(test)]
pub(crate) fn fake_header(machine: u16, e_type: u16) -> Vec<u8> {
    let mut bytes = vec![0u8; HEADER_LEN as usize];
    bytes[..4].copy_from_slice(ELFMAG);
    bytes[4] = 2; // ELFCLASS64
    bytes[5] = 1; // little endian
    bytes[6] = 1; // EV_CURRENT
    bytes[16..18].copy_from_slice(&e_type.to_le_bytes());
    bytes[18..20].copy_from_slice(&machine.to_le_bytes());
    bytes[20..24].copy_from_slice(&1u32.to_le_bytes());
    bytes[52..54].copy_from_slice(&64u16.to_le_bytes());
    bytes[54..56].copy_from_slice(&56u16.to_le_bytes());
    bytes[58..60].copy_from_slice(&64u16.to_le_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use goblin::elf::header::{EM_AARCH64, EM_X86_64, ET_EXEC};
    use tempfile::TempDir;

    #[test]
    fn test_detects_x86_64() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app");
        std::fs::write(&path, fake_header(EM_X86_64, ET_EXEC)).unwrap();

        assert!(has_magic_bytes(&path));
        assert_eq!(architecture(&path).unwrap(), Architecture::X86_64);
        assert!(!is_shared_object(&path));
    }

    #[test]
    fn test_detects_shared_object() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("libfoo.so.1");
        std::fs::write(&path, fake_header(EM_AARCH64, ET_DYN)).unwrap();

        assert!(is_shared_object(&path));
        assert_eq!(architecture(&path).unwrap(), Architecture::Aarch64);
    }

    #[test]
    fn test_unknown_machine() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mips");
        std::fs::write(&path, fake_header(8, ET_EXEC)).unwrap();

        assert!(matches!(
            architecture(&path),
            Err(RuntimeError::UnknownArchitecture { machine: 8, .. })
        ));
    }

    #[test]
    fn test_text_file_is_not_elf() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.sh");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();

        assert!(!has_magic_bytes(&path));
        assert!(!is_shared_object(&path));
        assert!(matches!(
            architecture(&path),
            Err(RuntimeError::InvalidElf { .. })
        ));
    }

    #[test]
    fn test_truncated_header_is_invalid() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("blob");
        std::fs::write(&path, b"\x7fELF\x02\x01").unwrap();

        assert!(has_magic_bytes(&path));
        assert!(!is_shared_object(&path));
        assert!(matches!(
            architecture(&path),
            Err(RuntimeError::InvalidElf { .. })
        ));
    }
}
