//! ELF target check
//!
//! Each board accepts images for one ELF class and machine (a SimpleLink
//! board wants 32-bit ARM). Flashing anything else only fails later, and
//! less clearly, inside the debugger.

use std::fmt;
use std::path::Path;

use object::elf::{FileHeader32, FileHeader64};
use object::read::elf::FileHeader;
use object::{Endianness, FileKind};
use opennode_core::{NodeError, NodeResult};
use serde::{Deserialize, Serialize};

/// ELF file class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElfClass {
    Elf32,
    Elf64,
}

/// ELF `e_machine` values of the supported board CPUs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElfMachine {
    Arm,
    Msp430,
    Avr,
    Xtensa,
    RiscV,
}

impl ElfMachine {
    pub fn e_machine(&self) -> u16 {
        match self {
            ElfMachine::Arm => object::elf::EM_ARM,
            ElfMachine::Msp430 => object::elf::EM_MSP430,
            ElfMachine::Avr => object::elf::EM_AVR,
            ElfMachine::Xtensa => object::elf::EM_XTENSA,
            ElfMachine::RiscV => object::elf::EM_RISCV,
        }
    }
}

/// Class and machine a board accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElfTarget {
    pub class: ElfClass,
    pub machine: ElfMachine,
}

impl ElfTarget {
    pub const ARM32: ElfTarget = ElfTarget {
        class: ElfClass::Elf32,
        machine: ElfMachine::Arm,
    };
}

impl fmt::Display for ElfTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.class, self.machine)
    }
}

/// Check that the ELF file at `path` matches `target`
pub async fn check_elf_target(path: &Path, target: ElfTarget) -> NodeResult<()> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| NodeError::Io(format!("read {}: {}", path.display(), e)))?;
    check_elf_bytes(&data, target)
}

fn check_elf_bytes(data: &[u8], target: ElfTarget) -> NodeResult<()> {
    let reject = |msg: String| NodeError::VerificationRejected(msg);

    let (class, machine) = match FileKind::parse(data) {
        Ok(FileKind::Elf32) => {
            let header = FileHeader32::<Endianness>::parse(data)
                .map_err(|e| reject(format!("invalid ELF header: {}", e)))?;
            let endian = header
                .endian()
                .map_err(|e| reject(format!("invalid ELF header: {}", e)))?;
            (ElfClass::Elf32, header.e_machine(endian))
        }
        Ok(FileKind::Elf64) => {
            let header = FileHeader64::<Endianness>::parse(data)
                .map_err(|e| reject(format!("invalid ELF header: {}", e)))?;
            let endian = header
                .endian()
                .map_err(|e| reject(format!("invalid ELF header: {}", e)))?;
            (ElfClass::Elf64, header.e_machine(endian))
        }
        _ => return Err(reject("not an ELF file".to_string())),
    };

    if class != target.class {
        return Err(reject(format!(
            "ELF class {:?} does not match {:?}",
            class, target.class
        )));
    }
    if machine != target.machine.e_machine() {
        return Err(reject(format!(
            "ELF machine {} does not match {:?}",
            machine, target.machine
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal little-endian ELF32 executable header
    fn elf32_header(machine: u16) -> Vec<u8> {
        let mut h = vec![0x7F, b'E', b'L', b'F', 1, 1, 1, 0];
        h.resize(16, 0);
        h.extend_from_slice(&2u16.to_le_bytes()); // e_type: EXEC
        h.extend_from_slice(&machine.to_le_bytes());
        h.extend_from_slice(&1u32.to_le_bytes()); // e_version
        h.extend_from_slice(&[0; 12]); // e_entry, e_phoff, e_shoff
        h.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        h.extend_from_slice(&52u16.to_le_bytes()); // e_ehsize
        h.extend_from_slice(&[0; 10]); // ph/sh sizes and counts
        h
    }

    #[test]
    fn test_arm32_accepted() {
        let data = elf32_header(object::elf::EM_ARM);
        assert_eq!(data.len(), 52);
        assert!(check_elf_bytes(&data, ElfTarget::ARM32).is_ok());
    }

    #[test]
    fn test_wrong_machine_rejected() {
        let data = elf32_header(object::elf::EM_MSP430);
        let err = check_elf_bytes(&data, ElfTarget::ARM32).unwrap_err();
        assert!(matches!(err, NodeError::VerificationRejected(_)));

        let msp430 = ElfTarget {
            class: ElfClass::Elf32,
            machine: ElfMachine::Msp430,
        };
        assert!(check_elf_bytes(&data, msp430).is_ok());
    }

    #[test]
    fn test_not_elf_rejected() {
        let err = check_elf_bytes(b":00000001FF\n", ElfTarget::ARM32).unwrap_err();
        assert_eq!(
            err,
            NodeError::VerificationRejected("not an ELF file".to_string())
        );
    }

    #[tokio::test]
    async fn test_check_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fw.elf");
        std::fs::write(&path, elf32_header(object::elf::EM_ARM)).unwrap();
        assert!(check_elf_target(&path, ElfTarget::ARM32).await.is_ok());

        let err = check_elf_target(&dir.path().join("missing.elf"), ElfTarget::ARM32)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Io(_)));
    }
}
