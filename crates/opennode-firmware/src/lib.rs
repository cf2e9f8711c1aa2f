//! opennode-firmware - Firmware image checks
//!
//! - [`FirmwareVerifier`] converts an ELF image to Intel HEX and inspects
//!   the CC26xx/CC13xx customer configuration (CCFG) page, rejecting images
//!   that would lock the board out of its bootloader.
//! - [`check_elf_target`] ensures an image was built for the board's CPU.

pub mod ccfg;
pub mod elf;
pub mod intel_hex;

pub use ccfg::{classify_ccfg, CcfgVerdict, FirmwareVerifier, CCFG_OFFSET, CCFG_SIZE};
pub use elf::{check_elf_target, ElfClass, ElfMachine, ElfTarget};
pub use intel_hex::{HexError, IntelHex};
