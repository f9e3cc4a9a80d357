//! Chip descriptors.
//!
//! Everything the programmer needs to know about a target family: page
//! geometry, ISP timing, and the raw SPI opcode sequences for erase,
//! signature, fuse and lock access. Descriptors are plain data, usually
//! loaded from TOML:
//!
//! ```toml
//! name = "ATmega2560"
//! timeout = 0xC8
//! stab_delay = 0x64
//! # ...
//! [flash]
//! page_size = 256
//! address_offset = 1
//! # ...
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChipError {
    #[error("Failed to read chip descriptor: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse chip descriptor: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid chip descriptor: {0}")]
    Invalid(String),
}

/// Memory spaces reachable through paged ISP commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Flash,
    Eeprom,
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryType::Flash => write!(f, "flash"),
            MemoryType::Eeprom => write!(f, "eeprom"),
        }
    }
}

/// Paged memory parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryDescriptor {
    /// Bytes per program-memory command.
    pub page_size: usize,
    /// Right shift turning a byte offset into a programmer address
    /// (1 for word-addressed flash, 0 for byte-addressed EEPROM).
    pub address_offset: u32,
    /// Programming mode byte of the page-program command.
    pub mode: u8,
    /// Write delay in ms.
    pub delay: u8,
    /// Load page, write page and read-for-polling opcodes.
    pub write: [u8; 3],
    /// Read opcode, first byte is sent with memory reads.
    pub read: [u8; 3],
    pub poll1: u8,
    pub poll2: u8,
}

/// Chip erase parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraseDescriptor {
    /// Erase delay in ms.
    pub delay: u8,
    /// 4-byte SPI erase instruction.
    pub cmd: [u8; 4],
}

/// Device signature parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureDescriptor {
    /// Number of signature bytes.
    #[serde(default = "default_signature_size")]
    pub size: usize,
    /// Position of the result in the SPI answer.
    pub start_address: u8,
    /// 4-byte SPI read instruction; byte 2 carries the signature index.
    pub read: [u8; 4],
    /// Expected signature, if known.
    #[serde(default)]
    pub value: Option<Vec<u8>>,
}

fn default_signature_size() -> usize {
    3
}

/// Fuse access opcodes keyed by fuse name ("low", "high", "ext", ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuseDescriptor {
    /// Position of the result in the SPI answer.
    pub start_address: u8,
    pub read: BTreeMap<String, Vec<u8>>,
    pub write: BTreeMap<String, [u8; 3]>,
}

/// Lock byte access opcodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDescriptor {
    pub start_address: u8,
    pub read: Vec<u8>,
    pub write: [u8; 3],
}

/// Static description of a target chip family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipDescriptor {
    pub name: String,

    // Programming mode entry
    pub timeout: u8,
    pub stab_delay: u8,
    pub cmdexe_delay: u8,
    pub sync_loops: u8,
    pub byte_delay: u8,
    pub poll_value: u8,
    pub poll_index: u8,
    /// 4-byte programming enable instruction.
    pub pgm_enable: [u8; 4],

    // Programming mode exit
    pub pre_delay: u8,
    pub post_delay: u8,

    /// Erase completion check: 0 = delay, 1 = RDY/BSY polling.
    pub poll_method: u8,
    pub erase: EraseDescriptor,

    pub flash: MemoryDescriptor,
    pub eeprom: MemoryDescriptor,
    pub signature: SignatureDescriptor,
    pub fuses: FuseDescriptor,
    #[serde(default)]
    pub lock: Option<LockDescriptor>,
}

impl ChipDescriptor {
    /// Parse and validate a descriptor from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ChipError> {
        let chip: ChipDescriptor = toml::from_str(text)?;
        chip.validate()?;
        Ok(chip)
    }

    /// Load and validate a descriptor from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ChipError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn memory(&self, mem: MemoryType) -> &MemoryDescriptor {
        match mem {
            MemoryType::Flash => &self.flash,
            MemoryType::Eeprom => &self.eeprom,
        }
    }

    /// Names of all readable fuses, in read order.
    pub fn fuse_names(&self) -> impl Iterator<Item = &str> {
        self.fuses.read.keys().map(String::as_str)
    }

    pub fn validate(&self) -> Result<(), ChipError> {
        for (mem, desc) in [
            (MemoryType::Flash, &self.flash),
            (MemoryType::Eeprom, &self.eeprom),
        ] {
            if desc.page_size == 0 {
                return Err(ChipError::Invalid(format!("{mem} page size must be > 0")));
            }
            if desc.page_size > u16::MAX as usize {
                return Err(ChipError::Invalid(format!(
                    "{mem} page size {} does not fit a 16-bit length",
                    desc.page_size
                )));
            }
            if desc.address_offset >= 32 {
                return Err(ChipError::Invalid(format!(
                    "{mem} address offset {} is out of range",
                    desc.address_offset
                )));
            }
        }

        if self.signature.size == 0 || self.signature.size > u8::MAX as usize {
            return Err(ChipError::Invalid(format!(
                "signature size {} is out of range",
                self.signature.size
            )));
        }
        if let Some(value) = &self.signature.value
            && value.len() != self.signature.size
        {
            return Err(ChipError::Invalid(format!(
                "signature value has {} bytes, expected {}",
                value.len(),
                self.signature.size
            )));
        }

        for (name, opcode) in &self.fuses.read {
            if opcode.is_empty() {
                return Err(ChipError::Invalid(format!("fuse '{name}' has no read opcode")));
            }
        }
        if let Some(lock) = &self.lock
            && lock.read.is_empty()
        {
            return Err(ChipError::Invalid("lock has no read opcode".into()));
        }

        Ok(())
    }
}

/// ATmega2560 descriptor shared by unit tests.
#[cfg(test)]
pub(crate) fn test_chip() -> ChipDescriptor {
    ChipDescriptor::from_toml_str(include_str!("../../../chips/atmega2560.toml"))
        .expect("bundled descriptor is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_descriptor() {
        let chip = test_chip();
        assert_eq!(chip.name, "ATmega2560");
        assert_eq!(chip.flash.page_size, 256);
        assert_eq!(chip.flash.address_offset, 1);
        assert_eq!(chip.eeprom.address_offset, 0);
        assert_eq!(chip.signature.size, 3);
        assert_eq!(chip.fuse_names().collect::<Vec<_>>(), ["ext", "high", "low"]);
        assert_eq!(chip.fuses.write["ext"], [0xAC, 0xA4, 0x00]);
        assert!(chip.lock.is_some());
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let mut chip = test_chip();
        chip.eeprom.page_size = 0;
        assert!(matches!(chip.validate(), Err(ChipError::Invalid(_))));
    }

    #[test]
    fn test_signature_value_must_match_size() {
        let mut chip = test_chip();
        chip.signature.value = Some(vec![0x1E, 0x98]);
        assert!(chip.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let chip = test_chip();
        let text = toml::to_string_pretty(&chip).unwrap();
        assert_eq!(ChipDescriptor::from_toml_str(&text).unwrap(), chip);
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            ChipDescriptor::from_toml_str("name = 3"),
            Err(ChipError::Parse(_))
        ));
    }
}
