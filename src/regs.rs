//! Register-setting model and its big-endian wire encoding.

use crate::consts::REG_SETTING_MAX_ENTRIES;
use crate::error::{Error, Result};
use log::error;

/// Width of a register address on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrWidth {
    Byte1,
    Byte2,
    Byte3,
}

/// Width of a register value on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataWidth {
    Byte1,
    Byte2,
    Byte4,
}

impl AddrWidth {
    /// Converts a raw byte-count tag from configuration data.
    pub fn from_bytes(bytes: u8) -> Result<Self> {
        match bytes {
            1 => Ok(AddrWidth::Byte1),
            2 => Ok(AddrWidth::Byte2),
            3 => Ok(AddrWidth::Byte3),
            other => {
                error!("Invalid register address width tag: {}", other);
                Err(Error::ArgumentOutOfRange(format!(
                    "address width {} (expected 1, 2 or 3)",
                    other
                )))
            }
        }
    }

    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            AddrWidth::Byte1 => 1,
            AddrWidth::Byte2 => 2,
            AddrWidth::Byte3 => 3,
        }
    }
}

impl DataWidth {
    /// Converts a raw byte-count tag from configuration data.
    pub fn from_bytes(bytes: u8) -> Result<Self> {
        match bytes {
            1 => Ok(DataWidth::Byte1),
            2 => Ok(DataWidth::Byte2),
            4 => Ok(DataWidth::Byte4),
            other => {
                error!("Invalid register data width tag: {}", other);
                Err(Error::ArgumentOutOfRange(format!(
                    "data width {} (expected 1, 2 or 4)",
                    other
                )))
            }
        }
    }

    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            DataWidth::Byte1 => 1,
            DataWidth::Byte2 => 2,
            DataWidth::Byte4 => 4,
        }
    }
}

fn fits(value: u32, bytes: usize) -> bool {
    bytes >= 4 || value >> (bytes * 8) == 0
}

/// Address and data width of a device's register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegFormat {
    pub addr: AddrWidth,
    pub data: DataWidth,
}

impl RegFormat {
    pub const fn new(addr: AddrWidth, data: DataWidth) -> Self {
        Self { addr, data }
    }

    /// 16-bit register addresses with 8-bit values (GMSL serdes parts).
    pub const A16_D8: RegFormat = RegFormat::new(AddrWidth::Byte2, DataWidth::Byte1);
    /// 16-bit register addresses with 16-bit values (most image sensors).
    pub const A16_D16: RegFormat = RegFormat::new(AddrWidth::Byte2, DataWidth::Byte2);
    /// 8-bit register addresses with 8-bit values.
    pub const A8_D8: RegFormat = RegFormat::new(AddrWidth::Byte1, DataWidth::Byte1);

    /// Big-endian register address bytes.
    pub(crate) fn encode_reg(&self, reg: u32) -> Vec<u8> {
        let n = self.addr.bytes();
        reg.to_be_bytes()[4 - n..].to_vec()
    }

    /// Big-endian register address followed by big-endian data.
    pub(crate) fn encode_write(&self, reg: u32, data: u32) -> Vec<u8> {
        let mut buf = self.encode_reg(reg);
        let n = self.data.bytes();
        buf.extend_from_slice(&data.to_be_bytes()[4 - n..]);
        buf
    }

    fn check(&self, reg: u32, data: u32) -> Result<()> {
        if !fits(reg, self.addr.bytes()) {
            return Err(Error::ArgumentOutOfRange(format!(
                "register 0x{:X} does not fit {} address byte(s)",
                reg,
                self.addr.bytes()
            )));
        }
        if !fits(data, self.data.bytes()) {
            return Err(Error::ArgumentOutOfRange(format!(
                "value 0x{:X} does not fit {} data byte(s)",
                data,
                self.data.bytes()
            )));
        }
        Ok(())
    }
}

/// Decodes a big-endian data field.
pub(crate) fn decode_be(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32)
}

/// One register write: address, value, and a settle delay after the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegEntry {
    pub reg: u32,
    pub data: u32,
    pub delay_ms: u16,
}

impl RegEntry {
    pub const fn new(reg: u32, data: u32) -> Self {
        Self {
            reg,
            data,
            delay_ms: 0,
        }
    }

    pub const fn with_delay(reg: u32, data: u32, delay_ms: u16) -> Self {
        Self {
            reg,
            data,
            delay_ms,
        }
    }
}

/// An ordered, bounded register table in one [`RegFormat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterSetting {
    format: RegFormat,
    entries: Vec<RegEntry>,
}

impl RegisterSetting {
    /// Builds a setting, rejecting oversized tables and entries that do not
    /// fit the declared widths.
    pub fn new(format: RegFormat, entries: Vec<RegEntry>) -> Result<Self> {
        if entries.len() > REG_SETTING_MAX_ENTRIES {
            return Err(Error::OperationTooLarge {
                max: REG_SETTING_MAX_ENTRIES,
                actual: entries.len(),
            });
        }
        for entry in &entries {
            format.check(entry.reg, entry.data)?;
        }
        Ok(Self { format, entries })
    }

    /// Builds a setting from `(reg, data)` pairs without delays.
    pub fn from_pairs(format: RegFormat, pairs: &[(u32, u32)]) -> Result<Self> {
        Self::new(
            format,
            pairs.iter().map(|&(r, d)| RegEntry::new(r, d)).collect(),
        )
    }

    /// A single-entry setting.
    pub fn single(format: RegFormat, reg: u32, data: u32) -> Result<Self> {
        Self::new(format, vec![RegEntry::new(reg, data)])
    }

    /// An empty setting; writing it is a no-op.
    pub fn empty(format: RegFormat) -> Self {
        Self {
            format,
            entries: Vec::new(),
        }
    }

    pub fn format(&self) -> RegFormat {
        self.format
    }

    pub fn entries(&self) -> &[RegEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Reads overwrite `data` in place; widths are unchanged so the
    // construction invariants still hold.
    pub(crate) fn entries_mut(&mut self) -> &mut [RegEntry] {
        &mut self.entries
    }
}
