//! I2C slave addressing.

use crate::error::{Error, Result};
use std::fmt;

/// Represents a 7-bit or 10-bit I2C slave address.
/// Use `I2cAddress::new_7bit(addr)`, `I2cAddress::new_10bit(addr)` or
/// `I2cAddress::from_8bit(addr)` for addresses quoted in datasheet wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum I2cAddress {
    /// Standard 7-bit address (0x00 - 0x7F).
    Bit7(u8),
    /// Extended 10-bit address (0x0000 - 0x03FF).
    Bit10(u16),
}

impl I2cAddress {
    /// Creates a 7-bit address, checking validity (0-127).
    pub fn new_7bit(addr: u8) -> Result<Self> {
        if addr <= 0x7F {
            Ok(I2cAddress::Bit7(addr))
        } else {
            Err(Error::ArgumentOutOfRange(
                "7-bit I2C address must be 0-127".to_string(),
            ))
        }
    }

    /// Creates a 10-bit address, checking validity (0-1023).
    pub fn new_10bit(addr: u16) -> Result<Self> {
        if addr <= 0x03FF {
            Ok(I2cAddress::Bit10(addr))
        } else {
            Err(Error::ArgumentOutOfRange(format!(
                "10-bit I2C address 0x{:04X} must be 0-0x3FF",
                addr
            )))
        }
    }

    /// Converts an 8-bit wire address (7-bit address shifted left, R/W bit
    /// clear) as printed in most serializer datasheets, e.g. `0x88` -> `0x44`.
    pub const fn from_8bit(addr: u8) -> Self {
        I2cAddress::Bit7(addr >> 1)
    }

    /// Returns the 8-bit wire form of a 7-bit address.
    /// Bridge chips store aliases in this form in their address registers.
    pub fn to_8bit(&self) -> Option<u8> {
        match self {
            I2cAddress::Bit7(a) => Some(a << 1),
            I2cAddress::Bit10(_) => None,
        }
    }

    /// The numeric address without the width tag.
    pub fn raw(&self) -> u16 {
        match self {
            I2cAddress::Bit7(a) => *a as u16,
            I2cAddress::Bit10(a) => *a,
        }
    }
}

impl fmt::Display for I2cAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            I2cAddress::Bit7(a) => write!(f, "7-bit 0x{:02X}", a),
            I2cAddress::Bit10(a) => write!(f, "10-bit 0x{:03X}", a),
        }
    }
}

/// Header bytes for a 10-bit address write: `11110xx0` then the low byte.
pub(crate) fn encode_10bit(addr: u16) -> (u8, u8) {
    let high = 0b1111_0000 | ((((addr >> 8) & 0b11) as u8) << 1);
    (high, (addr & 0xFF) as u8)
}
