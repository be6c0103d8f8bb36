use crate::consts::MAX_GPIO_LINES;
use crate::error::{Error, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpioLevel {
    Low,
    High,
}

impl From<bool> for GpioLevel {
    fn from(high: bool) -> Self {
        if high {
            GpioLevel::High
        } else {
            GpioLevel::Low
        }
    }
}

/// Represents a valid host GPIO line number (0-31).
/// Use `GpioLine::new(num)` to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpioLine(pub(crate) u8);

impl GpioLine {
    /// Creates a new GpioLine, returning an error if the number is out of range (0-31).
    pub fn new(line: u8) -> Result<Self> {
        if line < MAX_GPIO_LINES {
            Ok(GpioLine(line))
        } else {
            Err(Error::ArgumentOutOfRange(format!(
                "GPIO line {} out of range (0-{})",
                line,
                MAX_GPIO_LINES - 1
            )))
        }
    }

    /// Returns the underlying line number.
    #[inline]
    pub fn number(&self) -> u8 {
        self.0
    }

    /// Returns the register group index (0 or 1) on 16-bit-wide GPIO banks.
    #[inline]
    pub fn group_index(&self) -> usize {
        (self.0 / 16) as usize
    }

    /// Returns the bit mask within the group's register.
    #[inline]
    pub fn mask(&self) -> u16 {
        1u16 << (self.0 % 16)
    }
}

impl fmt::Display for GpioLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
