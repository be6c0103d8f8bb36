use crate::i2c::I2cAddress;
use crate::lifecycle::DeviceState;
use thiserror::Error;

/// Coarse classification of every [`Error`].
///
/// Higher layers usually only care about the kind: an `Unsupported` result
/// means "not applicable to this device" and can be ignored quietly, while
/// `Failed` is a real hardware or transaction fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Generic hardware or bus transaction failure.
    Failed,
    /// Null, malformed or out-of-range argument.
    BadParameter,
    /// A bounded table or pool is exhausted.
    NoMemory,
    /// The device or driver lacks the requested capability.
    Unsupported,
    /// The operation is invalid in the current lifecycle state.
    BadState,
    /// A bounded wait elapsed without the expected event.
    Expired,
}

/// Errors that can occur anywhere in the sensor/bridge driver stack.
///
/// Variants carry enough context (addresses, registers, counts) to be
/// logged directly; use [`Error::kind`] for policy decisions.
#[derive(Error, Debug)]
pub enum Error {
    /// Error from the underlying HID API layer (XR2280x host backend).
    #[error("HID API error: {0}")]
    Hid(#[from] hidapi::HidError),
    /// General I/O error during host communication.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// No host bridge device was found.
    #[error("Host bridge device not found")]
    DeviceNotFound,
    /// Invalid or malformed report received from the host bridge.
    #[error("Invalid HID report received or unexpected size ({0} bytes)")]
    InvalidReport(usize),
    /// I2C slave did not acknowledge.
    #[error("No device acknowledged at I2C address {address}")]
    I2cNack {
        /// The address that sent the NACK.
        address: I2cAddress,
    },
    /// I2C bus arbitration was lost during the transaction.
    #[error("I2C arbitration lost at address {address}")]
    I2cArbitrationLost {
        /// The address being accessed.
        address: I2cAddress,
    },
    /// The I2C transaction did not complete in time.
    #[error("I2C timeout at address {address}")]
    I2cTimeout {
        /// The address being accessed.
        address: I2cAddress,
    },
    /// The host bridge rejected the transfer request.
    #[error("I2C request error at address {address}")]
    I2cRequestError {
        /// The address being accessed.
        address: I2cAddress,
    },
    /// A host bridge control register could not be accessed.
    #[error("Feature report error while accessing bridge register 0x{reg_addr:04X}")]
    FeatureReportError {
        /// The bridge register address.
        reg_addr: u16,
    },
    /// An identification register did not hold the expected value.
    #[error(
        "Identification mismatch at {address} register 0x{reg:04X}: expected 0x{expected:X}, read 0x{actual:X}"
    )]
    IdMismatch {
        /// Device address that was probed.
        address: I2cAddress,
        /// Identification register.
        reg: u32,
        /// Expected (masked) value.
        expected: u32,
        /// Value actually read (masked).
        actual: u32,
    },
    /// A sequence was carried to completion but some entries failed.
    #[error("{failed} of {total} sequence entries failed")]
    SequenceFailed {
        /// Number of failing entries.
        failed: usize,
        /// Total number of entries executed.
        total: usize,
    },
    /// The GPIO line already has an interrupt registration.
    #[error("GPIO {line} already has an interrupt registration")]
    AlreadyRegistered {
        /// The GPIO line number.
        line: u8,
    },
    /// Generic failure with a description.
    #[error("Operation failed: {0}")]
    Failed(String),
    /// Function argument is outside the valid range.
    #[error("Argument out of range: {0}")]
    ArgumentOutOfRange(String),
    /// Requested operation exceeds a protocol or table limit.
    #[error("Requested operation size is too large (max {max}, got {actual})")]
    OperationTooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Size requested.
        actual: usize,
    },
    /// Configuration data could not be parsed.
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// A fixed-size table has no free slot.
    #[error("No free slot in {what} table (capacity {capacity})")]
    TableFull {
        /// Which table.
        what: &'static str,
        /// Its capacity.
        capacity: usize,
    },
    /// Capability not present for this device.
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// Operation not allowed in the current lifecycle state.
    #[error("Operation '{operation}' not allowed in state {state}")]
    BadState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the device was in.
        state: DeviceState,
    },
    /// A bounded wait elapsed.
    #[error("Timed out: {0}")]
    Expired(String),
}

impl Error {
    /// Maps this error onto the driver error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ArgumentOutOfRange(_)
            | Error::OperationTooLarge { .. }
            | Error::Config(_) => ErrorKind::BadParameter,
            Error::TableFull { .. } => ErrorKind::NoMemory,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::BadState { .. } => ErrorKind::BadState,
            Error::Expired(_) => ErrorKind::Expired,
            _ => ErrorKind::Failed,
        }
    }

    /// True if the operation simply does not apply to this device.
    pub fn is_unsupported(&self) -> bool {
        self.kind() == ErrorKind::Unsupported
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn unsupported_op(operation: &str) -> Error {
    Error::Unsupported(format!("'{}' has no generic implementation", operation))
}

pub(crate) fn bad_state(operation: &'static str, state: DeviceState) -> Error {
    Error::BadState { operation, state }
}
