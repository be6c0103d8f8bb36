//! Device lifecycle states.

use crate::error::{bad_state, Result};
use std::fmt;

/// Aggregate lifecycle state of a sensor or bridge device.
///
/// Advances `Invalid -> Detected -> Initialized -> Streaming`; `Suspended`
/// is entered from `Initialized` or `Streaming` and always returns to
/// `Initialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceState {
    #[default]
    Invalid,
    Detected,
    Initialized,
    Suspended,
    Streaming,
}

impl DeviceState {
    /// Fails with `BadState` unless the current state is one of `allowed`.
    pub fn require(self, operation: &'static str, allowed: &[DeviceState]) -> Result<()> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(bad_state(operation, self))
        }
    }

    /// True once detection has succeeded and the device was not powered off.
    pub fn is_present(self) -> bool {
        self != DeviceState::Invalid
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::Invalid => "Invalid",
            DeviceState::Detected => "Detected",
            DeviceState::Initialized => "Initialized",
            DeviceState::Suspended => "Suspended",
            DeviceState::Streaming => "Streaming",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_require() {
        let s = DeviceState::Detected;
        assert!(s
            .require("init", &[DeviceState::Detected, DeviceState::Initialized])
            .is_ok());
        let err = s.require("start_stream", &[DeviceState::Initialized]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadState);
        assert!(err.to_string().contains("Detected"));
    }
}
