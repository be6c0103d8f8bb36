//! Limits, default timings, and XR2280x host-bridge register definitions.

use std::time::Duration;

/// Hard upper bound on entries in one register setting.
pub const REG_SETTING_MAX_ENTRIES: usize = 4096;
/// Hard upper bound on steps in one power setting.
pub const POWER_SETTING_MAX_STEPS: usize = 32;
/// Concurrent GPIO interrupt registrations per platform instance.
pub const MAX_GPIO_INTERRUPTS: usize = 3;
/// Highest mode index + 1 accepted by `set_mode`.
pub const MAX_SENSOR_MODES: usize = 16;
/// GPIO lines addressable through [`crate::gpio::GpioLine`].
pub const MAX_GPIO_LINES: u8 = 32;

/// Sleep between callback invocations of a polling interrupt worker.
pub const IRQ_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Longest a hardware interrupt worker blocks before re-checking cancellation.
pub const IRQ_WAIT_SLICE: Duration = Duration::from_millis(100);

// --- XR2280x USB-HID host bridge ---
pub mod hid {
    /// Exar Corporation vendor ID for XR2280x devices.
    pub const EXAR_VID: u16 = 0x04E2;
    /// Product ID of the XR2280x I2C interface.
    pub const XR2280X_I2C_PID: u16 = 0x1100;
    /// Product ID of the XR2280x EDGE (GPIO/PWM/Interrupt) interface.
    pub const XR2280X_EDGE_PID: u16 = 0x1200;

    pub const REPORT_ID_WRITE_HID_REGISTER: u8 = 0x3C;
    pub const REPORT_ID_SET_HID_READ_ADDRESS: u8 = 0x4B;
    pub const REPORT_ID_READ_HID_REGISTER: u8 = 0x5A;

    pub const I2C_TIMEOUT_MS: i32 = 500;
    pub const REPORT_MAX_DATA_SIZE: usize = 32;
    // Flags(1) + WrSize(1) + RdSize(1) + SlaveAddr(1) + Data(32)
    pub const OUT_REPORT_WRITE_BUF_SIZE: usize = 36;
    // ReportID(1) + Flags(1) + WrSize(1) + RdSize(1) + Reserved(1) + Data(32)
    pub const IN_REPORT_READ_BUF_SIZE: usize = 36;
    pub const INTERRUPT_REPORT_SIZE: usize = 64;

    pub mod out_flags {
        pub const START_BIT: u8 = 1 << 0;
        pub const STOP_BIT: u8 = 1 << 1;
    }

    pub mod in_flags {
        pub const REQUEST_ERROR: u8 = 1 << 0;
        pub const NAK_RECEIVED: u8 = 1 << 1;
        pub const ARBITRATION_LOST: u8 = 1 << 2;
        pub const TIMEOUT: u8 = 1 << 3;
    }

    // EDGE registers, group 0 (E0-E15) and group 1 (E16-E31).
    pub const REG_FUNC_SEL: [u16; 2] = [0x03C0, 0x03CC];
    pub const REG_DIR: [u16; 2] = [0x03C1, 0x03CD];
    pub const REG_SET: [u16; 2] = [0x03C2, 0x03CE];
    pub const REG_CLEAR: [u16; 2] = [0x03C3, 0x03CF];
    pub const REG_STATE: [u16; 2] = [0x03C4, 0x03D0];
    pub const REG_INTR_MASK: [u16; 2] = [0x03C9, 0x03D5];
    pub const REG_INTR_POS_EDGE: [u16; 2] = [0x03CA, 0x03D6];
    pub const REG_INTR_NEG_EDGE: [u16; 2] = [0x03CB, 0x03D7];

    // PWM channel registers: (CTRL, HIGH, LOW).
    pub const REG_PWM: [(u16, u16, u16); 2] = [(0x03D8, 0x03D9, 0x03DA), (0x03DB, 0x03DC, 0x03DD)];
    pub const PWM_PIN_MASK: u16 = 0b0000_0000_0001_1111;
    pub const PWM_ENABLE: u16 = 0b0000_0000_0010_0000;
    pub const PWM_CMD_SHIFT: u8 = 6;
    pub const PWM_CMD_MASK: u16 = 0b0000_0001_1100_0000;
    pub const PWM_CMD_FREE_RUN: u16 = 0b110;
    // 60 MHz / 16 = 3.75 MHz PWM tick.
    pub const PWM_UNIT_TIME_NS: f64 = 1_000_000_000.0 / (60_000_000.0 / 16.0);
    pub const PWM_MIN_UNITS: u16 = 1;
    pub const PWM_MAX_UNITS: u16 = 4095;
}
