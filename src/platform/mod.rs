//! Host platform abstraction.
//!
//! A [`Platform`] turns register-level requests into real bus transactions
//! and GPIO/clock operations on one host environment. Two backends ship
//! with the crate:
//!
//! *   [`hid::HidPlatform`] drives an XR2280x USB-HID I2C/GPIO bridge.
//! *   [`sim::SimPlatform`] simulates register-mapped devices in-process.

use crate::error::Result;
use crate::gpio::{GpioLevel, GpioLine};
use crate::i2c::I2cAddress;
use std::fmt;
use std::time::Duration;

pub mod hid;
pub mod sim;

/// How a GPIO line delivers interrupts on a given platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrqMechanism {
    /// No interrupt capability; a registration is only a record.
    None,
    /// Edge interrupt raised by the GPIO controller.
    HardwareEdge,
    /// Interrupt routed through the power-management controller.
    PowerController,
    /// No interrupt hardware; the line must be polled.
    Polling,
}

/// Clock output selector understood by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockLine(pub u8);

impl fmt::Display for ClockLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clk{}", self.0)
    }
}

/// An acquired interrupt resource for one GPIO line.
///
/// Dropping the source releases the underlying OS/hardware resource.
pub trait IrqSource: Send {
    /// Blocks up to `timeout` for the line to fire. `Ok(true)` means an
    /// event was consumed, `Ok(false)` that the wait elapsed.
    fn wait(&mut self, timeout: Duration) -> Result<bool>;

    /// Re-arms the line after an event was consumed.
    fn rearm(&mut self) -> Result<()>;
}

/// Operations a host environment must provide to the driver stack.
///
/// Implementations are shared between the control thread and interrupt
/// workers, hence `Send + Sync`.
pub trait Platform: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Writes `data` to the slave in one transaction.
    fn i2c_write(&self, address: I2cAddress, data: &[u8]) -> Result<()>;

    /// Writes `write` then reads `read.len()` bytes with a repeated start.
    fn i2c_write_read(&self, address: I2cAddress, write: &[u8], read: &mut [u8]) -> Result<()>;

    /// Drives a GPIO line as an output.
    fn gpio_write(&self, line: GpioLine, level: GpioLevel) -> Result<()>;

    /// Samples a GPIO line.
    fn gpio_read(&self, line: GpioLine) -> Result<GpioLevel>;

    /// Enables a clock output at `rate_hz`.
    fn clock_enable(&self, clock: ClockLine, rate_hz: u32) -> Result<()>;

    /// Interrupt capability of a line on this host.
    fn interrupt_mechanism(&self, line: GpioLine) -> IrqMechanism;

    /// Acquires the interrupt resource for a line.
    fn acquire_interrupt(
        &self,
        line: GpioLine,
        mechanism: IrqMechanism,
    ) -> Result<Box<dyn IrqSource>>;

    /// Quiesces the bus before a device suspend.
    fn bus_suspend(&self) -> Result<()> {
        Ok(())
    }

    /// Wakes the bus before a device resume.
    fn bus_resume(&self) -> Result<()> {
        Ok(())
    }

    /// Blocks for a hardware settle delay.
    fn delay(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    /// Called on an interrupt worker thread before it starts waiting.
    fn boost_current_thread(&self) {}
}
