//! The bus services a driver hands to its plug-in.

use crate::bus::RegisterBus;
use crate::error::{Error, Result};
use crate::gpio::GpioLine;
use crate::i2c::I2cAddress;
use crate::irq::InterruptController;
use crate::platform::Platform;
use crate::power::{PowerSequencer, PowerSetting};
use crate::regs::{RegFormat, RegisterSetting};
use log::trace;
use std::sync::Arc;

/// Lock state of one video input, reported upward by a plug-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputStatus {
    pub channel: u8,
    pub locked: bool,
}

/// Receives [`InputStatus`] reports, possibly from an interrupt worker.
pub type StatusCallback = Arc<dyn Fn(InputStatus) + Send + Sync>;

/// Injection table of bus services for a plug-in.
///
/// Cheap to clone; every clone talks to the same bus, sequencer and
/// interrupt table as the owning driver.
#[derive(Clone)]
pub struct HostBus {
    bus: Arc<RegisterBus>,
    power: Arc<PowerSequencer>,
    irq: Arc<InterruptController>,
    status: Option<StatusCallback>,
}

impl HostBus {
    pub fn new(
        bus: Arc<RegisterBus>,
        power: Arc<PowerSequencer>,
        irq: Arc<InterruptController>,
        status: Option<StatusCallback>,
    ) -> Self {
        Self {
            bus,
            power,
            irq,
            status,
        }
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        self.bus.platform()
    }

    /// Address of the device the driver was attached to.
    pub fn default_address(&self) -> I2cAddress {
        self.bus.default_address()
    }

    /// Reads one register from any slave on the bus.
    pub fn read_reg(&self, address: I2cAddress, format: RegFormat, reg: u32) -> Result<u32> {
        self.bus.read_reg(address, format, reg)
    }

    /// Writes a register table to any slave on the bus.
    pub fn write_array(&self, address: I2cAddress, setting: &RegisterSetting) -> Result<()> {
        self.bus.write(address, setting)
    }

    pub fn write_reg(&self, address: I2cAddress, format: RegFormat, reg: u32, data: u32) -> Result<()> {
        self.bus.write_reg(address, format, reg, data)
    }

    pub fn execute_power(&self, setting: &PowerSetting) -> Result<()> {
        self.power.execute(setting)
    }

    /// Registers a GPIO interrupt in the owning driver's table.
    pub fn setup_gpio_interrupt<F>(&self, line: GpioLine, callback: F) -> Result<()>
    where
        F: Fn(GpioLine) + Send + Sync + 'static,
    {
        self.irq.setup(line, callback)
    }

    /// Stops and unregisters a line set up through
    /// [`setup_gpio_interrupt`](Self::setup_gpio_interrupt).
    pub fn release_gpio_interrupt(&self, line: GpioLine) -> bool {
        self.irq.release(line)
    }

    /// Forwards an input status report to the pipeline, if it listens.
    pub fn report_status(&self, status: InputStatus) -> Result<()> {
        match &self.status {
            Some(cb) => {
                trace!("Input {} lock = {}", status.channel, status.locked);
                cb(status);
                Ok(())
            }
            None => Err(Error::Unsupported(
                "no input status callback registered".into(),
            )),
        }
    }
}
