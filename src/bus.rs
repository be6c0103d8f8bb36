//! Register transactions over the host bus.

use crate::error::{Error, Result};
use crate::i2c::I2cAddress;
use crate::lock;
use crate::platform::Platform;
use crate::regs::{decode_be, RegFormat, RegisterSetting};
use log::{debug, trace, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct BusState {
    // (format, address bytes, data bytes) of the last format seen.
    widths: Option<(RegFormat, usize, usize)>,
}

impl BusState {
    fn widths(&mut self, format: RegFormat) -> (usize, usize) {
        match self.widths {
            Some((cached, a, d)) if cached == format => (a, d),
            _ => {
                let (a, d) = (format.addr.bytes(), format.data.bytes());
                trace!("Register widths now {} address / {} data byte(s)", a, d);
                self.widths = Some((format, a, d));
                (a, d)
            }
        }
    }
}

/// Serialised register access to the devices behind one platform instance.
///
/// Every call holds the internal lock for its whole duration, including
/// inter-entry delays, so callers never interleave register traffic.
/// There is no retry at this layer.
pub struct RegisterBus {
    platform: Arc<dyn Platform>,
    default_address: I2cAddress,
    state: Mutex<BusState>,
}

impl RegisterBus {
    pub fn new(platform: Arc<dyn Platform>, default_address: I2cAddress) -> Self {
        Self {
            platform,
            default_address,
            state: Mutex::new(BusState::default()),
        }
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// The owning device's own address.
    pub fn default_address(&self) -> I2cAddress {
        self.default_address
    }

    /// Reads one register.
    pub fn read_reg(&self, address: I2cAddress, format: RegFormat, reg: u32) -> Result<u32> {
        let mut state = lock(&self.state);
        let (_, d) = state.widths(format);
        self.read_locked(address, format, d, reg)
    }

    /// Fills the data field of every entry in `setting` from the device.
    /// Stops at the first failing read.
    pub fn read(&self, address: I2cAddress, setting: &mut RegisterSetting) -> Result<()> {
        let format = setting.format();
        let mut state = lock(&self.state);
        let (_, d) = state.widths(format);
        for entry in setting.entries_mut() {
            entry.data = self.read_locked(address, format, d, entry.reg)?;
        }
        Ok(())
    }

    /// Writes every entry of `setting` in order, one bus write per entry.
    ///
    /// A failing entry is logged and the remaining entries are still
    /// written. A single-entry setting returns the bus error itself;
    /// longer settings report `SequenceFailed`.
    pub fn write(&self, address: I2cAddress, setting: &RegisterSetting) -> Result<()> {
        let format = setting.format();
        let mut state = lock(&self.state);
        let _ = state.widths(format);
        debug!("Writing {} register(s) to {}", setting.len(), address);

        let mut failed = 0usize;
        let mut last_error = None;
        for entry in setting.entries() {
            let buf = format.encode_write(entry.reg, entry.data);
            trace!("I2C write {}: {:02X?}", address, buf);
            if let Err(e) = self.platform.i2c_write(address, &buf) {
                warn!(
                    "Write of 0x{:X} to register 0x{:X} at {} failed: {}",
                    entry.data, entry.reg, address, e
                );
                failed += 1;
                last_error = Some(e);
            }
            if entry.delay_ms > 0 {
                self.platform
                    .delay(Duration::from_millis(entry.delay_ms as u64));
            }
        }

        match (failed, last_error) {
            (0, _) | (_, None) => Ok(()),
            (_, Some(e)) if setting.len() == 1 => Err(e),
            (failed, Some(_)) => Err(Error::SequenceFailed {
                failed,
                total: setting.len(),
            }),
        }
    }

    /// Writes `setting` to the owning device's address.
    pub fn write_default(&self, setting: &RegisterSetting) -> Result<()> {
        self.write(self.default_address, setting)
    }

    /// Writes a single register.
    pub fn write_reg(
        &self,
        address: I2cAddress,
        format: RegFormat,
        reg: u32,
        data: u32,
    ) -> Result<()> {
        let setting = RegisterSetting::single(format, reg, data)?;
        self.write(address, &setting)
    }

    fn read_locked(
        &self,
        address: I2cAddress,
        format: RegFormat,
        data_bytes: usize,
        reg: u32,
    ) -> Result<u32> {
        let mut buf = [0u8; 4];
        let out = &mut buf[..data_bytes];
        self.platform
            .i2c_write_read(address, &format.encode_reg(reg), out)?;
        let value = decode_be(out);
        trace!("I2C read {} reg 0x{:X} = 0x{:X}", address, reg, value);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::sim::{SimDevice, SimPlatform};
    use crate::regs::RegEntry;

    #[test]
    fn test_width_cache_follows_format() {
        let mut state = BusState::default();
        assert_eq!(state.widths(RegFormat::A16_D8), (2, 1));
        assert_eq!(state.widths(RegFormat::A16_D8), (2, 1));
        assert_eq!(state.widths(RegFormat::A16_D16), (2, 2));
    }

    #[test]
    fn test_single_entry_failure_is_passed_through() {
        let sim = Arc::new(SimPlatform::new());
        let bus = RegisterBus::new(sim.clone(), I2cAddress::Bit7(0x10));
        let err = bus
            .write_reg(I2cAddress::Bit7(0x10), RegFormat::A16_D8, 0x10, 0x01)
            .unwrap_err();
        assert!(matches!(err, Error::I2cNack { .. }));

        sim.add_device(I2cAddress::Bit7(0x10), SimDevice::new(RegFormat::A16_D8));
        let setting = RegisterSetting::new(
            RegFormat::A16_D8,
            vec![RegEntry::new(0x10, 1), RegEntry::with_delay(0x11, 2, 3)],
        )
        .unwrap();
        bus.write_default(&setting).unwrap();
        assert_eq!(sim.now(), Duration::from_millis(3));
    }
}
