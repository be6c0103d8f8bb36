//! In-process simulated host.
//!
//! Devices are plain register maps keyed by their bus address. Every bus,
//! GPIO, clock and delay operation is appended to an event log with a
//! virtual timestamp, so sequences can be inspected without real hardware
//! and without actually sleeping.

use super::{ClockLine, IrqMechanism, IrqSource, Platform};
use crate::error::{Error, Result};
use crate::gpio::{GpioLevel, GpioLine};
use crate::i2c::I2cAddress;
use crate::lock;
use crate::regs::{decode_be, RegFormat};
use log::trace;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// A simulated I2C register device.
#[derive(Debug, Clone)]
pub struct SimDevice {
    format: RegFormat,
    regs: HashMap<u32, u32>,
    address_register: Option<u32>,
}

impl SimDevice {
    pub fn new(format: RegFormat) -> Self {
        Self {
            format,
            regs: HashMap::new(),
            address_register: None,
        }
    }

    /// Presets a register value.
    pub fn with_reg(mut self, reg: u32, value: u32) -> Self {
        self.regs.insert(reg, value);
        self
    }

    /// Writing this register (8-bit wire address) moves the device to the
    /// new bus address, like a serializer's device-address register.
    pub fn with_address_register(mut self, reg: u32) -> Self {
        self.address_register = Some(reg);
        self
    }
}

/// One observable operation on the simulated host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Write {
        address: I2cAddress,
        reg: u32,
        data: u32,
    },
    Read {
        address: I2cAddress,
        reg: u32,
    },
    Nack {
        address: I2cAddress,
    },
    Gpio {
        line: GpioLine,
        level: GpioLevel,
        at: Duration,
    },
    Clock {
        clock: ClockLine,
        rate_hz: u32,
        at: Duration,
    },
    Delay(Duration),
    BusSuspend,
    BusResume,
}

#[derive(Default)]
struct SimState {
    devices: HashMap<I2cAddress, SimDevice>,
    gpio: HashMap<GpioLine, GpioLevel>,
    failing_gpio: HashSet<GpioLine>,
    stuck_gpio: HashSet<GpioLine>,
    mechanisms: HashMap<GpioLine, IrqMechanism>,
    failing_irq: HashSet<GpioLine>,
    failing_writes: HashSet<I2cAddress>,
    events: Vec<SimEvent>,
    now: Duration,
}

#[derive(Default)]
struct SimIrqLine {
    pending: Mutex<u32>,
    fired: Condvar,
    acquired: AtomicBool,
}

struct SimIrqSource {
    line: Arc<SimIrqLine>,
}

impl IrqSource for SimIrqSource {
    fn wait(&mut self, timeout: Duration) -> Result<bool> {
        let guard = lock(&self.line.pending);
        let (mut pending, _) = self
            .line
            .fired
            .wait_timeout_while(guard, timeout, |p| *p == 0)
            .unwrap_or_else(PoisonError::into_inner);
        if *pending > 0 {
            *pending -= 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn rearm(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Drop for SimIrqSource {
    fn drop(&mut self) {
        self.line.acquired.store(false, Ordering::Release);
    }
}

/// Simulated host platform.
#[derive(Default)]
pub struct SimPlatform {
    state: Mutex<SimState>,
    irq_lines: Mutex<HashMap<GpioLine, Arc<SimIrqLine>>>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a device at `address`, replacing any device already there.
    pub fn add_device(&self, address: I2cAddress, device: SimDevice) {
        lock(&self.state).devices.insert(address, device);
    }

    /// Detaches the device at `address`, as a power cycle or unplug would.
    pub fn remove_device(&self, address: I2cAddress) -> Option<SimDevice> {
        lock(&self.state).devices.remove(&address)
    }

    /// True if a device currently answers at `address`.
    pub fn has_device(&self, address: I2cAddress) -> bool {
        lock(&self.state).devices.contains_key(&address)
    }

    pub fn set_reg(&self, address: I2cAddress, reg: u32, value: u32) {
        if let Some(dev) = lock(&self.state).devices.get_mut(&address) {
            dev.regs.insert(reg, value);
        }
    }

    pub fn reg(&self, address: I2cAddress, reg: u32) -> Option<u32> {
        lock(&self.state)
            .devices
            .get(&address)
            .and_then(|d| d.regs.get(&reg).copied())
    }

    /// Snapshot of the event log.
    pub fn events(&self) -> Vec<SimEvent> {
        lock(&self.state).events.clone()
    }

    pub fn clear_events(&self) {
        lock(&self.state).events.clear();
    }

    /// `(reg, data)` of every register write addressed to `address`, in order.
    pub fn writes_to(&self, address: I2cAddress) -> Vec<(u32, u32)> {
        lock(&self.state)
            .events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Write {
                    address: a,
                    reg,
                    data,
                } if *a == address => Some((*reg, *data)),
                _ => None,
            })
            .collect()
    }

    /// Total register writes on the bus.
    pub fn write_count(&self) -> usize {
        lock(&self.state)
            .events
            .iter()
            .filter(|e| matches!(e, SimEvent::Write { .. }))
            .count()
    }

    /// Virtual time accumulated through [`Platform::delay`].
    pub fn now(&self) -> Duration {
        lock(&self.state).now
    }

    pub fn gpio_level(&self, line: GpioLine) -> GpioLevel {
        lock(&self.state)
            .gpio
            .get(&line)
            .copied()
            .unwrap_or(GpioLevel::Low)
    }

    pub fn set_interrupt_mechanism(&self, line: GpioLine, mechanism: IrqMechanism) {
        lock(&self.state).mechanisms.insert(line, mechanism);
    }

    /// Makes the next interrupt acquisitions on `line` fail.
    pub fn fail_interrupt_acquire(&self, line: GpioLine) {
        lock(&self.state).failing_irq.insert(line);
    }

    /// Makes writes to `line` fail.
    pub fn fail_gpio(&self, line: GpioLine) {
        lock(&self.state).failing_gpio.insert(line);
    }

    /// Makes register writes addressed to `address` fail. Reads still work.
    pub fn fail_writes_to(&self, address: I2cAddress) {
        lock(&self.state).failing_writes.insert(address);
    }

    /// Writes to `line` succeed but the level never changes.
    pub fn stick_gpio(&self, line: GpioLine) {
        lock(&self.state).stuck_gpio.insert(line);
    }

    /// Raises one event on an interrupt line.
    pub fn fire_interrupt(&self, line: GpioLine) {
        let irq = self.irq_line(line);
        *lock(&irq.pending) += 1;
        irq.fired.notify_all();
    }

    /// True while an interrupt source for `line` is held by a worker.
    pub fn interrupt_acquired(&self, line: GpioLine) -> bool {
        lock(&self.irq_lines)
            .get(&line)
            .is_some_and(|l| l.acquired.load(Ordering::Acquire))
    }

    fn irq_line(&self, line: GpioLine) -> Arc<SimIrqLine> {
        lock(&self.irq_lines).entry(line).or_default().clone()
    }
}

impl Platform for SimPlatform {
    fn name(&self) -> &str {
        "sim"
    }

    fn i2c_write(&self, address: I2cAddress, data: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        if state.failing_writes.contains(&address) {
            return Err(Error::Failed(format!("write to {} failed", address)));
        }
        let Some(dev) = state.devices.get_mut(&address) else {
            state.events.push(SimEvent::Nack { address });
            return Err(Error::I2cNack { address });
        };
        let a = dev.format.addr.bytes();
        let d = dev.format.data.bytes();
        if data.len() < a + d || (data.len() - a) % d != 0 {
            return Err(Error::Failed(format!(
                "malformed {}-byte write to {}",
                data.len(),
                address
            )));
        }
        let base = decode_be(&data[..a]);
        let mut writes = Vec::new();
        let mut moved_to = None;
        for (i, chunk) in data[a..].chunks(d).enumerate() {
            let reg = base + i as u32;
            let value = decode_be(chunk);
            dev.regs.insert(reg, value);
            if dev.address_register == Some(reg) {
                moved_to = Some(I2cAddress::from_8bit(value as u8));
            }
            writes.push(SimEvent::Write {
                address,
                reg,
                data: value,
            });
        }
        trace!("sim write {}: {:02X?}", address, data);
        state.events.extend(writes);
        if let Some(new_address) = moved_to {
            if let Some(dev) = state.devices.remove(&address) {
                state.devices.insert(new_address, dev);
            }
        }
        Ok(())
    }

    fn i2c_write_read(&self, address: I2cAddress, write: &[u8], read: &mut [u8]) -> Result<()> {
        let mut state = lock(&self.state);
        let Some(dev) = state.devices.get(&address) else {
            state.events.push(SimEvent::Nack { address });
            return Err(Error::I2cNack { address });
        };
        let a = dev.format.addr.bytes();
        let d = dev.format.data.bytes();
        if write.len() != a || read.is_empty() || read.len() % d != 0 {
            return Err(Error::Failed(format!(
                "malformed read from {} ({} address bytes, {} data bytes)",
                address,
                write.len(),
                read.len()
            )));
        }
        let base = decode_be(write);
        for (i, chunk) in read.chunks_mut(d).enumerate() {
            let value = dev.regs.get(&(base + i as u32)).copied().unwrap_or(0);
            chunk.copy_from_slice(&value.to_be_bytes()[4 - d..]);
        }
        state.events.push(SimEvent::Read { address, reg: base });
        Ok(())
    }

    fn gpio_write(&self, line: GpioLine, level: GpioLevel) -> Result<()> {
        let mut state = lock(&self.state);
        if state.failing_gpio.contains(&line) {
            return Err(Error::Failed(format!("GPIO {} write failed", line)));
        }
        let at = state.now;
        state.events.push(SimEvent::Gpio { line, level, at });
        if !state.stuck_gpio.contains(&line) {
            state.gpio.insert(line, level);
        }
        Ok(())
    }

    fn gpio_read(&self, line: GpioLine) -> Result<GpioLevel> {
        Ok(self.gpio_level(line))
    }

    fn clock_enable(&self, clock: ClockLine, rate_hz: u32) -> Result<()> {
        let mut state = lock(&self.state);
        let at = state.now;
        state.events.push(SimEvent::Clock { clock, rate_hz, at });
        Ok(())
    }

    fn interrupt_mechanism(&self, line: GpioLine) -> IrqMechanism {
        lock(&self.state)
            .mechanisms
            .get(&line)
            .copied()
            .unwrap_or(IrqMechanism::None)
    }

    fn acquire_interrupt(
        &self,
        line: GpioLine,
        mechanism: IrqMechanism,
    ) -> Result<Box<dyn IrqSource>> {
        if lock(&self.state).failing_irq.contains(&line) {
            return Err(Error::Failed(format!(
                "interrupt for GPIO {} ({:?}) unavailable",
                line, mechanism
            )));
        }
        let irq = self.irq_line(line);
        irq.acquired.store(true, Ordering::Release);
        Ok(Box::new(SimIrqSource { line: irq }))
    }

    fn bus_suspend(&self) -> Result<()> {
        lock(&self.state).events.push(SimEvent::BusSuspend);
        Ok(())
    }

    fn bus_resume(&self) -> Result<()> {
        lock(&self.state).events.push(SimEvent::BusResume);
        Ok(())
    }

    fn delay(&self, duration: Duration) {
        let mut state = lock(&self.state);
        state.now += duration;
        state.events.push(SimEvent::Delay(duration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_roundtrip_and_move() {
        let sim = SimPlatform::new();
        let native = I2cAddress::from_8bit(0x88);
        sim.add_device(native, SimDevice::new(RegFormat::A16_D8).with_address_register(0x0000));

        sim.i2c_write(native, &[0x00, 0x10, 0x21]).unwrap();
        let mut buf = [0u8; 1];
        sim.i2c_write_read(native, &[0x00, 0x10], &mut buf).unwrap();
        assert_eq!(buf[0], 0x21);

        sim.i2c_write(native, &[0x00, 0x00, 0x90]).unwrap();
        assert!(!sim.has_device(native));
        assert!(sim.has_device(I2cAddress::Bit7(0x48)));
        assert!(matches!(
            sim.i2c_write(native, &[0x00, 0x00, 0x01]),
            Err(Error::I2cNack { .. })
        ));
    }

    #[test]
    fn test_virtual_delay() {
        let sim = SimPlatform::new();
        sim.delay(Duration::from_millis(10));
        sim.delay(Duration::from_millis(5));
        assert_eq!(sim.now(), Duration::from_millis(15));
    }
}
