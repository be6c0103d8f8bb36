//! Host backend over a MaxLinear/Exar XR2280x USB-HID bridge.
//!
//! The chip exposes two HID interfaces: an I2C master driven through
//! OUT/IN reports, and an EDGE block (GPIO, PWM, edge interrupts) driven
//! through feature-report register access. GPIO lines map onto EDGE pins
//! E0-E31, clock outputs onto the two PWM channels, and hardware edge
//! interrupts onto the EDGE interrupt report pipe.

use super::{ClockLine, IrqMechanism, IrqSource, Platform};
use crate::consts::hid as reg;
use crate::error::{Error, Result};
use crate::gpio::{GpioLevel, GpioLine};
use crate::i2c::{encode_10bit, I2cAddress};
use crate::lock;
use hidapi::{HidApi, HidDevice};
use log::{debug, trace, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Writes a 16-bit EDGE/I2C controller register via a feature report.
fn write_register(device: &HidDevice, reg_addr: u16, value: u16) -> Result<()> {
    let [lo, hi] = reg_addr.to_le_bytes();
    let [vlo, vhi] = value.to_le_bytes();
    let buf = [reg::REPORT_ID_WRITE_HID_REGISTER, lo, hi, vlo, vhi];
    trace!("Write reg 0x{:04X} = 0x{:04X}: {:02X?}", reg_addr, value, buf);
    device.send_feature_report(&buf).map_err(|e| {
        trace!("send_feature_report error: {}", e);
        Error::FeatureReportError { reg_addr }
    })
}

fn read_register(device: &HidDevice, reg_addr: u16) -> Result<u16> {
    let [lo, hi] = reg_addr.to_le_bytes();
    device
        .send_feature_report(&[reg::REPORT_ID_SET_HID_READ_ADDRESS, lo, hi])
        .map_err(|e| {
            trace!("send_feature_report error: {}", e);
            Error::FeatureReportError { reg_addr }
        })?;

    let mut buf = [0u8; 3];
    buf[0] = reg::REPORT_ID_READ_HID_REGISTER;
    match device.get_feature_report(&mut buf) {
        Ok(len) if len == buf.len() && buf[0] == reg::REPORT_ID_READ_HID_REGISTER => {
            let value = u16::from_le_bytes([buf[1], buf[2]]);
            trace!("Read reg 0x{:04X} = 0x{:04X}", reg_addr, value);
            Ok(value)
        }
        Ok(len) => {
            warn!(
                "Unexpected feature report for reg 0x{:04X}: {} byte(s), ID 0x{:02X}",
                reg_addr, len, buf[0]
            );
            Err(Error::FeatureReportError { reg_addr })
        }
        Err(e) => {
            trace!("get_feature_report error: {}", e);
            Err(Error::FeatureReportError { reg_addr })
        }
    }
}

/// Read-modify-write of the bits in `mask`; skips the write if nothing
/// changes.
fn update_register(device: &HidDevice, reg_addr: u16, mask: u16, bits: u16) -> Result<()> {
    let current = read_register(device, reg_addr)?;
    let next = (current & !mask) | (bits & mask);
    if next != current {
        write_register(device, reg_addr, next)?;
    }
    Ok(())
}

// One OUT report, one IN report. Write and read may both be present, in
// which case the chip issues a repeated start between them.
fn i2c_transfer(
    device: &HidDevice,
    address: I2cAddress,
    write: &[u8],
    read: &mut [u8],
) -> Result<()> {
    let (slave, extra) = match address {
        I2cAddress::Bit7(a) => (a, None),
        I2cAddress::Bit10(a) => {
            let (header, low) = encode_10bit(a);
            (header >> 1, Some(low))
        }
    };
    let write_len = write.len() + usize::from(extra.is_some());
    if write_len > reg::REPORT_MAX_DATA_SIZE || read.len() > reg::REPORT_MAX_DATA_SIZE {
        return Err(Error::OperationTooLarge {
            max: reg::REPORT_MAX_DATA_SIZE,
            actual: write_len.max(read.len()),
        });
    }

    let mut out = [0u8; reg::OUT_REPORT_WRITE_BUF_SIZE];
    out[0] = reg::out_flags::START_BIT | reg::out_flags::STOP_BIT;
    out[1] = write_len as u8;
    out[2] = read.len() as u8;
    out[3] = slave;
    let mut pos = 4;
    if let Some(low) = extra {
        out[pos] = low;
        pos += 1;
    }
    out[pos..pos + write.len()].copy_from_slice(write);
    trace!("I2C OUT {}: {:02X?}", address, &out[..4 + write_len]);

    let written = device.write(&out)?;
    if written != out.len() {
        warn!("Short HID write: {} of {} byte(s)", written, out.len());
        return Err(Error::Io(std::io::Error::other("incomplete HID write")));
    }

    let mut input = [0u8; reg::IN_REPORT_READ_BUF_SIZE];
    let n = device.read_timeout(&mut input, reg::I2C_TIMEOUT_MS)?;
    if n == 0 {
        return Err(Error::I2cTimeout { address });
    }
    trace!("I2C IN {}: {:02X?}", address, &input[..n]);
    if n < 4 {
        return Err(Error::InvalidReport(n));
    }

    let status = input[0];
    if status & reg::in_flags::REQUEST_ERROR != 0 {
        return Err(Error::I2cRequestError { address });
    }
    if status & reg::in_flags::NAK_RECEIVED != 0 {
        return Err(Error::I2cNack { address });
    }
    if status & reg::in_flags::ARBITRATION_LOST != 0 {
        return Err(Error::I2cArbitrationLost { address });
    }
    if status & reg::in_flags::TIMEOUT != 0 {
        return Err(Error::I2cTimeout { address });
    }

    if !read.is_empty() {
        let got = input[2] as usize;
        if got != read.len() || n < 4 + got {
            warn!(
                "I2C read from {} returned {} byte(s), expected {}",
                address,
                got,
                read.len()
            );
            return Err(Error::InvalidReport(n));
        }
        read.copy_from_slice(&input[4..4 + got]);
    }
    Ok(())
}

/// Converts a clock rate to PWM high/low half-period units.
fn pwm_units_for_rate(rate_hz: u32) -> Result<u16> {
    if rate_hz == 0 {
        return Err(Error::ArgumentOutOfRange("clock rate 0 Hz".into()));
    }
    let half_period_ns = 1_000_000_000.0 / rate_hz as f64 / 2.0;
    let units = (half_period_ns / reg::PWM_UNIT_TIME_NS).round();
    if units < reg::PWM_MIN_UNITS as f64 || units > reg::PWM_MAX_UNITS as f64 {
        return Err(Error::ArgumentOutOfRange(format!(
            "clock rate {} Hz not reachable with the PWM tick",
            rate_hz
        )));
    }
    Ok(units as u16)
}

/// The XR2280x host platform.
pub struct HidPlatform {
    name: String,
    i2c: Option<Mutex<HidDevice>>,
    edge: Option<Arc<Mutex<HidDevice>>>,
    outputs: Mutex<HashSet<GpioLine>>,
    // clock -> (PWM channel, output pin)
    clocks: Mutex<HashMap<ClockLine, (usize, GpioLine)>>,
    edge_irq_line: Mutex<Option<GpioLine>>,
}

impl HidPlatform {
    /// Opens the first XR2280x found, with both its I2C and EDGE
    /// interfaces when they share a serial number.
    pub fn open_first(api: &HidApi) -> Result<Self> {
        let mut serial = None;
        let mut i2c = None;
        let mut edge = None;
        for info in api.device_list().filter(|i| i.vendor_id() == reg::EXAR_VID) {
            let sn = info.serial_number().map(str::to_owned);
            if serial.is_some() && sn != serial {
                continue;
            }
            let slot = match info.product_id() {
                reg::XR2280X_I2C_PID => &mut i2c,
                reg::XR2280X_EDGE_PID => &mut edge,
                _ => continue,
            };
            if slot.is_some() {
                continue;
            }
            debug!(
                "Opening XR2280x interface PID={:04X} path={:?} SN={:?}",
                info.product_id(),
                info.path(),
                sn
            );
            *slot = Some(api.open_path(info.path())?);
            serial = sn;
        }
        Self::from_devices(i2c, edge)
    }

    /// Wraps already opened interfaces. At least one must be present.
    pub fn from_devices(i2c: Option<HidDevice>, edge: Option<HidDevice>) -> Result<Self> {
        if i2c.is_none() && edge.is_none() {
            return Err(Error::DeviceNotFound);
        }
        let serial = i2c
            .as_ref()
            .or(edge.as_ref())
            .and_then(|d| d.get_serial_number_string().ok().flatten());
        let name = match serial {
            Some(sn) => format!("xr2280x:{}", sn),
            None => "xr2280x".to_string(),
        };
        debug!(
            "{}: I2C interface {}, EDGE interface {}",
            name,
            if i2c.is_some() { "present" } else { "missing" },
            if edge.is_some() { "present" } else { "missing" }
        );
        Ok(Self {
            name,
            i2c: i2c.map(Mutex::new),
            edge: edge.map(|d| Arc::new(Mutex::new(d))),
            outputs: Mutex::new(HashSet::new()),
            clocks: Mutex::new(HashMap::new()),
            edge_irq_line: Mutex::new(None),
        })
    }

    /// Routes `clock` to PWM `channel` (0 or 1) output on `pin`.
    pub fn assign_clock(&self, clock: ClockLine, channel: usize, pin: GpioLine) -> Result<()> {
        if channel >= reg::REG_PWM.len() {
            return Err(Error::ArgumentOutOfRange(format!(
                "PWM channel {} (0-{})",
                channel,
                reg::REG_PWM.len() - 1
            )));
        }
        let mut clocks = lock(&self.clocks);
        if clocks.iter().any(|(c, (ch, _))| *c != clock && *ch == channel) {
            return Err(Error::Failed(format!("PWM channel {} already in use", channel)));
        }
        clocks.insert(clock, (channel, pin));
        Ok(())
    }

    /// Enables EDGE interrupt generation for `line`, making it a
    /// hardware-edge interrupt source.
    ///
    /// The EDGE interrupt report pipe is shared by all pins, so only one
    /// line can be configured per bridge.
    pub fn enable_interrupt_line(&self, line: GpioLine, rising: bool, falling: bool) -> Result<()> {
        let mut current = lock(&self.edge_irq_line);
        if let Some(other) = *current {
            if other != line {
                return Err(Error::Failed(format!(
                    "EDGE interrupts already routed to GPIO {}",
                    other
                )));
            }
        }
        let edge = self.edge()?;
        let dev = lock(edge);
        let g = line.group_index();
        let bit = line.mask();
        debug!("EDGE interrupt on GPIO {}: rise={}, fall={}", line, rising, falling);
        update_register(&dev, reg::REG_FUNC_SEL[g], bit, bit)?;
        update_register(&dev, reg::REG_DIR[g], bit, 0)?;
        update_register(&dev, reg::REG_INTR_POS_EDGE[g], bit, if rising { bit } else { 0 })?;
        update_register(&dev, reg::REG_INTR_NEG_EDGE[g], bit, if falling { bit } else { 0 })?;
        *current = Some(line);
        Ok(())
    }

    fn i2c(&self) -> Result<&Mutex<HidDevice>> {
        self.i2c.as_ref().ok_or(Error::DeviceNotFound)
    }

    fn edge(&self) -> Result<&Arc<Mutex<HidDevice>>> {
        self.edge.as_ref().ok_or(Error::DeviceNotFound)
    }

    fn ensure_output(&self, dev: &HidDevice, line: GpioLine) -> Result<()> {
        let mut outputs = lock(&self.outputs);
        if outputs.contains(&line) {
            return Ok(());
        }
        let g = line.group_index();
        let bit = line.mask();
        trace!("Configuring GPIO {} as EDGE output", line);
        update_register(dev, reg::REG_FUNC_SEL[g], bit, bit)?;
        update_register(dev, reg::REG_DIR[g], bit, bit)?;
        outputs.insert(line);
        Ok(())
    }
}

impl Platform for HidPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    fn i2c_write(&self, address: I2cAddress, data: &[u8]) -> Result<()> {
        let dev = lock(self.i2c()?);
        i2c_transfer(&dev, address, data, &mut [])
    }

    fn i2c_write_read(&self, address: I2cAddress, write: &[u8], read: &mut [u8]) -> Result<()> {
        let dev = lock(self.i2c()?);
        i2c_transfer(&dev, address, write, read)
    }

    fn gpio_write(&self, line: GpioLine, level: GpioLevel) -> Result<()> {
        let dev = lock(self.edge()?);
        self.ensure_output(&dev, line)?;
        let g = line.group_index();
        let reg_addr = match level {
            GpioLevel::High => reg::REG_SET[g],
            GpioLevel::Low => reg::REG_CLEAR[g],
        };
        trace!("GPIO {} {:?} (reg 0x{:04X})", line, level, reg_addr);
        write_register(&dev, reg_addr, line.mask())
    }

    fn gpio_read(&self, line: GpioLine) -> Result<GpioLevel> {
        let dev = lock(self.edge()?);
        let state = read_register(&dev, reg::REG_STATE[line.group_index()])?;
        Ok(GpioLevel::from(state & line.mask() != 0))
    }

    /// Runs the assigned PWM channel free-running at a 50% duty cycle.
    fn clock_enable(&self, clock: ClockLine, rate_hz: u32) -> Result<()> {
        let Some((channel, pin)) = lock(&self.clocks).get(&clock).copied() else {
            return Err(Error::Unsupported(format!("{} has no PWM channel assigned", clock)));
        };
        let units = pwm_units_for_rate(rate_hz)?;
        let dev = lock(self.edge()?);
        self.ensure_output(&dev, pin)?;
        let (ctrl, high, low) = reg::REG_PWM[channel];
        debug!("{} -> PWM{} on GPIO {}: {} Hz ({} units)", clock, channel, pin, rate_hz, units);
        write_register(&dev, high, units)?;
        write_register(&dev, low, units)?;
        let value = (pin.number() as u16 & reg::PWM_PIN_MASK)
            | (reg::PWM_CMD_FREE_RUN << reg::PWM_CMD_SHIFT)
            | reg::PWM_ENABLE;
        update_register(
            &dev,
            ctrl,
            reg::PWM_PIN_MASK | reg::PWM_CMD_MASK | reg::PWM_ENABLE,
            value,
        )
    }

    fn interrupt_mechanism(&self, line: GpioLine) -> IrqMechanism {
        if *lock(&self.edge_irq_line) == Some(line) {
            IrqMechanism::HardwareEdge
        } else if self.edge.is_some() {
            IrqMechanism::Polling
        } else {
            IrqMechanism::None
        }
    }

    fn acquire_interrupt(
        &self,
        line: GpioLine,
        mechanism: IrqMechanism,
    ) -> Result<Box<dyn IrqSource>> {
        if mechanism != IrqMechanism::HardwareEdge || *lock(&self.edge_irq_line) != Some(line) {
            return Err(Error::Unsupported(format!(
                "{:?} interrupts for GPIO {}",
                mechanism, line
            )));
        }
        let edge = self.edge()?.clone();
        {
            let dev = lock(&edge);
            update_register(&dev, reg::REG_INTR_MASK[line.group_index()], line.mask(), line.mask())?;
        }
        debug!("EDGE interrupt source for GPIO {} acquired", line);
        Ok(Box::new(HidEdgeIrq {
            edge,
            line,
            last_state: None,
        }))
    }
}

/// Interrupt source backed by the EDGE interrupt report pipe.
///
/// Reports carry the pin states of both groups (little-endian, group 0
/// first). An event is counted when this line's state differs from the
/// previous report.
struct HidEdgeIrq {
    edge: Arc<Mutex<HidDevice>>,
    line: GpioLine,
    last_state: Option<bool>,
}

impl IrqSource for HidEdgeIrq {
    fn wait(&mut self, timeout: Duration) -> Result<bool> {
        let mut buf = [0u8; reg::INTERRUPT_REPORT_SIZE];
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let n = lock(&self.edge).read_timeout(&mut buf, timeout_ms)?;
        if n == 0 {
            return Ok(false);
        }
        trace!("EDGE interrupt report ({} bytes): {:02X?}", n, &buf[..n]);
        if n < 4 {
            return Err(Error::InvalidReport(n));
        }
        let g = self.line.group_index() * 2;
        let state = u16::from_le_bytes([buf[g], buf[g + 1]]) & self.line.mask() != 0;
        let fired = self.last_state != Some(state);
        self.last_state = Some(state);
        Ok(fired)
    }

    fn rearm(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Drop for HidEdgeIrq {
    fn drop(&mut self) {
        let dev = lock(&self.edge);
        let reg_addr = reg::REG_INTR_MASK[self.line.group_index()];
        if let Err(e) = update_register(&dev, reg_addr, self.line.mask(), 0) {
            warn!("Masking EDGE interrupt for GPIO {} failed: {}", self.line, e);
        }
    }
}
