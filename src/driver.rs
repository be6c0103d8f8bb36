//! Sensor driver lifecycle controller.
//!
//! A [`SensorDriver`] owns the bus services for one attached device and
//! runs each lifecycle operation either through the device plug-in, when
//! the plug-in declares that operation in its [`CustomOps`], or through the
//! table-driven generic path built from the [`DeviceDescriptor`] and
//! [`SensorTables`].

use crate::bus::RegisterBus;
use crate::consts::MAX_SENSOR_MODES;
use crate::error::{bad_state, unsupported_op, Error, Result};
use crate::host::{HostBus, InputStatus, StatusCallback};
use crate::i2c::I2cAddress;
use crate::irq::InterruptController;
use crate::lifecycle::DeviceState;
use crate::param::{ExposureMode, ExposureRequest, FeatureCaps, ParamKind, SensorCapability, SensorParam};
use crate::platform::Platform;
use crate::power::{PowerSequencer, PowerSetting};
use crate::regs::{RegFormat, RegisterSetting};
use bitflags::bitflags;
use log::{debug, info, warn};
use std::sync::Arc;

/// Identification register check performed by generic detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdCheck {
    pub reg: u32,
    pub expected: u32,
    pub mask: u32,
}

/// Static description of one device.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub name: String,
    pub address: I2cAddress,
    pub format: RegFormat,
    pub id: IdCheck,
    pub power_up: PowerSetting,
    pub power_down: PowerSetting,
}

/// Register tables used by the generic path.
#[derive(Debug, Clone)]
pub struct SensorTables {
    pub init: RegisterSetting,
    pub modes: Vec<RegisterSetting>,
    pub start: RegisterSetting,
    pub stop: RegisterSetting,
}

impl SensorTables {
    /// Empty tables in `format`.
    pub fn empty(format: RegFormat) -> Self {
        Self {
            init: RegisterSetting::empty(format),
            modes: Vec::new(),
            start: RegisterSetting::empty(format),
            stop: RegisterSetting::empty(format),
        }
    }
}

bitflags! {
    /// Operations a plug-in implements itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CustomOps: u32 {
        const SET_PLATFORM_TABLE = 1 << 0;
        const POWER_ON = 1 << 1;
        const POWER_OFF = 1 << 2;
        const POWER_SUSPEND = 1 << 3;
        const POWER_RESUME = 1 << 4;
        const DETECT = 1 << 5;
        const DETECT_CHANNELS = 1 << 6;
        const INIT_SETTINGS = 1 << 7;
        const SET_MODE = 1 << 8;
        const START_STREAM = 1 << 9;
        const STOP_STREAM = 1 << 10;
        const GET_PARAM = 1 << 11;
        const SET_PARAM = 1 << 12;
        const CONFIG_RESOLUTION = 1 << 13;
        const QUERY_FIELD = 1 << 14;
    }
}

bitflags! {
    /// Input channels addressed by a streaming or mode request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChannelMask: u32 {
        const CH0 = 1 << 0;
        const CH1 = 1 << 1;
        const CH2 = 1 << 2;
        const CH3 = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Interlaced field parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Even,
    Odd,
}

/// Device-specific operations.
///
/// Every slot has a default that reports `Unsupported`; only the slots
/// listed in [`custom_ops`](Self::custom_ops) are ever called.
pub trait SensorPlugin: Send {
    fn name(&self) -> &str;

    fn custom_ops(&self) -> CustomOps;

    /// Aggregate state the plug-in tracks itself, adopted by the driver
    /// after every custom call.
    fn state(&self) -> Option<DeviceState> {
        None
    }

    fn set_platform_table(&mut self, _host: HostBus) -> Result<()> {
        Err(unsupported_op("set_platform_table"))
    }

    /// Forgets everything learned about the hardware. Called on every
    /// power-off, routed or not, since the device comes back in its reset
    /// state.
    fn reset(&mut self) {}

    fn power_on(&mut self) -> Result<()> {
        Err(unsupported_op("power_on"))
    }

    fn power_off(&mut self) -> Result<()> {
        Err(unsupported_op("power_off"))
    }

    fn power_suspend(&mut self) -> Result<()> {
        Err(unsupported_op("power_suspend"))
    }

    fn power_resume(&mut self) -> Result<()> {
        Err(unsupported_op("power_resume"))
    }

    fn detect(&mut self) -> Result<()> {
        Err(unsupported_op("detect"))
    }

    fn detect_channels(&mut self) -> Result<()> {
        Err(unsupported_op("detect_channels"))
    }

    fn init_settings(&mut self) -> Result<()> {
        Err(unsupported_op("init_settings"))
    }

    fn set_mode(&mut self, _channels: ChannelMask, _mode: usize) -> Result<()> {
        Err(unsupported_op("set_mode"))
    }

    fn start_stream(&mut self, _channels: ChannelMask) -> Result<()> {
        Err(unsupported_op("start_stream"))
    }

    fn stop_stream(&mut self, _channels: ChannelMask) -> Result<()> {
        Err(unsupported_op("stop_stream"))
    }

    fn get_param(&mut self, _kind: ParamKind) -> Result<SensorParam> {
        Err(unsupported_op("get_param"))
    }

    fn set_param(&mut self, _param: &SensorParam) -> Result<()> {
        Err(unsupported_op("set_param"))
    }

    fn config_resolution(&mut self, _resolution: Resolution) -> Result<()> {
        Err(unsupported_op("config_resolution"))
    }

    fn query_field(&mut self) -> Result<Field> {
        Err(unsupported_op("query_field"))
    }
}

enum Route<'a> {
    Generic,
    Custom(&'a mut dyn SensorPlugin),
}

/// Builder returned by [`SensorDriver::builder`].
pub struct DriverBuilder {
    platform: Arc<dyn Platform>,
    descriptor: DeviceDescriptor,
    tables: Option<SensorTables>,
    plugin: Option<Box<dyn SensorPlugin>>,
    capability: Option<Box<dyn SensorCapability>>,
    status: Option<StatusCallback>,
    verify_power: bool,
}

impl DriverBuilder {
    pub fn tables(mut self, tables: SensorTables) -> Self {
        self.tables = Some(tables);
        self
    }

    pub fn plugin(mut self, plugin: Box<dyn SensorPlugin>) -> Self {
        self.plugin = Some(plugin);
        self
    }

    pub fn capability(mut self, capability: Box<dyn SensorCapability>) -> Self {
        self.capability = Some(capability);
        self
    }

    /// Receives input lock reports from the plug-in.
    pub fn status_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(InputStatus) + Send + Sync + 'static,
    {
        self.status = Some(Arc::new(callback));
        self
    }

    /// Read GPIO levels back during power sequences.
    pub fn verify_power(mut self, verify: bool) -> Self {
        self.verify_power = verify;
        self
    }

    /// Creates the bus services and binds the plug-in to them.
    pub fn attach(self) -> Result<SensorDriver> {
        if let Some(tables) = &self.tables {
            if tables.modes.len() > MAX_SENSOR_MODES {
                return Err(Error::OperationTooLarge {
                    max: MAX_SENSOR_MODES,
                    actual: tables.modes.len(),
                });
            }
        }

        let bus = Arc::new(RegisterBus::new(
            self.platform.clone(),
            self.descriptor.address,
        ));
        let power =
            Arc::new(PowerSequencer::new(self.platform.clone()).with_verify(self.verify_power));
        let irq = Arc::new(InterruptController::new(self.platform.clone()));
        let host = HostBus::new(bus.clone(), power.clone(), irq.clone(), self.status);

        let mut plugin = self.plugin;
        let custom = plugin
            .as_ref()
            .map_or(CustomOps::empty(), |p| p.custom_ops());
        if custom.contains(CustomOps::SET_PLATFORM_TABLE) {
            if let Some(p) = plugin.as_mut() {
                p.set_platform_table(host.clone())?;
            }
        }

        info!(
            "Attached {} at {} on {} (custom ops {:?})",
            self.descriptor.name,
            self.descriptor.address,
            self.platform.name(),
            custom
        );
        Ok(SensorDriver {
            descriptor: self.descriptor,
            tables: self.tables,
            plugin,
            capability: self.capability,
            custom,
            bus,
            power,
            irq,
            host,
            state: DeviceState::Invalid,
        })
    }
}

/// Lifecycle controller for one attached sensor or bridge.
pub struct SensorDriver {
    descriptor: DeviceDescriptor,
    tables: Option<SensorTables>,
    plugin: Option<Box<dyn SensorPlugin>>,
    capability: Option<Box<dyn SensorCapability>>,
    custom: CustomOps,
    bus: Arc<RegisterBus>,
    power: Arc<PowerSequencer>,
    irq: Arc<InterruptController>,
    host: HostBus,
    state: DeviceState,
}

impl SensorDriver {
    pub fn builder(platform: Arc<dyn Platform>, descriptor: DeviceDescriptor) -> DriverBuilder {
        DriverBuilder {
            platform,
            descriptor,
            tables: None,
            plugin: None,
            capability: None,
            status: None,
            verify_power: false,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn host(&self) -> &HostBus {
        &self.host
    }

    pub fn interrupts(&self) -> &InterruptController {
        &self.irq
    }

    /// Operations routed to the plug-in.
    pub fn custom_ops(&self) -> CustomOps {
        self.custom
    }

    pub fn power_on(&mut self) -> Result<()> {
        debug!("{}: power on", self.descriptor.name);
        self.dispatch(
            CustomOps::POWER_ON,
            None,
            |p| p.power_on(),
            |d| d.power.execute(&d.descriptor.power_up),
        )
    }

    /// Powers the device down. The device, and any plug-in state, must be
    /// detected again afterwards.
    pub fn power_off(&mut self) -> Result<()> {
        debug!("{}: power off", self.descriptor.name);
        let result = self.dispatch(
            CustomOps::POWER_OFF,
            None,
            |p| p.power_off(),
            |d| d.power.execute(&d.descriptor.power_down),
        );
        if let Some(plugin) = self.plugin.as_deref_mut() {
            plugin.reset();
        }
        self.state = DeviceState::Invalid;
        result
    }

    pub fn power_suspend(&mut self) -> Result<()> {
        self.state.require(
            "power_suspend",
            &[DeviceState::Initialized, DeviceState::Streaming],
        )?;
        self.dispatch(
            CustomOps::POWER_SUSPEND,
            None,
            |p| p.power_suspend(),
            |d| d.power.execute(&d.descriptor.power_down),
        )?;
        self.bus.platform().bus_suspend()?;
        self.state = DeviceState::Suspended;
        info!("{}: suspended", self.descriptor.name);
        Ok(())
    }

    pub fn power_resume(&mut self) -> Result<()> {
        self.state.require("power_resume", &[DeviceState::Suspended])?;
        self.bus.platform().bus_resume()?;
        self.dispatch(
            CustomOps::POWER_RESUME,
            Some(DeviceState::Initialized),
            |p| p.power_resume(),
            |d| d.power.execute(&d.descriptor.power_up),
        )?;
        info!("{}: resumed", self.descriptor.name);
        Ok(())
    }

    /// Confirms the device is present.
    ///
    /// A device that is already past `Detected` keeps its state.
    pub fn detect(&mut self) -> Result<()> {
        let next = match self.state {
            DeviceState::Invalid => DeviceState::Detected,
            later => later,
        };
        self.dispatch(
            CustomOps::DETECT,
            Some(next),
            |p| p.detect(),
            |d| d.generic_detect(),
        )
    }

    pub fn detect_channels(&mut self) -> Result<()> {
        if !self.state.is_present() {
            return Err(bad_state("detect_channels", self.state));
        }
        self.dispatch(
            CustomOps::DETECT_CHANNELS,
            None,
            |p| p.detect_channels(),
            |_| Ok(()),
        )
    }

    pub fn init_registers(&mut self) -> Result<()> {
        self.state.require(
            "init_registers",
            &[DeviceState::Detected, DeviceState::Initialized],
        )?;
        self.dispatch(
            CustomOps::INIT_SETTINGS,
            Some(DeviceState::Initialized),
            |p| p.init_settings(),
            |d| {
                let tables = d.generic_tables("init_registers")?;
                d.bus.write_default(&tables.init)
            },
        )
    }

    pub fn set_mode(&mut self, mode: usize) -> Result<()> {
        self.set_mode_channels(ChannelMask::all(), mode)
    }

    pub fn set_mode_channels(&mut self, channels: ChannelMask, mode: usize) -> Result<()> {
        if mode >= MAX_SENSOR_MODES {
            return Err(Error::ArgumentOutOfRange(format!(
                "mode {} (maximum {})",
                mode,
                MAX_SENSOR_MODES - 1
            )));
        }
        self.state.require(
            "set_mode",
            &[DeviceState::Initialized, DeviceState::Streaming],
        )?;
        self.dispatch(
            CustomOps::SET_MODE,
            None,
            |p| p.set_mode(channels, mode),
            |d| {
                let tables = d.generic_tables("set_mode")?;
                let Some(table) = tables.modes.get(mode) else {
                    return Err(Error::ArgumentOutOfRange(format!(
                        "mode {} ({} mode table(s))",
                        mode,
                        tables.modes.len()
                    )));
                };
                d.bus.write_default(table)
            },
        )
    }

    pub fn start_stream(&mut self) -> Result<()> {
        self.start_stream_channels(ChannelMask::all())
    }

    pub fn start_stream_channels(&mut self, channels: ChannelMask) -> Result<()> {
        self.state.require(
            "start_stream",
            &[DeviceState::Initialized, DeviceState::Streaming],
        )?;
        self.dispatch(
            CustomOps::START_STREAM,
            Some(DeviceState::Streaming),
            |p| p.start_stream(channels),
            |d| {
                let tables = d.generic_tables("start_stream")?;
                d.bus.write_default(&tables.start)
            },
        )
    }

    pub fn stop_stream(&mut self) -> Result<()> {
        self.stop_stream_channels(ChannelMask::all())
    }

    /// Stopping a device that is not streaming succeeds without bus traffic.
    pub fn stop_stream_channels(&mut self, channels: ChannelMask) -> Result<()> {
        if self.state == DeviceState::Initialized {
            debug!("{}: not streaming", self.descriptor.name);
            return Ok(());
        }
        self.state.require("stop_stream", &[DeviceState::Streaming])?;
        self.dispatch(
            CustomOps::STOP_STREAM,
            Some(DeviceState::Initialized),
            |p| p.stop_stream(channels),
            |d| {
                let tables = d.generic_tables("stop_stream")?;
                d.bus.write_default(&tables.stop)
            },
        )
    }

    pub fn config_resolution(&mut self, resolution: Resolution) -> Result<()> {
        self.dispatch(
            CustomOps::CONFIG_RESOLUTION,
            None,
            |p| p.config_resolution(resolution),
            |_| Err(unsupported_op("config_resolution")),
        )
    }

    pub fn query_field(&mut self) -> Result<Field> {
        match self.route(CustomOps::QUERY_FIELD) {
            Route::Custom(p) => p.query_field(),
            Route::Generic => Err(unsupported_op("query_field")),
        }
    }

    /// Applies a parameter through the plug-in or the sensor capability.
    pub fn config_param(&mut self, param: SensorParam) -> Result<()> {
        debug!("{}: set {:?}", self.descriptor.name, param.kind());
        self.dispatch(
            CustomOps::SET_PARAM,
            None,
            |p| p.set_param(&param),
            |d| d.generic_set_param(&param),
        )
    }

    pub fn get_param(&mut self, kind: ParamKind) -> Result<SensorParam> {
        match self.route(CustomOps::GET_PARAM) {
            Route::Custom(p) => p.get_param(kind),
            Route::Generic => match self.capability.as_mut() {
                Some(cap) => cap.get_param(&self.host, kind),
                None => Err(Error::Unsupported(format!(
                    "{} has no parameter capability",
                    self.descriptor.name
                ))),
            },
        }
    }

    fn route(&mut self, op: CustomOps) -> Route<'_> {
        match self.plugin.as_deref_mut() {
            Some(plugin) if self.custom.contains(op) => Route::Custom(plugin),
            _ => Route::Generic,
        }
    }

    // Runs `op` on its resolved route. On success the state moves to
    // `next`; a state reported by the plug-in overrides it.
    fn dispatch<C, G>(
        &mut self,
        op: CustomOps,
        next: Option<DeviceState>,
        custom: C,
        generic: G,
    ) -> Result<()>
    where
        C: FnOnce(&mut dyn SensorPlugin) -> Result<()>,
        G: FnOnce(&mut Self) -> Result<()>,
    {
        let (result, reported) = match self.route(op) {
            Route::Custom(plugin) => {
                let result = custom(&mut *plugin);
                (result, plugin.state())
            }
            Route::Generic => (generic(self), None),
        };
        if let Err(e) = &result {
            if !e.is_unsupported() {
                warn!("{}: {:?} failed: {}", self.descriptor.name, op, e);
            }
        } else if let Some(next) = next {
            self.state = next;
        }
        if let Some(state) = reported {
            self.state = state;
        }
        result
    }

    fn generic_tables(&self, operation: &str) -> Result<&SensorTables> {
        self.tables
            .as_ref()
            .ok_or_else(|| unsupported_op(operation))
    }

    fn generic_detect(&mut self) -> Result<()> {
        let d = &self.descriptor;
        let value = self.bus.read_reg(d.address, d.format, d.id.reg)?;
        let actual = value & d.id.mask;
        let expected = d.id.expected & d.id.mask;
        if actual != expected {
            return Err(Error::IdMismatch {
                address: d.address,
                reg: d.id.reg,
                expected,
                actual,
            });
        }
        info!("{}: detected at {}", d.name, d.address);
        Ok(())
    }

    fn generic_set_param(&mut self, param: &SensorParam) -> Result<()> {
        let Some(cap) = self.capability.as_mut() else {
            return Err(Error::Unsupported(format!(
                "{} has no parameter capability",
                self.descriptor.name
            )));
        };
        match param {
            SensorParam::Exposure(req) if req.mode == ExposureMode::Auto => {
                let values = cap.compute_exposure(req.target_us);
                debug!(
                    "Auto exposure {} us -> {} lines, gain {:.2}/{:.2}",
                    req.target_us, values.integration_lines, values.analog_gain, values.digital_gain
                );
                let resolved = ExposureRequest {
                    mode: ExposureMode::Manual,
                    target_us: req.target_us,
                    values,
                };
                cap.set_param(&self.host, &SensorParam::Exposure(resolved))
            }
            SensorParam::Saturation(_) if !cap.features().contains(FeatureCaps::SATURATION) => {
                Err(Error::Unsupported("saturation control".into()))
            }
            SensorParam::Hue(_) if !cap.features().contains(FeatureCaps::HUE) => {
                Err(Error::Unsupported("hue control".into()))
            }
            other => cap.set_param(&self.host, other),
        }
    }
}

impl Drop for SensorDriver {
    fn drop(&mut self) {
        // Workers may hold clones of the host bus.
        self.irq.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::sim::{SimDevice, SimPlatform};

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            name: "test".into(),
            address: I2cAddress::Bit7(0x10),
            format: RegFormat::A16_D8,
            id: IdCheck {
                reg: 0x0100,
                expected: 0x56,
                mask: 0xFF,
            },
            power_up: PowerSetting::default(),
            power_down: PowerSetting::default(),
        }
    }

    #[test]
    fn test_state_guards_before_traffic() {
        let sim = Arc::new(SimPlatform::new());
        sim.add_device(
            I2cAddress::Bit7(0x10),
            SimDevice::new(RegFormat::A16_D8).with_reg(0x0100, 0x56),
        );
        let mut driver = SensorDriver::builder(sim.clone(), descriptor())
            .tables(SensorTables::empty(RegFormat::A16_D8))
            .attach()
            .unwrap();
        assert!(driver.start_stream().is_err());
        assert!(driver.set_mode(0).is_err());
        assert!(sim.events().is_empty());

        driver.detect().unwrap();
        assert_eq!(driver.state(), DeviceState::Detected);
        driver.init_registers().unwrap();
        assert_eq!(driver.state(), DeviceState::Initialized);
        assert!(driver.query_field().unwrap_err().is_unsupported());
    }
}
