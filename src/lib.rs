//! # gmsl-sensor-hal
//!
//! A vendor-pluggable driver stack for camera sensors and GMSL2
//! serializer/deserializer bridges that are reachable only over an I²C
//! register bus and a handful of GPIO lines.
//!
//! The stack runs on any host that implements [`Platform`]. Two hosts ship
//! with the crate: an XR2280x USB-HID I²C/GPIO bridge (using the `hidapi`
//! crate) and an in-process simulator.
//!
//! ## Features
//!
//! *   Register transactions (`RegisterBus`):
//!     *   1/2/3-byte register addresses, 1/2/4-byte values, big-endian on the wire.
//!     *   Bounded register tables with per-entry settle delays.
//!     *   Tables always run to completion; failures are counted, not fatal.
//! *   Power sequencing (`PowerSequencer`): ordered clock/GPIO steps with delays,
//!     optional GPIO read-back verification.
//! *   GPIO interrupt delivery (`InterruptController`):
//!     *   Hardware edge, power-controller, polled or record-only lines.
//!     *   Worker threads with cooperative cancellation.
//! *   Sensor lifecycle (`SensorDriver`): power, detect, init, mode, stream and
//!     parameter control, routed per operation to a device plug-in or to a
//!     table-driven generic path.
//! *   GMSL2 bridge link manager (`GmslBridge`): serializer probing, address
//!     remapping, per-link initialization and streaming, lock monitoring.
//! *   TOML topology configuration (`BridgeConfig`) with per-field fallback.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use gmsl_sensor_hal::{
//!     BridgeConfig, DeviceDescriptor, GmslBridge, HidPlatform, I2cAddress, IdCheck,
//!     PowerSetting, RegFormat, Result, SensorDriver,
//! };
//! use hidapi::HidApi;
//! use std::sync::Arc;
//!
//! fn main() -> Result<()> {
//!     env_logger::init();
//!
//!     let api = HidApi::new()?;
//!     let platform = Arc::new(HidPlatform::open_first(&api)?);
//!
//!     let config = BridgeConfig::load("/etc/camera/bridge.toml");
//!     let descriptor = DeviceDescriptor {
//!         name: "max9296a".into(),
//!         address: config.deserializer_address(),
//!         format: RegFormat::A16_D8,
//!         id: IdCheck { reg: 0x000D, expected: 0x94, mask: 0xFF },
//!         power_up: PowerSetting::default(),
//!         power_down: PowerSetting::default(),
//!     };
//!
//!     let mut driver = SensorDriver::builder(platform, descriptor)
//!         .plugin(Box::new(GmslBridge::new(config)?))
//!         .status_callback(|s| println!("input {} locked: {}", s.channel, s.locked))
//!         .attach()?;
//!
//!     driver.power_on()?;
//!     driver.detect()?;
//!     driver.detect_channels()?;
//!     driver.init_registers()?;
//!     driver.start_stream()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Every fallible call returns [`Result`]. [`Error::kind`] maps each error
//! onto `Failed`, `BadParameter`, `NoMemory`, `Unsupported`, `BadState` or
//! `Expired`; callers usually ignore `Unsupported` quietly.
//!
//! ## Logging
//!
//! The crate logs through the `log` facade and never installs a logger.
//! `trace` shows raw bus transactions.
//!
//! ## License
//!
//! This project is licensed under the WTFPL - see the [LICENSE](LICENSE) file for details.

use std::sync::{Mutex, MutexGuard, PoisonError};

mod consts;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod driver;
pub mod error;
pub mod gpio;
pub mod host;
pub mod i2c;
pub mod irq;
pub mod lifecycle;
pub mod param;
pub mod platform;
pub mod power;
pub mod regs;

pub use bridge::{GmslBridge, Link, LinkInfo, LinkState, Topology};
pub use bus::RegisterBus;
pub use config::{BitDepth, BridgeConfig, BridgeRole, LinkConfig};
pub use driver::{
    ChannelMask, CustomOps, DeviceDescriptor, Field, IdCheck, Resolution, SensorDriver,
    SensorPlugin, SensorTables,
};
pub use error::{Error, ErrorKind, Result};
pub use gpio::{GpioLevel, GpioLine};
pub use host::{HostBus, InputStatus};
pub use i2c::I2cAddress;
pub use irq::{CancelToken, InterruptController, RegistrationState};
pub use lifecycle::DeviceState;
pub use param::{
    ExposureLimits, ExposureMode, ExposureRequest, ExposureValues, FeatureCaps, ParamKind,
    SensorCapability, SensorParam,
};
pub use platform::hid::HidPlatform;
pub use platform::sim::{SimDevice, SimEvent, SimPlatform};
pub use platform::{ClockLine, IrqMechanism, IrqSource, Platform};
pub use power::{PowerAction, PowerSequencer, PowerSetting, PowerStep};
pub use regs::{AddrWidth, DataWidth, RegEntry, RegFormat, RegisterSetting};

/// Table and timing limits.
pub mod limits {
    pub use crate::consts::{
        IRQ_POLL_INTERVAL, IRQ_WAIT_SLICE, MAX_GPIO_INTERRUPTS, MAX_GPIO_LINES, MAX_SENSOR_MODES,
        POWER_SETTING_MAX_STEPS, REG_SETTING_MAX_ENTRIES,
    };
}

/// Locks `m`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
