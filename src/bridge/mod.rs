//! GMSL2 bridge link manager.
//!
//! [`GmslBridge`] is a [`SensorPlugin`] for a two-link deserializer. It
//! probes the serializer behind each link, moves it and its sensor to
//! unique alias addresses, and then drives the per-link and aggregate
//! state through initialization and streaming.

mod link;
mod regmap;

pub use link::{Link, LinkInfo, LinkMap, LinkState, Topology};
pub use regmap::{BridgeRegisterMap, BridgeTables, DepthTables, ModeTables, RevisionTables, StatusBit};

use crate::config::{BridgeConfig, BridgeRole};
use crate::driver::{ChannelMask, CustomOps, SensorPlugin};
use crate::error::{bad_state, Error, Result};
use crate::gpio::GpioLine;
use crate::host::{HostBus, InputStatus};
use crate::i2c::I2cAddress;
use crate::lifecycle::DeviceState;
use crate::lock;
use crate::regs::RegisterSetting;
use log::{debug, info, trace, warn};
use std::sync::{Arc, Mutex};

/// Deserializer silicon generation, picked from its revision register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Revision {
    Legacy,
    Current,
}

/// Link manager for one deserializer and up to two serializers.
pub struct GmslBridge {
    config: BridgeConfig,
    regmap: BridgeRegisterMap,
    tables: BridgeTables,
    host: Option<HostBus>,
    // Serialises every register sequence, including the lock monitor's,
    // and holds the enabled-link mask.
    shared: Arc<Mutex<ChannelMask>>,
    state: DeviceState,
    revision: Option<Revision>,
    links: LinkMap<LinkInfo>,
    streaming: ChannelMask,
    sensor_count: u8,
    topology: Topology,
    lock_monitor: Option<GpioLine>,
    // Line registered by `enable_lock_monitor`, released on drop.
    monitor_line: Option<GpioLine>,
}

impl GmslBridge {
    /// A bridge with the default MAX9296A/MAX9295A register layout.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        Ok(Self::with_parts(
            config,
            BridgeRegisterMap::default(),
            BridgeTables::max9296a()?,
        ))
    }

    pub fn with_parts(config: BridgeConfig, regmap: BridgeRegisterMap, tables: BridgeTables) -> Self {
        Self {
            config,
            regmap,
            tables,
            host: None,
            shared: Arc::new(Mutex::new(ChannelMask::empty())),
            state: DeviceState::Invalid,
            revision: None,
            links: LinkMap::default(),
            streaming: ChannelMask::empty(),
            sensor_count: 0,
            topology: Topology::None,
            lock_monitor: None,
            monitor_line: None,
        }
    }

    /// Starts the lock monitor on `line` as soon as the bus is handed over.
    pub fn with_lock_monitor(mut self, line: GpioLine) -> Self {
        self.lock_monitor = Some(line);
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn device_state(&self) -> DeviceState {
        self.state
    }

    pub fn link(&self, link: Link) -> &LinkInfo {
        &self.links[link]
    }

    /// Links with a remapped serializer (or, in receiver role, a configured
    /// sensor).
    pub fn enabled(&self) -> ChannelMask {
        *lock(&self.shared)
    }

    pub fn streaming(&self) -> ChannelMask {
        self.streaming
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn sensor_count(&self) -> u8 {
        self.sensor_count
    }

    pub fn revision(&self) -> Option<Revision> {
        self.revision
    }

    /// Reports the lock state of every enabled link through the host's
    /// input-status callback whenever `line` fires.
    ///
    /// The worker holds a clone of the host bus. It is stopped when the
    /// bridge is dropped, or earlier when the owning driver tears down its
    /// interrupt table.
    pub fn enable_lock_monitor(&mut self, line: GpioLine) -> Result<()> {
        let host = self.host("enable_lock_monitor")?.clone();
        let shared = self.shared.clone();
        let deser = self.config.deserializer_address();
        let format = self.regmap.deser_format;
        let bits = self.regmap.lock_status;
        let reporter = host.clone();

        host.setup_gpio_interrupt(line, move |_| {
            let enabled = lock(&shared);
            for (link, bit) in bits.iter() {
                if !enabled.contains(link.mask()) {
                    continue;
                }
                match reporter.read_reg(deser, format, bit.reg) {
                    Ok(value) => {
                        let status = InputStatus {
                            channel: link.index() as u8,
                            locked: value & bit.mask != 0,
                        };
                        if let Err(e) = reporter.report_status(status) {
                            trace!("Lock status for {} not delivered: {}", link, e);
                        }
                    }
                    Err(e) => warn!("Reading lock status of {} failed: {}", link, e),
                }
            }
        })?;
        self.monitor_line = Some(line);
        info!("Lock monitor enabled on GPIO {}", line);
        Ok(())
    }

    fn host(&self, operation: &'static str) -> Result<&HostBus> {
        self.host.as_ref().ok_or(bad_state(operation, self.state))
    }

    fn is_sender(&self) -> bool {
        self.config.role == BridgeRole::Sender
    }

    fn deserializer(&self) -> I2cAddress {
        self.config.deserializer_address()
    }

    fn read_revision(&self, host: &HostBus) -> Revision {
        let map = &self.regmap;
        match host.read_reg(self.deserializer(), map.deser_format, map.revision_reg) {
            Ok(value) if value & map.revision_mask <= map.legacy_revision_max => Revision::Legacy,
            Ok(_) => Revision::Current,
            Err(e) => {
                warn!("Reading deserializer revision failed ({}); assuming current", e);
                Revision::Current
            }
        }
    }

    // Finds the serializer behind `link` and moves it, and the sensor behind
    // it, to the link's alias addresses.
    fn remap_link(&mut self, host: &HostBus, link: Link, enabled: &mut ChannelMask) -> Result<()> {
        let deser = self.deserializer();
        let map = self.regmap.clone();
        let plan = self.config.links[link].clone();

        host.write_reg(deser, map.deser_format, map.link_ctrl_reg, map.link_select[link])?;

        let native = plan.candidate_addresses().find(|&address| {
            match host.read_reg(address, map.ser_format, map.ser_id.reg) {
                Ok(value) if value & map.ser_id.mask == map.ser_id.expected & map.ser_id.mask => true,
                Ok(value) => {
                    debug!("{}: {} answered with ID 0x{:X}", link, address, value);
                    false
                }
                Err(_) => false,
            }
        });
        let Some(native) = native else {
            info!("{}: no serializer found, nothing connected", link);
            return Ok(());
        };
        debug!("{}: serializer at {}", link, native);
        self.links[link].state = LinkState::SerializerDetected;
        self.links[link].serializer_native = Some(native);

        let alias = I2cAddress::from_8bit(plan.serializer_alias);
        if let Err(e) = self.program_link(host, link, native, alias) {
            // The serializer may already sit at the alias; treat the link as empty.
            self.links[link] = LinkInfo::default();
            return Err(e);
        }

        let info = &mut self.links[link];
        info.state = LinkState::Detected;
        info.serializer_alias = Some(alias);
        info.sensor_alias = Some(I2cAddress::from_8bit(plan.sensor_alias));
        *enabled |= link.mask();
        info!("{}: serializer {} remapped to {}", link, native, alias);
        Ok(())
    }

    // Moves the serializer to `alias`, resets the link and programs the
    // sensor and broadcast address translation.
    fn program_link(
        &self,
        host: &HostBus,
        link: Link,
        native: I2cAddress,
        alias: I2cAddress,
    ) -> Result<()> {
        let deser = self.deserializer();
        let map = &self.regmap;
        let plan = &self.config.links[link];

        host.write_reg(native, map.ser_format, map.ser_address_reg, plan.serializer_alias as u32)?;
        host.write_array(deser, &map.link_reset_setting(link)?)?;

        let translation = RegisterSetting::from_pairs(
            map.ser_format,
            &[
                (map.sensor_src_reg, plan.sensor_alias as u32),
                (map.sensor_dst_reg, plan.sensor_native as u32),
                (map.broadcast_src_reg, self.config.broadcast_alias as u32),
                (map.broadcast_dst_reg, plan.serializer_alias as u32),
                (map.stream_id_reg, map.stream_id[link]),
            ],
        )?;
        host.write_array(alias, &translation)?;

        let readback = host.read_reg(alias, map.ser_format, map.ser_address_reg)?;
        if readback != plan.serializer_alias as u32 {
            warn!(
                "{}: serializer address register reads 0x{:02X}, expected 0x{:02X}",
                link, readback, plan.serializer_alias
            );
        }
        Ok(())
    }

    fn update_topology(&mut self, enabled: ChannelMask) {
        self.sensor_count = Link::ALL
            .iter()
            .filter(|l| enabled.contains(l.mask()))
            .count() as u8;
        self.topology = Topology::from_mask(enabled);
    }

    // Undoes a partial stream start.
    fn revert_started(&mut self, host: &HostBus, started: ChannelMask) {
        for link in Link::ALL {
            if !started.contains(link.mask()) {
                continue;
            }
            if self.is_sender() {
                if let Some(alias) = self.links[link].serializer_alias {
                    if let Err(e) = host.write_array(alias, &self.tables.ser_stop) {
                        warn!("{}: serializer stop during revert failed: {}", link, e);
                    }
                }
            }
            self.links[link].state = LinkState::Initialized;
        }
    }
}

impl Drop for GmslBridge {
    fn drop(&mut self) {
        if let (Some(line), Some(host)) = (self.monitor_line.take(), self.host.as_ref()) {
            if host.release_gpio_interrupt(line) {
                debug!("Lock monitor on GPIO {} stopped", line);
            }
        }
    }
}

impl SensorPlugin for GmslBridge {
    fn name(&self) -> &str {
        "gmsl2-bridge"
    }

    fn custom_ops(&self) -> CustomOps {
        CustomOps::SET_PLATFORM_TABLE
            | CustomOps::POWER_SUSPEND
            | CustomOps::POWER_RESUME
            | CustomOps::DETECT
            | CustomOps::DETECT_CHANNELS
            | CustomOps::INIT_SETTINGS
            | CustomOps::START_STREAM
            | CustomOps::STOP_STREAM
    }

    fn state(&self) -> Option<DeviceState> {
        Some(self.state)
    }

    fn reset(&mut self) {
        *lock(&self.shared) = ChannelMask::empty();
        self.state = DeviceState::Invalid;
        self.revision = None;
        self.links = LinkMap::default();
        self.streaming = ChannelMask::empty();
        self.sensor_count = 0;
        self.topology = Topology::None;
        debug!("Bridge state cleared");
    }

    fn set_platform_table(&mut self, host: HostBus) -> Result<()> {
        self.host = Some(host);
        if let Some(line) = self.lock_monitor {
            self.enable_lock_monitor(line)?;
        }
        Ok(())
    }

    fn power_suspend(&mut self) -> Result<()> {
        self.state.require(
            "power_suspend",
            &[DeviceState::Initialized, DeviceState::Streaming],
        )?;
        for link in Link::ALL {
            if self.links[link].state == LinkState::Streaming {
                self.links[link].state = LinkState::Initialized;
            }
        }
        self.streaming = ChannelMask::empty();
        self.state = DeviceState::Suspended;
        Ok(())
    }

    fn power_resume(&mut self) -> Result<()> {
        self.state.require("power_resume", &[DeviceState::Suspended])?;
        self.state = DeviceState::Initialized;
        Ok(())
    }

    /// Identifies the deserializer. The first successful detection also
    /// remaps the links; later calls only re-identify. Link failures are
    /// logged and do not fail detection.
    fn detect(&mut self) -> Result<()> {
        let host = self.host("detect")?.clone();
        let shared = self.shared.clone();
        let mut enabled = lock(&shared);
        let deser = self.deserializer();
        let map = &self.regmap;

        let value = host.read_reg(deser, map.deser_format, map.deser_id.reg)?;
        let (actual, expected) = (value & map.deser_id.mask, map.deser_id.expected & map.deser_id.mask);
        if actual != expected {
            return Err(Error::IdMismatch {
                address: deser,
                reg: map.deser_id.reg,
                expected,
                actual,
            });
        }

        if !self.is_sender() {
            host.write_array(deser, &self.tables.receiver_patch)?;
        }
        let revision = self.read_revision(&host);
        self.revision = Some(revision);
        if self.state != DeviceState::Invalid {
            debug!("Deserializer at {} still present", deser);
            return Ok(());
        }
        self.state = DeviceState::Detected;
        info!("Deserializer detected at {} ({:?} revision)", deser, revision);

        for link in Link::ALL {
            if self.links[link].state >= LinkState::Detected {
                trace!("{} already detected", link);
                continue;
            }
            if let Err(e) = self.remap_link(&host, link, &mut enabled) {
                warn!("{}: remap failed: {}", link, e);
            }
        }
        if self.is_sender() {
            self.update_topology(*enabled);
        }
        Ok(())
    }

    fn detect_channels(&mut self) -> Result<()> {
        let shared = self.shared.clone();
        let mut enabled = lock(&shared);
        if !self.is_sender() {
            let count = self.config.sensor_count.min(Link::ALL.len() as u8);
            for link in Link::ALL.into_iter().take(count as usize) {
                if self.links[link].state < LinkState::Detected {
                    self.links[link].state = LinkState::Detected;
                }
                *enabled |= link.mask();
            }
        }
        self.update_topology(*enabled);
        info!(
            "{} sensor(s) behind the deserializer, topology {:?}",
            self.sensor_count, self.topology
        );
        Ok(())
    }

    /// Writes the per-link bit-depth tables (link B first), the revision
    /// fixups and the deserializer mode table.
    fn init_settings(&mut self) -> Result<()> {
        if self.sensor_count == 0 {
            info!("No sensors connected; nothing to initialize");
            self.state = DeviceState::Initialized;
            return Ok(());
        }
        let host = self.host("init_settings")?.clone();
        let shared = self.shared.clone();
        let enabled = lock(&shared);
        let deser = self.deserializer();
        let depth = self.config.bit_depth;
        let tables = &self.tables;

        let mut total = 0usize;
        let mut failed = 0usize;
        let mut apply = |what: &str, address: I2cAddress, setting: &RegisterSetting| {
            total += 1;
            if let Err(e) = host.write_array(address, setting) {
                warn!("{} table at {} failed: {}", what, address, e);
                failed += 1;
            }
        };

        for link in [Link::B, Link::A] {
            if !enabled.contains(link.mask()) {
                continue;
            }
            debug!("{}: {} bit-depth tables", link, depth);
            apply("deserializer bit-depth", deser, tables.deser_depth[link].get(depth));
            if self.config.role == BridgeRole::Sender {
                match self.links[link].serializer_alias {
                    Some(alias) => apply("serializer bit-depth", alias, tables.ser_depth.get(depth)),
                    None => warn!("{}: enabled without a serializer alias", link),
                }
            }
        }
        let fixups = match self.revision.unwrap_or(Revision::Current) {
            Revision::Legacy => &tables.revision.legacy,
            Revision::Current => &tables.revision.current,
        };
        apply("revision fixup", deser, fixups);
        if let Some(mode) = tables.deser_mode(self.config.role).get(self.topology) {
            apply("deserializer mode", deser, mode);
        }

        if failed > 0 {
            return Err(Error::SequenceFailed { failed, total });
        }
        for link in Link::ALL {
            if enabled.contains(link.mask()) {
                self.links[link].state = LinkState::Initialized;
            }
        }
        self.state = DeviceState::Initialized;
        info!("Bridge initialized ({:?}, {})", self.topology, depth);
        Ok(())
    }

    /// Starts the requested links that are initialized; links in any other
    /// state are skipped.
    fn start_stream(&mut self, channels: ChannelMask) -> Result<()> {
        self.state.require(
            "start_stream",
            &[DeviceState::Initialized, DeviceState::Streaming],
        )?;
        let host = self.host("start_stream")?.clone();
        let shared = self.shared.clone();
        let _guard = lock(&shared);
        let deser = self.deserializer();

        let mut started = ChannelMask::empty();
        let mut last_error = None;
        for link in Link::ALL {
            if !channels.contains(link.mask()) {
                continue;
            }
            if self.links[link].state != LinkState::Initialized {
                debug!("{} is {:?}; not starting", link, self.links[link].state);
                continue;
            }
            if self.is_sender() {
                let Some(alias) = self.links[link].serializer_alias else {
                    warn!("{}: no serializer alias; not starting", link);
                    continue;
                };
                if let Err(e) = host.write_array(alias, &self.tables.ser_start) {
                    warn!("{}: serializer start failed: {}", link, e);
                    last_error = Some(e);
                    continue;
                }
            }
            self.links[link].state = LinkState::Streaming;
            started |= link.mask();
        }

        if started.is_empty() {
            return match last_error {
                Some(e) => Err(e),
                None => Ok(()),
            };
        }
        if self.state == DeviceState::Initialized {
            if let Some(table) = self.tables.deser_start.get(self.topology) {
                if let Err(e) = host.write_array(deser, table) {
                    warn!("Deserializer start failed: {}", e);
                    self.revert_started(&host, started);
                    return Err(e);
                }
            }
            self.state = DeviceState::Streaming;
        }
        self.streaming |= started;
        info!("Streaming {:?}", self.streaming);
        Ok(())
    }

    /// Stops the requested links. The deserializer output is stopped once
    /// the last streaming link goes away.
    fn stop_stream(&mut self, channels: ChannelMask) -> Result<()> {
        if self.state != DeviceState::Streaming {
            return Ok(());
        }
        let host = self.host("stop_stream")?.clone();
        let shared = self.shared.clone();
        let _guard = lock(&shared);
        let deser = self.deserializer();

        let mut result = Ok(());
        let was_streaming = self.streaming;
        self.streaming.remove(channels);
        if !was_streaming.is_empty() && self.streaming.is_empty() {
            if let Err(e) = host.write_array(deser, &self.tables.deser_stop) {
                warn!("Deserializer stop failed: {}", e);
                result = Err(e);
            }
            self.state = DeviceState::Initialized;
        }

        for link in Link::ALL {
            if !channels.contains(link.mask()) || self.links[link].state != LinkState::Streaming {
                continue;
            }
            if self.is_sender() {
                if let Some(alias) = self.links[link].serializer_alias {
                    if let Err(e) = host.write_array(alias, &self.tables.ser_stop) {
                        warn!("{}: serializer stop failed: {}", link, e);
                        result = Err(e);
                    }
                }
            }
            self.links[link].state = LinkState::Initialized;
        }
        info!("Streaming {:?}", self.streaming);
        result
    }
}
