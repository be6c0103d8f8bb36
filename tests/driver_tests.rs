//! Generic and plug-in routed lifecycle of a single sensor.

mod common;

use approx::assert_relative_eq;
use common::{init_logging, sensor_descriptor, sensor_sim, SENSOR};
use gmsl_sensor_hal::{
    ChannelMask, CustomOps, DeviceState, ErrorKind, ExposureLimits, ExposureMode, ExposureRequest,
    FeatureCaps, Field, GpioLevel, GpioLine, HostBus, ParamKind, PowerSetting, RegEntry, RegFormat,
    RegisterSetting, Resolution, Result, SensorCapability, SensorDriver, SensorParam,
    SensorPlugin, SensorTables, SimEvent,
};
use std::sync::{Arc, Mutex};

fn tables() -> SensorTables {
    let t = |pairs: &[(u32, u32)]| RegisterSetting::from_pairs(RegFormat::A16_D8, pairs).unwrap();
    SensorTables {
        init: RegisterSetting::new(
            RegFormat::A16_D8,
            vec![RegEntry::with_delay(0x0103, 0x01, 5), RegEntry::new(0x3000, 0x12)],
        )
        .unwrap(),
        modes: vec![t(&[(0x0340, 0x08)]), t(&[(0x0340, 0x04), (0x0342, 0x11)])],
        start: t(&[(0x0100, 0x01)]),
        stop: t(&[(0x0100, 0x00)]),
    }
}

fn reset_line() -> GpioLine {
    GpioLine::new(3).unwrap()
}

#[test]
fn test_id_mismatch_stops_bring_up() {
    init_logging();
    let sim = sensor_sim(0x00);
    let mut driver = SensorDriver::builder(sim.clone(), sensor_descriptor())
        .tables(tables())
        .attach()
        .unwrap();

    let err = driver.detect().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Failed);
    assert_eq!(driver.state(), DeviceState::Invalid);

    let err = driver.init_registers().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadState);
    assert_eq!(sim.write_count(), 0);
}

#[test]
fn test_generic_tables_follow_lifecycle() {
    init_logging();
    let sim = sensor_sim(0x56);
    let mut driver = SensorDriver::builder(sim.clone(), sensor_descriptor())
        .tables(tables())
        .attach()
        .unwrap();

    driver.detect().unwrap();
    driver.init_registers().unwrap();
    assert_eq!(sim.writes_to(SENSOR), vec![(0x0103, 0x01), (0x3000, 0x12)]);
    assert_eq!(sim.now().as_millis(), 5);

    sim.clear_events();
    driver.set_mode(1).unwrap();
    assert_eq!(sim.writes_to(SENSOR), vec![(0x0340, 0x04), (0x0342, 0x11)]);

    let err = driver.set_mode(2).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadParameter);
    let err = driver.set_mode(16).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadParameter);

    driver.start_stream().unwrap();
    assert_eq!(driver.state(), DeviceState::Streaming);
    // Mode changes are allowed while streaming.
    driver.set_mode(0).unwrap();
    driver.stop_stream().unwrap();
    assert_eq!(driver.state(), DeviceState::Initialized);

    sim.clear_events();
    driver.stop_stream().unwrap();
    assert!(sim.events().is_empty());

    // Re-detection keeps the later state.
    driver.detect().unwrap();
    assert_eq!(driver.state(), DeviceState::Initialized);
}

#[test]
fn test_too_many_modes_rejected_at_attach() {
    let sim = sensor_sim(0x56);
    let mut t = tables();
    t.modes = vec![RegisterSetting::empty(RegFormat::A16_D8); 17];
    let err = SensorDriver::builder(sim, sensor_descriptor())
        .tables(t)
        .attach()
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::BadParameter);
}

#[test]
fn test_power_sequences_and_suspend() {
    init_logging();
    let sim = sensor_sim(0x56);
    let mut descriptor = sensor_descriptor();
    descriptor.power_up = PowerSetting::default()
        .gpio(reset_line(), GpioLevel::Low, 10)
        .unwrap()
        .gpio(reset_line(), GpioLevel::High, 20)
        .unwrap();
    descriptor.power_down = PowerSetting::default()
        .gpio(reset_line(), GpioLevel::Low, 0)
        .unwrap();
    let mut driver = SensorDriver::builder(sim.clone(), descriptor)
        .tables(tables())
        .attach()
        .unwrap();

    let err = driver.power_suspend().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadState);

    driver.power_on().unwrap();
    assert_eq!(sim.gpio_level(reset_line()), GpioLevel::High);
    assert_eq!(sim.now().as_millis(), 30);
    driver.detect().unwrap();
    driver.init_registers().unwrap();
    sim.clear_events();

    driver.power_suspend().unwrap();
    assert_eq!(driver.state(), DeviceState::Suspended);
    let events = sim.events();
    assert!(matches!(
        events.first(),
        Some(SimEvent::Gpio {
            level: GpioLevel::Low,
            ..
        })
    ));
    assert_eq!(events.last(), Some(&SimEvent::BusSuspend));
    assert_eq!(driver.start_stream().unwrap_err().kind(), ErrorKind::BadState);

    sim.clear_events();
    driver.power_resume().unwrap();
    assert_eq!(driver.state(), DeviceState::Initialized);
    assert_eq!(sim.events().first(), Some(&SimEvent::BusResume));

    driver.power_off().unwrap();
    assert_eq!(driver.state(), DeviceState::Invalid);
    assert_eq!(sim.gpio_level(reset_line()), GpioLevel::Low);
}

#[test]
fn test_failed_power_off_still_invalidates() {
    init_logging();
    let sim = sensor_sim(0x56);
    let mut descriptor = sensor_descriptor();
    descriptor.power_down = PowerSetting::default()
        .gpio(reset_line(), GpioLevel::Low, 0)
        .unwrap();
    let mut driver = SensorDriver::builder(sim.clone(), descriptor)
        .attach()
        .unwrap();
    driver.detect().unwrap();
    sim.fail_gpio(reset_line());

    assert!(driver.power_off().is_err());
    assert_eq!(driver.state(), DeviceState::Invalid);
}

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl Recorder {
    fn push(&self, what: impl Into<String>) {
        self.0.lock().unwrap().push(what.into());
    }

    fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct FieldPlugin {
    calls: Arc<Recorder>,
}

impl SensorPlugin for FieldPlugin {
    fn name(&self) -> &str {
        "field-plugin"
    }

    fn custom_ops(&self) -> CustomOps {
        CustomOps::DETECT | CustomOps::QUERY_FIELD | CustomOps::CONFIG_RESOLUTION | CustomOps::SET_MODE
    }

    fn detect(&mut self) -> Result<()> {
        self.calls.push("detect");
        Ok(())
    }

    fn set_mode(&mut self, channels: ChannelMask, mode: usize) -> Result<()> {
        self.calls.push(format!("set_mode {} {}", channels.bits(), mode));
        Ok(())
    }

    fn query_field(&mut self) -> Result<Field> {
        Ok(Field::Odd)
    }

    fn config_resolution(&mut self, resolution: Resolution) -> Result<()> {
        self.calls
            .push(format!("resolution {}x{}", resolution.width, resolution.height));
        Ok(())
    }

    // Never routed: not declared in custom_ops.
    fn init_settings(&mut self) -> Result<()> {
        self.calls.push("init_settings");
        Ok(())
    }

    fn reset(&mut self) {
        self.calls.push("reset");
    }
}

#[test]
fn test_declared_ops_route_to_plugin() {
    init_logging();
    let sim = sensor_sim(0x00);
    let calls = Arc::new(Recorder::default());
    let mut driver = SensorDriver::builder(sim.clone(), sensor_descriptor())
        .tables(tables())
        .plugin(Box::new(FieldPlugin {
            calls: calls.clone(),
        }))
        .attach()
        .unwrap();

    // The plug-in detects; the mismatching ID register is never read.
    driver.detect().unwrap();
    assert_eq!(driver.state(), DeviceState::Detected);
    assert!(sim.events().is_empty());

    driver.init_registers().unwrap();
    assert_eq!(sim.writes_to(SENSOR).len(), 2);

    driver.set_mode_channels(ChannelMask::CH1, 3).unwrap();
    assert_eq!(driver.query_field().unwrap(), Field::Odd);
    driver
        .config_resolution(Resolution {
            width: 1920,
            height: 1080,
        })
        .unwrap();

    assert_eq!(
        calls.calls(),
        vec!["detect", "set_mode 2 3", "resolution 1920x1080"]
    );
}

#[test]
fn test_power_off_resets_plugin_without_routing() {
    init_logging();
    let sim = sensor_sim(0x00);
    let calls = Arc::new(Recorder::default());
    let mut driver = SensorDriver::builder(sim, sensor_descriptor())
        .plugin(Box::new(FieldPlugin {
            calls: calls.clone(),
        }))
        .attach()
        .unwrap();
    driver.detect().unwrap();

    driver.power_off().unwrap();

    assert_eq!(driver.state(), DeviceState::Invalid);
    assert_eq!(calls.calls(), vec!["detect", "reset"]);
}

#[test]
fn test_undeclared_ops_without_tables_are_unsupported() {
    init_logging();
    let sim = sensor_sim(0x56);
    let mut driver = SensorDriver::builder(sim, sensor_descriptor())
        .attach()
        .unwrap();
    driver.detect().unwrap();

    assert!(driver.init_registers().unwrap_err().is_unsupported());
    assert_eq!(driver.state(), DeviceState::Detected);
    assert!(driver.query_field().unwrap_err().is_unsupported());
    assert!(driver
        .config_resolution(Resolution {
            width: 640,
            height: 480
        })
        .unwrap_err()
        .is_unsupported());
    assert!(driver
        .config_param(SensorParam::Hue(0.0))
        .unwrap_err()
        .is_unsupported());
}

struct Capability {
    applied: Arc<Mutex<Vec<SensorParam>>>,
}

impl SensorCapability for Capability {
    fn features(&self) -> FeatureCaps {
        FeatureCaps::EXPOSURE | FeatureCaps::SATURATION
    }

    fn exposure_limits(&self) -> ExposureLimits {
        ExposureLimits {
            line_time_us: 10.0,
            max_lines: 1000,
            min_gain: 1.0,
            max_analog_gain: 8.0,
            max_digital_gain: 4.0,
        }
    }

    fn set_param(&mut self, host: &HostBus, param: &SensorParam) -> Result<()> {
        if let SensorParam::Exposure(req) = param {
            let lines = req.values.integration_lines;
            let coarse = RegisterSetting::from_pairs(
                RegFormat::A16_D8,
                &[(0x0202, lines >> 8), (0x0203, lines & 0xFF)],
            )?;
            host.write_array(host.default_address(), &coarse)?;
        }
        self.applied.lock().unwrap().push(param.clone());
        Ok(())
    }
}

#[test]
fn test_auto_exposure_is_resolved_before_capability() {
    init_logging();
    let sim = sensor_sim(0x56);
    let applied = Arc::new(Mutex::new(Vec::new()));
    let mut driver = SensorDriver::builder(sim.clone(), sensor_descriptor())
        .capability(Box::new(Capability {
            applied: applied.clone(),
        }))
        .attach()
        .unwrap();

    driver
        .config_param(SensorParam::Exposure(ExposureRequest::auto(20_000.0)))
        .unwrap();
    driver.config_param(SensorParam::Saturation(1.5)).unwrap();
    assert!(driver
        .config_param(SensorParam::Hue(0.25))
        .unwrap_err()
        .is_unsupported());
    assert!(driver
        .get_param(ParamKind::Exposure)
        .unwrap_err()
        .is_unsupported());

    let applied = applied.lock().unwrap();
    assert_eq!(applied.len(), 2);
    let SensorParam::Exposure(req) = &applied[0] else {
        panic!("expected exposure, got {:?}", applied[0]);
    };
    assert_eq!(req.mode, ExposureMode::Manual);
    assert_eq!(req.values.integration_lines, 1000);
    assert_relative_eq!(req.values.analog_gain, 2.0, epsilon = 1e-5);
    assert_relative_eq!(req.values.digital_gain, 1.0);
    assert_eq!(sim.writes_to(SENSOR), vec![(0x0202, 0x03), (0x0203, 0xE8)]);
}
