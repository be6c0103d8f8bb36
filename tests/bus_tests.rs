//! Register table transactions on the simulated bus.

mod common;

use common::init_logging;
use gmsl_sensor_hal::{
    Error, I2cAddress, Platform, RegEntry, RegFormat, RegisterBus, RegisterSetting, SimDevice,
    SimEvent, SimPlatform,
};
use std::sync::Arc;
use std::time::Duration;

const DEV: I2cAddress = I2cAddress::Bit7(0x36);
const ABSENT: I2cAddress = I2cAddress::Bit7(0x37);

fn bus_with(format: RegFormat) -> (Arc<SimPlatform>, RegisterBus) {
    let sim = Arc::new(SimPlatform::new());
    sim.add_device(DEV, SimDevice::new(format));
    let platform: Arc<dyn Platform> = sim.clone();
    (sim, RegisterBus::new(platform, DEV))
}

#[test]
fn test_table_written_in_order_with_delays() {
    init_logging();
    let (sim, bus) = bus_with(RegFormat::A16_D8);
    let setting = RegisterSetting::new(
        RegFormat::A16_D8,
        vec![
            RegEntry::new(0x0103, 0x01),
            RegEntry::with_delay(0x0100, 0x00, 10),
            RegEntry::new(0x3034, 0x1A),
        ],
    )
    .unwrap();

    bus.write_default(&setting).unwrap();

    assert_eq!(
        sim.events(),
        vec![
            SimEvent::Write { address: DEV, reg: 0x0103, data: 0x01 },
            SimEvent::Write { address: DEV, reg: 0x0100, data: 0x00 },
            SimEvent::Delay(Duration::from_millis(10)),
            SimEvent::Write { address: DEV, reg: 0x3034, data: 0x1A },
        ]
    );
}

#[test]
fn test_failures_do_not_stop_the_table() {
    init_logging();
    let (sim, bus) = bus_with(RegFormat::A16_D8);
    let setting = RegisterSetting::new(
        RegFormat::A16_D8,
        vec![RegEntry::with_delay(0x0001, 0x01, 5), RegEntry::new(0x0002, 0x02)],
    )
    .unwrap();

    let err = bus.write(ABSENT, &setting).unwrap_err();
    assert!(matches!(err, Error::SequenceFailed { failed: 2, total: 2 }));
    // Both entries were attempted and the delay still elapsed.
    let nacks = sim
        .events()
        .iter()
        .filter(|e| matches!(e, SimEvent::Nack { .. }))
        .count();
    assert_eq!(nacks, 2);
    assert_eq!(sim.now(), Duration::from_millis(5));

    let single = RegisterSetting::single(RegFormat::A16_D8, 0x0001, 0x01).unwrap();
    assert!(matches!(
        bus.write(ABSENT, &single),
        Err(Error::I2cNack { address: ABSENT })
    ));
}

#[test]
fn test_wide_values_are_big_endian() {
    init_logging();
    let (sim, bus) = bus_with(RegFormat::A16_D16);
    bus.write_reg(DEV, RegFormat::A16_D16, 0x0202, 0x0A1B).unwrap();

    assert_eq!(sim.reg(DEV, 0x0202), Some(0x0A1B));
    assert_eq!(bus.read_reg(DEV, RegFormat::A16_D16, 0x0202).unwrap(), 0x0A1B);

    let mut readback = RegisterSetting::from_pairs(RegFormat::A16_D16, &[(0x0202, 0)]).unwrap();
    bus.read(DEV, &mut readback).unwrap();
    assert_eq!(readback.entries()[0].data, 0x0A1B);
}

#[test]
fn test_values_must_fit_the_format() {
    assert!(RegisterSetting::single(RegFormat::A16_D8, 0x0100, 0x1FF).is_err());
    assert!(RegisterSetting::single(RegFormat::A8_D8, 0x1_00, 0x01).is_err());
    let too_long = vec![RegEntry::new(0, 0); gmsl_sensor_hal::limits::REG_SETTING_MAX_ENTRIES + 1];
    assert!(RegisterSetting::new(RegFormat::A8_D8, too_long).is_err());
}
