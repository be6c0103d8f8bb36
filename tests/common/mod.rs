//! Shared fixtures for the simulator-backed integration tests.
#![allow(dead_code)]

use gmsl_sensor_hal::{
    DeviceDescriptor, I2cAddress, IdCheck, PowerSetting, RegFormat, SimDevice, SimPlatform,
};
use std::sync::Arc;

pub const DESERIALIZER: I2cAddress = I2cAddress::from_8bit(0x90);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Simulated deserializer with the default identification and revision
/// registers, plus a serializer at each of `serializers` (8-bit addresses).
pub fn bridge_sim(serializers: &[u8]) -> Arc<SimPlatform> {
    let sim = Arc::new(SimPlatform::new());
    sim.add_device(
        DESERIALIZER,
        SimDevice::new(RegFormat::A16_D8)
            .with_reg(0x000D, 0x94)
            .with_reg(0x004C, 0x04),
    );
    for &native in serializers {
        sim.add_device(I2cAddress::from_8bit(native), serializer());
    }
    sim
}

pub fn serializer() -> SimDevice {
    SimDevice::new(RegFormat::A16_D8)
        .with_reg(0x000D, 0x91)
        .with_address_register(0x0000)
}

pub fn bridge_descriptor() -> DeviceDescriptor {
    DeviceDescriptor {
        name: "max9296a".into(),
        address: DESERIALIZER,
        format: RegFormat::A16_D8,
        id: IdCheck {
            reg: 0x000D,
            expected: 0x94,
            mask: 0xFF,
        },
        power_up: PowerSetting::default(),
        power_down: PowerSetting::default(),
    }
}

pub const SENSOR: I2cAddress = I2cAddress::Bit7(0x10);

pub fn sensor_descriptor() -> DeviceDescriptor {
    DeviceDescriptor {
        name: "imx390".into(),
        address: SENSOR,
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

pub fn sensor_sim(id: u32) -> Arc<SimPlatform> {
    let sim = Arc::new(SimPlatform::new());
    sim.add_device(SENSOR, SimDevice::new(RegFormat::A16_D8).with_reg(0x0100, id));
    sim
}
