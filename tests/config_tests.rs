//! Bridge configuration parsing and fallback.

mod common;

use common::init_logging;
use gmsl_sensor_hal::{BitDepth, BridgeConfig, BridgeRole, ErrorKind, I2cAddress, Link};
use std::io::Write;

#[test]
fn test_full_file() {
    let config = BridgeConfig::try_from_toml_str(
        r#"
        role = "receiver"
        sensor_count = 1
        bit_depth = 8
        deserializer = 0x94
        broadcast_alias = 0x8C

        [link_a]
        candidates = [0x80]
        serializer_alias = 0x86
        sensor_native = 0x34
        sensor_alias = 0x36
        "#,
    )
    .unwrap();

    assert_eq!(config.role, BridgeRole::Receiver);
    assert_eq!(config.sensor_count, 1);
    assert_eq!(config.bit_depth, BitDepth::Raw8);
    assert_eq!(config.deserializer_address(), I2cAddress::Bit7(0x4A));
    assert_eq!(config.links[Link::A].candidates, vec![0x80]);
    assert_eq!(config.links[Link::A].sensor_alias, 0x36);
    // Untouched link keeps its defaults.
    assert_eq!(config.links[Link::B].serializer_alias, 0x84);
}

#[test]
fn test_bad_fields_fall_back_individually() {
    init_logging();
    let text = r#"
        role = "sideways"
        sensor_count = 7
        bit_depth = 12
        deserializer = 0x91
        broadcast_alias = 0x8E

        [link_b]
        candidates = []
        sensor_alias = 0x26
    "#;
    let config = BridgeConfig::from_toml_str(text);
    let defaults = BridgeConfig::default();

    assert_eq!(config.role, defaults.role);
    assert_eq!(config.sensor_count, defaults.sensor_count);
    assert_eq!(config.bit_depth, defaults.bit_depth);
    assert_eq!(config.deserializer, defaults.deserializer);
    assert_eq!(config.broadcast_alias, 0x8E);
    assert_eq!(config.links[Link::B].candidates, defaults.links[Link::B].candidates);
    assert_eq!(config.links[Link::B].sensor_alias, 0x26);

    let err = BridgeConfig::try_from_toml_str(text).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadParameter);
}

#[test]
fn test_colliding_aliases_reset_address_plan() {
    init_logging();
    let config = BridgeConfig::from_toml_str(
        r#"
        role = "receiver"
        [link_a]
        serializer_alias = 0x84
        "#,
    );
    assert_eq!(config.role, BridgeRole::Receiver);
    assert_eq!(config.links, BridgeConfig::default().links);

    // An alias may not shadow a native serializer address either.
    assert!(BridgeConfig::try_from_toml_str("broadcast_alias = 0x88").is_err());
}

#[test]
fn test_unparsable_text_gives_defaults() {
    init_logging();
    assert_eq!(BridgeConfig::from_toml_str("role = ["), BridgeConfig::default());
}

#[test]
fn test_load_and_save() {
    init_logging();
    let missing = std::env::temp_dir().join("gmsl-sensor-hal-missing.toml");
    assert_eq!(BridgeConfig::load(&missing), BridgeConfig::default());

    let mut config = BridgeConfig::default();
    config.bit_depth = BitDepth::Raw8;
    config.links[Link::B].candidates = vec![0x80, 0xC4];
    let text = config.to_toml_string().unwrap();
    assert!(text.contains("bit_depth = 8"));

    let path = std::env::temp_dir().join(format!("gmsl-sensor-hal-{}.toml", std::process::id()));
    std::fs::File::create(&path)
        .and_then(|mut f| f.write_all(text.as_bytes()))
        .unwrap();
    let loaded = BridgeConfig::load(&path);
    let _ = std::fs::remove_file(&path);
    assert_eq!(loaded, config);
}
