//! Bridge topology configuration.
//!
//! The file is TOML with top-level keys and one table per link:
//!
//! ```toml
//! role = "sender"
//! sensor_count = 2
//! bit_depth = 10
//! deserializer = 0x90
//! broadcast_alias = 0x8A
//!
//! [link_a]
//! candidates = [0xC4, 0x88, 0x80]
//! serializer_alias = 0x82
//! sensor_native = 0x20
//! sensor_alias = 0x22
//! ```
//!
//! Addresses are in 8-bit wire form. Anything missing, malformed or out of
//! range falls back to its default, field by field.

use crate::bridge::{Link, LinkMap};
use crate::error::{Error, Result};
use crate::i2c::I2cAddress;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Which end of the GMSL link the deserializer sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeRole {
    /// Cameras attached through serializers that this side configures.
    #[default]
    Sender,
    /// Remote side is configured elsewhere; only the deserializer is touched.
    Receiver,
}

/// Pixel bit depth carried over the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BitDepth {
    Raw8,
    #[default]
    Raw10,
}

impl TryFrom<u8> for BitDepth {
    type Error = String;

    fn try_from(bits: u8) -> std::result::Result<Self, String> {
        match bits {
            8 => Ok(BitDepth::Raw8),
            10 => Ok(BitDepth::Raw10),
            other => Err(format!("unsupported bit depth {}", other)),
        }
    }
}

impl From<BitDepth> for u8 {
    fn from(depth: BitDepth) -> u8 {
        match depth {
            BitDepth::Raw8 => 8,
            BitDepth::Raw10 => 10,
        }
    }
}

impl fmt::Display for BitDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RAW{}", u8::from(*self))
    }
}

/// Addressing plan for one link, all in 8-bit wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Native serializer addresses to probe, in order.
    pub candidates: Vec<u8>,
    pub serializer_alias: u8,
    pub sensor_native: u8,
    pub sensor_alias: u8,
}

impl LinkConfig {
    /// Default plan for `link`.
    pub fn default_for(link: Link) -> Self {
        let (serializer_alias, sensor_alias) = match link {
            Link::A => (0x82, 0x22),
            Link::B => (0x84, 0x24),
        };
        Self {
            candidates: vec![0xC4, 0x88, 0x80],
            serializer_alias,
            sensor_native: 0x20,
            sensor_alias,
        }
    }

    pub fn candidate_addresses(&self) -> impl Iterator<Item = I2cAddress> + '_ {
        self.candidates.iter().map(|&a| I2cAddress::from_8bit(a))
    }
}

/// Topology and addressing of a two-link bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub role: BridgeRole,
    /// Number of sensors behind the deserializer (receiver role only).
    pub sensor_count: u8,
    pub bit_depth: BitDepth,
    /// Deserializer address.
    pub deserializer: u8,
    /// Alias every serializer also answers to.
    pub broadcast_alias: u8,
    pub links: LinkMap<LinkConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            role: BridgeRole::Sender,
            sensor_count: 2,
            bit_depth: BitDepth::Raw10,
            deserializer: 0x90,
            broadcast_alias: 0x8A,
            links: LinkMap::new(
                LinkConfig::default_for(Link::A),
                LinkConfig::default_for(Link::B),
            ),
        }
    }
}

// Every field optional and loosely typed so one bad value cannot take the
// rest of the file down with it.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    role: Option<toml::Value>,
    sensor_count: Option<toml::Value>,
    bit_depth: Option<toml::Value>,
    deserializer: Option<toml::Value>,
    broadcast_alias: Option<toml::Value>,
    link_a: Option<toml::Value>,
    link_b: Option<toml::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLink {
    candidates: Option<toml::Value>,
    serializer_alias: Option<toml::Value>,
    sensor_native: Option<toml::Value>,
    sensor_alias: Option<toml::Value>,
}

#[derive(Serialize)]
struct FileView<'a> {
    role: BridgeRole,
    sensor_count: u8,
    bit_depth: BitDepth,
    deserializer: u8,
    broadcast_alias: u8,
    link_a: &'a LinkConfig,
    link_b: &'a LinkConfig,
}

impl BridgeConfig {
    /// Reads the configuration file, falling back to defaults if it cannot
    /// be read.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                debug!("Loading bridge configuration from {}", path.display());
                Self::from_toml_str(&content)
            }
            Err(e) => {
                warn!(
                    "Cannot read bridge configuration {}: {}; using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Parses configuration text, replacing every unusable field with its
    /// default and logging a warning for it.
    pub fn from_toml_str(content: &str) -> Self {
        let (config, problems) = Self::resolve(content);
        for problem in &problems {
            warn!("Bridge configuration: {}; using default", problem);
        }
        config
    }

    /// Like [`from_toml_str`](Self::from_toml_str) but fails on the first
    /// unusable field.
    pub fn try_from_toml_str(content: &str) -> Result<Self> {
        let (config, problems) = Self::resolve(content);
        if problems.is_empty() {
            Ok(config)
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let view = FileView {
            role: self.role,
            sensor_count: self.sensor_count,
            bit_depth: self.bit_depth,
            deserializer: self.deserializer,
            broadcast_alias: self.broadcast_alias,
            link_a: &self.links[Link::A],
            link_b: &self.links[Link::B],
        };
        toml::to_string(&view).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn deserializer_address(&self) -> I2cAddress {
        I2cAddress::from_8bit(self.deserializer)
    }

    pub fn broadcast_address(&self) -> I2cAddress {
        I2cAddress::from_8bit(self.broadcast_alias)
    }

    fn resolve(content: &str) -> (Self, Vec<String>) {
        let mut problems = Vec::new();
        let mut config = Self::default();

        let raw: RawConfig = match toml::from_str(content) {
            Ok(raw) => raw,
            Err(e) => {
                problems.push(format!("parse error: {}", e));
                return (config, problems);
            }
        };

        if let Some(v) = raw.role {
            match v.as_str().map(str::to_ascii_lowercase).as_deref() {
                Some("sender") => config.role = BridgeRole::Sender,
                Some("receiver") => config.role = BridgeRole::Receiver,
                _ => problems.push(format!("role {} is not \"sender\" or \"receiver\"", v)),
            }
        }
        if let Some(v) = raw.sensor_count {
            match v.as_integer() {
                Some(n @ 0..=2) => config.sensor_count = n as u8,
                _ => problems.push(format!("sensor_count {} is not 0, 1 or 2", v)),
            }
        }
        if let Some(v) = raw.bit_depth {
            match v
                .as_integer()
                .and_then(|n| u8::try_from(n).ok())
                .and_then(|n| BitDepth::try_from(n).ok())
            {
                Some(depth) => config.bit_depth = depth,
                None => problems.push(format!("bit_depth {} is not 8 or 10", v)),
            }
        }
        resolve_address(raw.deserializer, "deserializer", &mut config.deserializer, &mut problems);
        resolve_address(
            raw.broadcast_alias,
            "broadcast_alias",
            &mut config.broadcast_alias,
            &mut problems,
        );
        for (link, value) in [(Link::A, raw.link_a), (Link::B, raw.link_b)] {
            if let Some(value) = value {
                resolve_link(link, value, &mut config.links[link], &mut problems);
            }
        }

        if let Err(e) = config.check_address_plan() {
            problems.push(e);
            let defaults = Self::default();
            config.deserializer = defaults.deserializer;
            config.broadcast_alias = defaults.broadcast_alias;
            config.links = defaults.links;
        }
        (config, problems)
    }

    // Aliases must be unique and must not shadow the deserializer or any
    // native serializer address.
    fn check_address_plan(&self) -> std::result::Result<(), String> {
        let mut taken: HashSet<u8> = HashSet::new();
        taken.insert(self.deserializer);
        for (_, link) in self.links.iter() {
            taken.extend(link.candidates.iter().copied());
        }
        let mut aliases = vec![("broadcast_alias", self.broadcast_alias)];
        for (_, link) in self.links.iter() {
            aliases.push(("serializer_alias", link.serializer_alias));
            aliases.push(("sensor_alias", link.sensor_alias));
        }
        for (name, alias) in aliases {
            if !taken.insert(alias) {
                return Err(format!(
                    "{} 0x{:02X} collides with another address",
                    name, alias
                ));
            }
        }
        Ok(())
    }
}

fn parse_address(value: &toml::Value) -> Option<u8> {
    let n = value.as_integer()?;
    match u8::try_from(n) {
        Ok(a) if a != 0 && a & 1 == 0 => Some(a),
        _ => None,
    }
}

fn resolve_address(value: Option<toml::Value>, name: &str, slot: &mut u8, problems: &mut Vec<String>) {
    if let Some(v) = value {
        match parse_address(&v) {
            Some(a) => *slot = a,
            None => problems.push(format!("{} {} is not an 8-bit wire address", name, v)),
        }
    }
}

fn resolve_link(link: Link, value: toml::Value, slot: &mut LinkConfig, problems: &mut Vec<String>) {
    let raw: RawLink = match value.try_into() {
        Ok(raw) => raw,
        Err(e) => {
            problems.push(format!("{} table: {}", link, e));
            return;
        }
    };
    if let Some(v) = raw.candidates {
        let parsed: Option<Vec<u8>> = v
            .as_array()
            .filter(|a| !a.is_empty())
            .and_then(|a| a.iter().map(parse_address).collect());
        match parsed {
            Some(candidates) => slot.candidates = candidates,
            None => problems.push(format!("{} candidates {} are not a list of addresses", link, v)),
        }
    }
    let prefix = |name: &str| format!("{} {}", link, name);
    resolve_address(raw.serializer_alias, &prefix("serializer_alias"), &mut slot.serializer_alias, problems);
    resolve_address(raw.sensor_native, &prefix("sensor_native"), &mut slot.sensor_native, problems);
    resolve_address(raw.sensor_alias, &prefix("sensor_alias"), &mut slot.sensor_alias, problems);
}
