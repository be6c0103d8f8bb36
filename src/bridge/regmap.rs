//! Register layout and register tables of a GMSL2 deserializer/serializer
//! pair.
//!
//! The defaults follow a MAX9296A deserializer with MAX9295A serializers.
//! Other parts can be described by filling the structures by hand.

use super::link::{Link, LinkMap, Topology};
use crate::config::{BitDepth, BridgeRole};
use crate::driver::IdCheck;
use crate::error::Result;
use crate::regs::{RegEntry, RegFormat, RegisterSetting};

/// One status bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusBit {
    pub reg: u32,
    pub mask: u32,
}

/// Register addresses and values the link manager computes sequences from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRegisterMap {
    pub deser_format: RegFormat,
    pub ser_format: RegFormat,
    pub deser_id: IdCheck,
    pub revision_reg: u32,
    pub revision_mask: u32,
    /// Revisions up to and including this value need the legacy fixups.
    pub legacy_revision_max: u32,
    /// Link control register, used for both link selection and reset.
    pub link_ctrl_reg: u32,
    pub link_select: LinkMap<u32>,
    pub link_reset: LinkMap<u32>,
    pub link_reset_delay_ms: u16,
    pub ser_id: IdCheck,
    /// Serializer device-address register; takes the 8-bit wire address.
    pub ser_address_reg: u32,
    pub sensor_src_reg: u32,
    pub sensor_dst_reg: u32,
    pub broadcast_src_reg: u32,
    pub broadcast_dst_reg: u32,
    pub stream_id_reg: u32,
    pub stream_id: LinkMap<u32>,
    pub lock_status: LinkMap<StatusBit>,
}

impl Default for BridgeRegisterMap {
    fn default() -> Self {
        Self {
            deser_format: RegFormat::A16_D8,
            ser_format: RegFormat::A16_D8,
            deser_id: IdCheck {
                reg: 0x000D,
                expected: 0x94,
                mask: 0xFF,
            },
            revision_reg: 0x004C,
            revision_mask: 0x0F,
            legacy_revision_max: 0x01,
            link_ctrl_reg: 0x0010,
            link_select: LinkMap::new(0x01, 0x02),
            link_reset: LinkMap::new(0x21, 0x22),
            link_reset_delay_ms: 100,
            ser_id: IdCheck {
                reg: 0x000D,
                expected: 0x91,
                mask: 0xFF,
            },
            ser_address_reg: 0x0000,
            sensor_src_reg: 0x0042,
            sensor_dst_reg: 0x0043,
            broadcast_src_reg: 0x0044,
            broadcast_dst_reg: 0x0045,
            stream_id_reg: 0x0053,
            stream_id: LinkMap::new(0x10, 0x11),
            lock_status: LinkMap::new(
                StatusBit {
                    reg: 0x0013,
                    mask: 0x08,
                },
                StatusBit {
                    reg: 0x5009,
                    mask: 0x08,
                },
            ),
        }
    }
}

/// A table per pixel bit depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthTables {
    pub raw8: RegisterSetting,
    pub raw10: RegisterSetting,
}

impl DepthTables {
    pub fn get(&self, depth: BitDepth) -> &RegisterSetting {
        match depth {
            BitDepth::Raw8 => &self.raw8,
            BitDepth::Raw10 => &self.raw10,
        }
    }
}

/// A table per active-link topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeTables {
    pub splitter: RegisterSetting,
    pub link_a: RegisterSetting,
    pub link_b: RegisterSetting,
}

impl ModeTables {
    /// `None` when no link is active.
    pub fn get(&self, topology: Topology) -> Option<&RegisterSetting> {
        match topology {
            Topology::None => None,
            Topology::SingleA => Some(&self.link_a),
            Topology::SingleB => Some(&self.link_b),
            Topology::Splitter => Some(&self.splitter),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionTables {
    pub legacy: RegisterSetting,
    pub current: RegisterSetting,
}

/// Register sequences issued by the link manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeTables {
    /// Written in receiver role right after identification.
    pub receiver_patch: RegisterSetting,
    pub deser_depth: LinkMap<DepthTables>,
    pub ser_depth: DepthTables,
    pub revision: RevisionTables,
    pub deser_mode_sender: ModeTables,
    pub deser_mode_receiver: ModeTables,
    pub ser_start: RegisterSetting,
    pub ser_stop: RegisterSetting,
    pub deser_start: ModeTables,
    pub deser_stop: RegisterSetting,
}

impl BridgeTables {
    /// Tables for a MAX9296A deserializer and MAX9295A serializers.
    pub fn max9296a() -> Result<Self> {
        let d = |pairs: &[(u32, u32)]| RegisterSetting::from_pairs(RegFormat::A16_D8, pairs);
        let with_reset = |link_cfg: u32, extra: &[(u32, u32)]| {
            let mut entries = vec![RegEntry::with_delay(0x0010, link_cfg, 100)];
            entries.extend(extra.iter().map(|&(r, v)| RegEntry::new(r, v)));
            RegisterSetting::new(RegFormat::A16_D8, entries)
        };
        let csi = [(0x0330, 0x04), (0x0333, 0x4E), (0x0334, 0xE4)];
        let csi_receiver = [(0x0330, 0x04), (0x0333, 0xE4), (0x0334, 0x4E)];

        Ok(Self {
            receiver_patch: d(&[(0x0001, 0x02)])?,
            deser_depth: LinkMap::new(
                DepthTables {
                    raw8: d(&[(0x0316, 0x2A), (0x0317, 0x00)])?,
                    raw10: d(&[(0x0316, 0x2B), (0x0317, 0x00)])?,
                },
                DepthTables {
                    raw8: d(&[(0x0319, 0x2A), (0x031A, 0x00)])?,
                    raw10: d(&[(0x0319, 0x2B), (0x031A, 0x00)])?,
                },
            ),
            ser_depth: DepthTables {
                raw8: d(&[(0x0312, 0x02), (0x031E, 0x28)])?,
                raw10: d(&[(0x0312, 0x00), (0x031E, 0x2A)])?,
            },
            revision: RevisionTables {
                legacy: d(&[(0x1449, 0x75), (0x1549, 0x75)])?,
                current: RegisterSetting::empty(RegFormat::A16_D8),
            },
            deser_mode_sender: ModeTables {
                splitter: with_reset(0x23, &csi)?,
                link_a: with_reset(0x21, &csi)?,
                link_b: with_reset(0x22, &csi)?,
            },
            deser_mode_receiver: ModeTables {
                splitter: with_reset(0x23, &csi_receiver)?,
                link_a: with_reset(0x21, &csi_receiver)?,
                link_b: with_reset(0x22, &csi_receiver)?,
            },
            ser_start: d(&[(0x0002, 0x43)])?,
            ser_stop: d(&[(0x0002, 0x03)])?,
            deser_start: ModeTables {
                splitter: d(&[(0x0313, 0x02)])?,
                link_a: d(&[(0x0313, 0x02)])?,
                link_b: d(&[(0x0313, 0x02)])?,
            },
            deser_stop: d(&[(0x0313, 0x00)])?,
        })
    }

    pub fn deser_mode(&self, role: BridgeRole) -> &ModeTables {
        match role {
            BridgeRole::Sender => &self.deser_mode_sender,
            BridgeRole::Receiver => &self.deser_mode_receiver,
        }
    }
}

impl BridgeRegisterMap {
    /// The link-reset write with its settle delay.
    pub fn link_reset_setting(&self, link: Link) -> Result<RegisterSetting> {
        RegisterSetting::new(
            self.deser_format,
            vec![RegEntry::with_delay(
                self.link_ctrl_reg,
                self.link_reset[link],
                self.link_reset_delay_ms,
            )],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tables_build() {
        let tables = BridgeTables::max9296a().unwrap();
        assert_eq!(tables.deser_depth[Link::B].get(BitDepth::Raw10).entries()[0].reg, 0x0319);
        assert!(tables.deser_start.get(Topology::None).is_none());
        assert_eq!(
            tables.deser_mode(BridgeRole::Sender).get(Topology::Splitter).unwrap().entries()[0].delay_ms,
            100
        );
    }
}
