//! Per-link bookkeeping for a two-link deserializer.

use crate::driver::ChannelMask;
use crate::i2c::I2cAddress;
use std::fmt;
use std::ops::{Index, IndexMut};

/// One serial link of the deserializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Link {
    A,
    B,
}

impl Link {
    pub const ALL: [Link; 2] = [Link::A, Link::B];

    pub fn index(self) -> usize {
        match self {
            Link::A => 0,
            Link::B => 1,
        }
    }

    /// Input channel carried by this link.
    pub fn mask(self) -> ChannelMask {
        match self {
            Link::A => ChannelMask::CH0,
            Link::B => ChannelMask::CH1,
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::A => f.write_str("link A"),
            Link::B => f.write_str("link B"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum LinkState {
    #[default]
    Invalid,
    /// A serializer answered at a native address but is not remapped yet.
    SerializerDetected,
    Detected,
    Initialized,
    Streaming,
}

/// One value per [`Link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkMap<T>([T; 2]);

impl<T> LinkMap<T> {
    pub fn new(a: T, b: T) -> Self {
        Self([a, b])
    }

    pub fn iter(&self) -> impl Iterator<Item = (Link, &T)> {
        Link::ALL.into_iter().zip(self.0.iter())
    }
}

impl<T> Index<Link> for LinkMap<T> {
    type Output = T;

    fn index(&self, link: Link) -> &T {
        &self.0[link.index()]
    }
}

impl<T> IndexMut<Link> for LinkMap<T> {
    fn index_mut(&mut self, link: Link) -> &mut T {
        &mut self.0[link.index()]
    }
}

/// What the bridge knows about one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkInfo {
    pub state: LinkState,
    /// Address the serializer answered at before remapping.
    pub serializer_native: Option<I2cAddress>,
    pub serializer_alias: Option<I2cAddress>,
    pub sensor_alias: Option<I2cAddress>,
}

/// How many links carry video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Topology {
    #[default]
    None,
    SingleA,
    SingleB,
    Splitter,
}

impl Topology {
    pub fn from_mask(enabled: ChannelMask) -> Self {
        match (
            enabled.contains(ChannelMask::CH0),
            enabled.contains(ChannelMask::CH1),
        ) {
            (true, true) => Topology::Splitter,
            (true, false) => Topology::SingleA,
            (false, true) => Topology::SingleB,
            (false, false) => Topology::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_map_indexing() {
        let mut map = LinkMap::new(1, 2);
        map[Link::B] += 10;
        assert_eq!(map[Link::A], 1);
        assert_eq!(map[Link::B], 12);
        let links: Vec<_> = map.iter().map(|(l, _)| l).collect();
        assert_eq!(links, vec![Link::A, Link::B]);
    }

    #[test]
    fn test_topology_from_mask() {
        assert_eq!(Topology::from_mask(ChannelMask::empty()), Topology::None);
        assert_eq!(Topology::from_mask(ChannelMask::CH1), Topology::SingleB);
        assert_eq!(
            Topology::from_mask(ChannelMask::CH0 | ChannelMask::CH1),
            Topology::Splitter
        );
    }
}
