//! Capability kinds and capability sets

use core::fmt;
use core::str::FromStr;

use bitflags::bitflags;
use thiserror::Error;

/// One abstract hardware function a board may provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityKind {
    Power,
    Touch,
    Keyboard,
    Display,
    SdCard,
    I2c,
    Gps,
}

impl CapabilityKind {
    /// Every kind, in boot order
    pub const ALL: [CapabilityKind; 7] = [
        CapabilityKind::Power,
        CapabilityKind::Keyboard,
        CapabilityKind::Touch,
        CapabilityKind::SdCard,
        CapabilityKind::I2c,
        CapabilityKind::Gps,
        CapabilityKind::Display,
    ];

    /// Lower-case name used in descriptors and logs
    pub fn as_str(self) -> &'static str {
        match self {
            CapabilityKind::Power => "power",
            CapabilityKind::Touch => "touch",
            CapabilityKind::Keyboard => "keyboard",
            CapabilityKind::Display => "display",
            CapabilityKind::SdCard => "sdcard",
            CapabilityKind::I2c => "i2c",
            CapabilityKind::Gps => "gps",
        }
    }

    /// Whether the hardware behind this kind can appear and disappear at runtime
    pub fn is_hot_pluggable(self) -> bool {
        matches!(self, CapabilityKind::SdCard)
    }

    pub(crate) fn index(self) -> usize {
        match self {
            CapabilityKind::Power => 0,
            CapabilityKind::Touch => 1,
            CapabilityKind::Keyboard => 2,
            CapabilityKind::Display => 3,
            CapabilityKind::SdCard => 4,
            CapabilityKind::I2c => 5,
            CapabilityKind::Gps => 6,
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown capability: {0}")]
pub struct UnknownCapability(pub String);

impl FromStr for CapabilityKind {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        CapabilityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownCapability(name.to_string()))
    }
}

bitflags! {
    /// Set of capability kinds, e.g. the ones an app requires
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        const POWER = 1 << 0;
        const TOUCH = 1 << 1;
        const KEYBOARD = 1 << 2;
        const DISPLAY = 1 << 3;
        const SDCARD = 1 << 4;
        const I2C = 1 << 5;
        const GPS = 1 << 6;
    }
}

impl From<CapabilityKind> for Capabilities {
    fn from(kind: CapabilityKind) -> Self {
        match kind {
            CapabilityKind::Power => Capabilities::POWER,
            CapabilityKind::Touch => Capabilities::TOUCH,
            CapabilityKind::Keyboard => Capabilities::KEYBOARD,
            CapabilityKind::Display => Capabilities::DISPLAY,
            CapabilityKind::SdCard => Capabilities::SDCARD,
            CapabilityKind::I2c => Capabilities::I2C,
            CapabilityKind::Gps => Capabilities::GPS,
        }
    }
}

impl FromIterator<CapabilityKind> for Capabilities {
    fn from_iter<I: IntoIterator<Item = CapabilityKind>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Capabilities::empty(), |set, kind| set | Capabilities::from(kind))
    }
}

impl Capabilities {
    /// Whether `kind` is in the set
    pub fn has(self, kind: CapabilityKind) -> bool {
        self.contains(Capabilities::from(kind))
    }

    /// Kinds in the set, in boot order
    pub fn kinds(self) -> impl Iterator<Item = CapabilityKind> {
        CapabilityKind::ALL
            .into_iter()
            .filter(move |kind| self.has(*kind))
    }

    /// Parse a comma separated list such as `"power, touch"`
    pub fn parse_list(list: &str) -> Result<Self, UnknownCapability> {
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(CapabilityKind::from_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_name() {
        for kind in CapabilityKind::ALL {
            assert_eq!(kind.as_str().parse::<CapabilityKind>(), Ok(kind));
        }
        assert_eq!("SdCard".parse::<CapabilityKind>(), Ok(CapabilityKind::SdCard));
        assert!("lidar".parse::<CapabilityKind>().is_err());
    }

    #[test]
    fn test_capability_set_membership() {
        let set: Capabilities = [CapabilityKind::Power, CapabilityKind::Gps].into_iter().collect();
        assert!(set.has(CapabilityKind::Power));
        assert!(set.has(CapabilityKind::Gps));
        assert!(!set.has(CapabilityKind::Touch));
        assert_eq!(
            set.kinds().collect::<Vec<_>>(),
            vec![CapabilityKind::Power, CapabilityKind::Gps]
        );
    }

    #[test]
    fn test_parse_list() {
        let set = Capabilities::parse_list("power, touch,,").unwrap();
        assert_eq!(set, Capabilities::POWER | Capabilities::TOUCH);
        assert_eq!(Capabilities::parse_list("").unwrap(), Capabilities::empty());
        assert_eq!(
            Capabilities::parse_list("power, lidar"),
            Err(UnknownCapability("lidar".into()))
        );
    }

    #[test]
    fn test_indices_are_distinct() {
        let mut seen = [false; 7];
        for kind in CapabilityKind::ALL {
            assert!(!seen[kind.index()]);
            seen[kind.index()] = true;
        }
    }
}
