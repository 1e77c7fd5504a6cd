//! # Capability Flags
//!
//! Bit set describing what a radio interface or radio link may be used for.
//! Bit positions are shared with the model settings exchanged with the peer.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const VIDEO: Capabilities = Capabilities(1 << 0);
    pub const DATA: Capabilities = Capabilities(1 << 2);
    pub const RELAY: Capabilities = Capabilities(1 << 4);
    pub const RX: Capabilities = Capabilities(1 << 5);
    pub const TX: Capabilities = Capabilities(1 << 6);
    pub const DISABLED: Capabilities = Capabilities(1 << 7);
    pub const HIGH_CAPACITY: Capabilities = Capabilities(1 << 9);
    pub const SERIAL: Capabilities = Capabilities(1 << 10);
    pub const SIK: Capabilities = Capabilities(1 << 11);
    pub const APPLY_MCS_ON_VEHICLE: Capabilities = Capabilities(1 << 15);

    const NAMES: [(&'static str, Capabilities); 10] = [
        ("video", Self::VIDEO),
        ("data", Self::DATA),
        ("relay", Self::RELAY),
        ("rx", Self::RX),
        ("tx", Self::TX),
        ("disabled", Self::DISABLED),
        ("high_capacity", Self::HIGH_CAPACITY),
        ("serial", Self::SERIAL),
        ("sik", Self::SIK),
        ("apply_mcs", Self::APPLY_MCS_ON_VEHICLE),
    ];

    pub const fn empty() -> Self {
        Capabilities(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Capabilities(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Capabilities) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Capabilities) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: Capabilities, on: bool) {
        if on {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    /// Parse a list of names such as `["rx", "tx", "video"]`.
    /// Returns the first unknown name on failure.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, String> {
        let mut caps = Capabilities::empty();
        for name in names {
            let name = name.as_ref();
            let flag = Self::NAMES
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, f)| *f)
                .ok_or_else(|| name.to_string())?;
            caps.insert(flag);
        }
        Ok(caps)
    }

    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(_, f)| self.contains(*f))
            .map(|(n, _)| *n)
            .collect()
    }

    // ─── Predicates ─────────────────────────────────────────────────────

    pub fn is_disabled(&self) -> bool {
        self.contains(Self::DISABLED)
    }

    pub fn can_receive(&self) -> bool {
        !self.is_disabled() && self.contains(Self::RX)
    }

    pub fn can_transmit(&self) -> bool {
        !self.is_disabled() && self.contains(Self::TX)
    }

    pub fn can_transmit_video(&self) -> bool {
        self.can_transmit() && self.contains(Self::VIDEO)
    }

    pub fn can_transmit_data(&self) -> bool {
        self.can_transmit() && self.contains(Self::DATA)
    }

    /// Reserved for relaying; carries only pings of its own.
    pub fn is_relay_only(&self) -> bool {
        self.contains(Self::RELAY)
    }

    pub fn is_high_capacity(&self) -> bool {
        self.contains(Self::HIGH_CAPACITY)
    }

    /// Narrow-band serial radio that needs short-form framing.
    pub fn is_serial(&self) -> bool {
        self.contains(Self::SERIAL) || self.contains(Self::SIK)
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Capabilities) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capabilities({})", self.names().join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions() {
        assert_eq!(Capabilities::VIDEO.bits(), 0x1);
        assert_eq!(Capabilities::DATA.bits(), 0x4);
        assert_eq!(Capabilities::RELAY.bits(), 0x10);
        assert_eq!(Capabilities::TX.bits(), 0x40);
        assert_eq!(Capabilities::APPLY_MCS_ON_VEHICLE.bits(), 0x8000);
    }

    #[test]
    fn disabled_overrides_tx() {
        let caps = Capabilities::TX | Capabilities::RX | Capabilities::VIDEO | Capabilities::DISABLED;
        assert!(!caps.can_transmit());
        assert!(!caps.can_transmit_video());
        assert!(!caps.can_receive());
    }

    #[test]
    fn data_and_video_predicates() {
        let caps = Capabilities::TX | Capabilities::DATA;
        assert!(caps.can_transmit_data());
        assert!(!caps.can_transmit_video());
    }

    #[test]
    fn from_names_round_trip() {
        let caps = Capabilities::from_names(&["rx", "TX", "video"]).unwrap();
        assert_eq!(caps, Capabilities::RX | Capabilities::TX | Capabilities::VIDEO);
        assert_eq!(caps.names(), vec!["video", "rx", "tx"]);
    }

    #[test]
    fn from_names_rejects_unknown() {
        assert_eq!(
            Capabilities::from_names(&["rx", "warp"]),
            Err("warp".to_string())
        );
    }

    #[test]
    fn set_and_remove() {
        let mut caps = Capabilities::TX;
        caps.set(Capabilities::RELAY, true);
        assert!(caps.is_relay_only());
        caps.set(Capabilities::RELAY, false);
        assert!(!caps.is_relay_only());
    }

    #[test]
    fn serializes_as_bits() {
        let caps = Capabilities::RX | Capabilities::TX;
        assert_eq!(serde_json::to_string(&caps).unwrap(), "96");
    }
}
