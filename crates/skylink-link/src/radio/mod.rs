//! # Radio Topology
//!
//! Static description of the local radio hardware as the router sees it:
//! interfaces (one per physical endpoint) grouped into radio links that share
//! a frequency. Hardware I/O sits behind [`RadioPort`].

pub mod memory;
pub mod udp;

use std::fmt;

use serde::{Deserialize, Serialize};
use skylink_wire::Capabilities;

// ─── Data Rate ──────────────────────────────────────────────────────────────

/// Radio data rate. Positive values are legacy rates in bps; negative values
/// are MCS codes (`-1` = MCS0, `-2` = MCS1, ...). Zero means "not set".
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataRate(pub i32);

/// HT20 long-GI single-stream rates for MCS0..MCS7, in bps.
const MCS_RATES_BPS: [u64; 8] = [
    6_500_000, 13_000_000, 19_500_000, 26_000_000, 39_000_000, 52_000_000, 58_500_000, 65_000_000,
];

impl DataRate {
    pub const UNSET: DataRate = DataRate(0);
    /// Lowest legacy rate used for robust data traffic.
    pub const LOWEST_LEGACY: DataRate = DataRate(6_000_000);
    pub const MCS0: DataRate = DataRate(-1);

    pub fn mcs(index: u8) -> Self {
        DataRate(-(index as i32) - 1)
    }

    pub fn is_set(&self) -> bool {
        self.0 != 0
    }

    pub fn is_mcs(&self) -> bool {
        self.0 < 0
    }

    pub fn mcs_index(&self) -> Option<u8> {
        // Indices past the table saturate; `-(x + 1)` cannot overflow for x < 0.
        self.is_mcs()
            .then(|| u8::try_from(-(self.0 + 1)).unwrap_or(u8::MAX))
    }

    /// Throughput in bps, used to compare legacy and MCS rates.
    pub fn effective_bps(&self) -> u64 {
        match self.mcs_index() {
            Some(idx) => MCS_RATES_BPS[(idx as usize).min(MCS_RATES_BPS.len() - 1)],
            None => self.0.max(0) as u64,
        }
    }

    /// The slower of two rates; an unset rate loses to any set one.
    pub fn min_effective(self, other: DataRate) -> DataRate {
        if !self.is_set() {
            return other;
        }
        if !other.is_set() {
            return self;
        }
        if other.effective_bps() < self.effective_bps() {
            other
        } else {
            self
        }
    }
}

impl fmt::Debug for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mcs_index() {
            Some(idx) => write!(f, "MCS{idx}"),
            None => write!(f, "{}bps", self.0),
        }
    }
}

// ─── Interfaces & Links ─────────────────────────────────────────────────────

/// How data (non-video) frames pick their rate on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataRatePolicy {
    /// The link's configured data rate.
    #[default]
    Fixed,
    /// The slower of the link's video rate and the adaptive video rate.
    SameAsAdaptiveVideo,
    /// The most robust rate the link supports.
    Lowest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RadioInterfaceInfo {
    pub index: usize,
    pub name: String,
    /// Radio link this interface belongs to, if assigned.
    pub link_id: Option<usize>,
    pub caps: Capabilities,
    /// Rate the hardware is configured for (serial radios use this as-is).
    pub current_rate: DataRate,
    /// Manual per-interface override for video frames.
    pub manual_video_rate: Option<DataRate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RadioLinkInfo {
    pub id: usize,
    pub caps: Capabilities,
    pub frequency_khz: u32,
    pub video_rate: DataRate,
    pub data_rate: DataRate,
    pub data_rate_policy: DataRatePolicy,
    pub interfaces: Vec<usize>,
}

impl RadioLinkInfo {
    /// Rate for a data frame under this link's policy.
    pub fn data_frame_rate(&self, adaptive_video: Option<DataRate>) -> DataRate {
        match self.data_rate_policy {
            DataRatePolicy::Fixed => self.data_rate,
            DataRatePolicy::SameAsAdaptiveVideo => match adaptive_video {
                Some(rate) => self.video_rate.min_effective(rate),
                None => self.video_rate,
            },
            DataRatePolicy::Lowest => {
                if self.video_rate.0 > 0 {
                    DataRate::LOWEST_LEGACY
                } else {
                    DataRate::MCS0
                }
            }
        }
    }
}

/// All radio interfaces and links of this node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadioTopology {
    pub interfaces: Vec<RadioInterfaceInfo>,
    pub links: Vec<RadioLinkInfo>,
}

impl RadioTopology {
    pub fn interface(&self, index: usize) -> Option<&RadioInterfaceInfo> {
        self.interfaces.get(index)
    }

    pub fn link(&self, id: usize) -> Option<&RadioLinkInfo> {
        self.links.iter().find(|l| l.id == id)
    }

    /// Radio link an interface belongs to.
    pub fn link_of(&self, interface: usize) -> Option<usize> {
        self.interface(interface).and_then(|i| i.link_id)
    }

    /// The link currently marked for relaying, if any.
    pub fn relay_link(&self) -> Option<usize> {
        self.links
            .iter()
            .find(|l| l.caps.is_relay_only())
            .map(|l| l.id)
    }

    pub fn tx_capable_links(&self) -> usize {
        self.links.iter().filter(|l| l.caps.can_transmit()).count()
    }

    /// Mark `link` (and its interfaces) as the relay link and clear the flag
    /// everywhere else. Returns the interfaces whose flag changed.
    pub fn mark_relay_link(&mut self, link: Option<usize>) -> Vec<usize> {
        let mut changed = Vec::new();
        for l in &mut self.links {
            l.caps.set(Capabilities::RELAY, Some(l.id) == link);
        }
        for iface in &mut self.interfaces {
            let relay = link.is_some() && iface.link_id == link;
            if iface.caps.is_relay_only() != relay {
                iface.caps.set(Capabilities::RELAY, relay);
                changed.push(iface.index);
            }
        }
        changed
    }

    /// Keep each link's `interfaces` list consistent with `link_id`.
    pub fn rebuild_link_membership(&mut self) {
        for link in &mut self.links {
            link.interfaces = self
                .interfaces
                .iter()
                .filter(|i| i.link_id == Some(link.id))
                .map(|i| i.index)
                .collect();
        }
    }
}

// ─── Ports ──────────────────────────────────────────────────────────────────

/// One physical radio endpoint.
pub trait RadioPort: Send {
    fn index(&self) -> usize;

    /// Transmit one frame at `rate`.
    fn write(&mut self, frame: &[u8], rate: DataRate) -> anyhow::Result<usize>;

    /// Non-blocking read. `Ok(None)` when nothing is pending.
    fn try_read(&mut self, buf: &mut [u8]) -> anyhow::Result<Option<usize>>;

    /// Close and reopen the endpoint (after a reconfiguration).
    fn reopen(&mut self) -> anyhow::Result<()>;
}
