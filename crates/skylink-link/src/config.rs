//! # Router Configuration
//!
//! TOML is deserialised into `*Input` structs where every field is optional,
//! then [`RouterConfigInput::resolve`] fills defaults, validates, and builds
//! the typed configs the router runs on.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use skylink_wire::Capabilities;

use crate::adaptive::{AdaptiveConfig, KeyframeConfig, ProfileSet, ProfileSettings, QuantizationConfig};
use crate::error::ConfigError;
use crate::radio::{DataRate, DataRatePolicy, RadioInterfaceInfo, RadioLinkInfo, RadioTopology};
use crate::receiver::dedup::DedupConfig;
use crate::receiver::{PairingState, ReceiverConfig};
use crate::relay::{RelayFlags, RelayMode, RelayParams};
use crate::selector::SelectorConfig;

pub const CONFIG_VERSION: u32 = 1;
pub const DEFAULT_VEHICLE_ID: u32 = 1;

// ─── Input (TOML) ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RouterConfigInput {
    pub version: u32,
    pub vehicle_id: Option<u32>,
    pub paired_vehicle_id: Option<u32>,
    pub first_pairing_done: Option<bool>,
    pub links: Vec<LinkInput>,
    pub interfaces: Vec<InterfaceInput>,
    pub selector: SelectorInput,
    pub receiver: ReceiverInput,
    pub adaptive: AdaptiveInput,
    pub quantization: QuantizationInput,
    pub keyframe: KeyframeInput,
    pub relay: RelayInput,
    pub profiles: ProfilesInput,
    pub runtime: RuntimeInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LinkInput {
    pub id: Option<usize>,
    pub capabilities: Vec<String>,
    pub frequency_khz: u32,
    pub video_rate: Option<i32>,
    pub data_rate: Option<i32>,
    pub data_rate_policy: DataRatePolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InterfaceInput {
    pub name: String,
    pub link: Option<usize>,
    pub capabilities: Vec<String>,
    pub rate: Option<i32>,
    pub manual_video_rate: Option<i32>,
    pub udp_bind: Option<String>,
    pub udp_peer: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SelectorInput {
    pub rate_decrease_hold_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReceiverInput {
    pub stale_window: Option<u32>,
    pub restart_gap: Option<u32>,
    pub idle_restart_after_ms: Option<u64>,
    pub max_tracked_vehicles: Option<usize>,
    pub rc_enabled: Option<bool>,
    pub reconstruct_source_id: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdaptiveInput {
    pub adjustment_strength: Option<u8>,
    pub use_peer_feedback: Option<bool>,
    pub go_lower_on_link_lost: Option<bool>,
    pub medium_only: Option<bool>,
    pub up_margin: Option<u8>,
    pub minimum_ok_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QuantizationInput {
    pub strength_high: Option<bool>,
    pub max_load_percent: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeyframeInput {
    pub auto_default_ms: Option<u32>,
    pub min_ms: Option<u32>,
    pub max_ms: Option<u32>,
    pub relaying_ms: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayInput {
    pub relayed_vehicle_id: u32,
    pub link: Option<usize>,
    pub frequency_khz: u32,
    pub flags: Vec<String>,
    pub mode: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfilesInput {
    pub user: ProfileInput,
    pub medium: ProfileInput,
    pub low: ProfileInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfileInput {
    pub bitrate_bps: Option<u32>,
    pub data_blocks: Option<u8>,
    pub base_fec: Option<u8>,
    pub fixed_keyframe_ms: Option<u32>,
    pub adaptive_quantization: Option<bool>,
    pub fps: Option<u32>,
    pub radio_rate: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeInput {
    pub loop_wait_ms: Option<u64>,
    pub stats_interval_ms: Option<u64>,
    pub outbound_capacity: Option<usize>,
    pub reinit_max_attempts: Option<u32>,
    pub reinit_backoff_ms: Option<u64>,
    pub rx_error_alarm_per_sec: Option<u64>,
    pub no_target_alarm_per_sec: Option<u64>,
    pub tx_overload_percent: Option<u64>,
    pub link_quality_alarm_below: Option<u8>,
}

// ─── Resolved ───────────────────────────────────────────────────────────────

/// Where an interface's UDP stand-in radio lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEndpoint {
    pub interface: usize,
    pub bind: SocketAddr,
    pub peer: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on one loop iteration's wait.
    pub loop_wait: Duration,
    /// Stats snapshot refresh.
    pub stats_interval: Duration,
    pub outbound_capacity: usize,
    pub reinit_max_attempts: u32,
    pub reinit_backoff: Duration,
    pub rx_error_alarm_per_sec: u64,
    pub no_target_alarm_per_sec: u64,
    /// Video TX above this share of the video rate counts as overload.
    pub tx_overload_percent: u64,
    /// Best interface reception quality (percent) below which the link
    /// quality alarm is raised. Zero disables it.
    pub link_quality_alarm_below: u8,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            loop_wait: Duration::from_millis(20),
            stats_interval: Duration::from_millis(100),
            outbound_capacity: 1024,
            reinit_max_attempts: 5,
            reinit_backoff: Duration::from_millis(200),
            rx_error_alarm_per_sec: 50,
            no_target_alarm_per_sec: 10,
            tx_overload_percent: 80,
            link_quality_alarm_below: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub version: u32,
    pub pairing: PairingState,
    pub topology: RadioTopology,
    pub endpoints: Vec<PortEndpoint>,
    pub selector: SelectorConfig,
    pub receiver: ReceiverConfig,
    pub adaptive: AdaptiveConfig,
    pub quantization: QuantizationConfig,
    pub keyframe: KeyframeConfig,
    pub relay: RelayParams,
    pub profiles: ProfileSet,
    pub runtime: RuntimeConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            version: CONFIG_VERSION,
            pairing: PairingState {
                local_vehicle_id: DEFAULT_VEHICLE_ID,
                ..Default::default()
            },
            topology: RadioTopology::default(),
            endpoints: Vec::new(),
            selector: SelectorConfig::default(),
            receiver: ReceiverConfig::default(),
            adaptive: AdaptiveConfig::default(),
            quantization: QuantizationConfig::default(),
            keyframe: KeyframeConfig::default(),
            relay: RelayParams::default(),
            profiles: ProfileSet::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

fn ms(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

fn caps(owner: &str, names: &[String]) -> Result<Capabilities, ConfigError> {
    Capabilities::from_names(names).map_err(|name| ConfigError::UnknownCapability {
        owner: owner.to_string(),
        name,
    })
}

fn addr(value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::BadAddress(value.to_string()))
}

fn relay_bits<T: Copy>(
    owner: &str,
    names: &[String],
    table: &[(&str, T)],
    empty: T,
    or: impl Fn(T, T) -> T,
) -> Result<T, ConfigError> {
    names.iter().try_fold(empty, |acc, name| {
        table
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| or(acc, *v))
            .ok_or_else(|| ConfigError::UnknownCapability {
                owner: owner.to_string(),
                name: name.clone(),
            })
    })
}

impl ProfileInput {
    fn resolve(self, base: &ProfileSettings) -> ProfileSettings {
        ProfileSettings {
            bitrate_bps: self.bitrate_bps.unwrap_or(base.bitrate_bps),
            data_blocks: self.data_blocks.unwrap_or(base.data_blocks).max(1),
            base_fec: self.base_fec.unwrap_or(base.base_fec),
            fixed_keyframe_ms: self.fixed_keyframe_ms.or(base.fixed_keyframe_ms),
            adaptive_quantization: self.adaptive_quantization.unwrap_or(base.adaptive_quantization),
            fps: self.fps.unwrap_or(base.fps).max(1),
            radio_rate: self.radio_rate.map(DataRate).unwrap_or(base.radio_rate),
        }
    }
}

impl RouterConfigInput {
    pub fn resolve(self) -> Result<RouterConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }
        let defaults = RouterConfig::default();

        let vehicle_id = self.vehicle_id.unwrap_or(DEFAULT_VEHICLE_ID);
        if vehicle_id == 0 {
            return Err(ConfigError::OutOfRange {
                field: "vehicle_id",
                value: 0,
            });
        }
        let pairing = PairingState {
            local_vehicle_id: vehicle_id,
            paired_vehicle_id: self.paired_vehicle_id,
            first_pairing_done: self.first_pairing_done.unwrap_or(self.paired_vehicle_id.is_some()),
        };

        // Links, then interfaces that refer to them.
        let mut links = Vec::new();
        for (idx, link) in self.links.into_iter().enumerate() {
            let id = link.id.unwrap_or(idx);
            if links.iter().any(|l: &RadioLinkInfo| l.id == id) {
                continue;
            }
            let video_rate = DataRate(link.video_rate.unwrap_or(DataRate::MCS0.0));
            links.push(RadioLinkInfo {
                id,
                caps: caps(&format!("link {id}"), &link.capabilities)?,
                frequency_khz: link.frequency_khz,
                video_rate,
                data_rate: link.data_rate.map(DataRate).unwrap_or(video_rate),
                data_rate_policy: link.data_rate_policy,
                interfaces: Vec::new(),
            });
        }

        let mut interfaces = Vec::new();
        let mut endpoints = Vec::new();
        for (index, iface) in self.interfaces.into_iter().enumerate() {
            let name = match iface.name.trim() {
                "" => format!("radio{index}"),
                n => n.to_string(),
            };
            if let Some(link) = iface.link {
                if !links.iter().any(|l| l.id == link) {
                    return Err(ConfigError::MissingLink { iface: name, link });
                }
            }
            if let (Some(bind), Some(peer)) = (&iface.udp_bind, &iface.udp_peer) {
                endpoints.push(PortEndpoint {
                    interface: index,
                    bind: addr(bind)?,
                    peer: addr(peer)?,
                });
            }
            interfaces.push(RadioInterfaceInfo {
                index,
                caps: caps(&name, &iface.capabilities)?,
                name,
                link_id: iface.link,
                current_rate: iface.rate.map(DataRate).unwrap_or(DataRate::UNSET),
                manual_video_rate: iface.manual_video_rate.map(DataRate),
            });
        }
        let mut topology = RadioTopology { interfaces, links };
        topology.rebuild_link_membership();

        let selector = SelectorConfig {
            rate_decrease_hold: ms(self.selector.rate_decrease_hold_ms, defaults.selector.rate_decrease_hold),
        };

        let rx = self.receiver;
        let dedup_default = DedupConfig::default();
        let receiver = ReceiverConfig {
            dedup: DedupConfig {
                stale_window: rx.stale_window.unwrap_or(dedup_default.stale_window),
                restart_gap: rx.restart_gap.unwrap_or(dedup_default.restart_gap),
                idle_restart_after: rx.idle_restart_after_ms.map(Duration::from_millis),
                max_vehicles: rx.max_tracked_vehicles.unwrap_or(dedup_default.max_vehicles),
            },
            rc_enabled: rx.rc_enabled.unwrap_or(defaults.receiver.rc_enabled),
            reconstruct_source_id: rx
                .reconstruct_source_id
                .unwrap_or(defaults.receiver.reconstruct_source_id),
        };
        if receiver.dedup.restart_gap <= receiver.dedup.stale_window {
            return Err(ConfigError::OutOfRange {
                field: "receiver.restart_gap",
                value: receiver.dedup.restart_gap as i64,
            });
        }
        if receiver.dedup.max_vehicles == 0 {
            return Err(ConfigError::OutOfRange {
                field: "receiver.max_tracked_vehicles",
                value: 0,
            });
        }

        let ad = self.adaptive;
        let adaptive = AdaptiveConfig {
            adjustment_strength: ad.adjustment_strength.unwrap_or(defaults.adaptive.adjustment_strength),
            use_peer_feedback: ad.use_peer_feedback.unwrap_or(defaults.adaptive.use_peer_feedback),
            go_lower_on_link_lost: ad
                .go_lower_on_link_lost
                .unwrap_or(defaults.adaptive.go_lower_on_link_lost),
            medium_only: ad.medium_only.unwrap_or(defaults.adaptive.medium_only),
            up_margin: ad.up_margin.unwrap_or(defaults.adaptive.up_margin),
            minimum_ok_interval: ms(ad.minimum_ok_interval_ms, defaults.adaptive.minimum_ok_interval),
            ..defaults.adaptive.clone()
        };
        if !(1..=10).contains(&adaptive.adjustment_strength) {
            return Err(ConfigError::OutOfRange {
                field: "adaptive.adjustment_strength",
                value: adaptive.adjustment_strength as i64,
            });
        }

        let quantization = QuantizationConfig {
            strength_high: self
                .quantization
                .strength_high
                .unwrap_or(adaptive.adjustment_strength >= 7),
            max_load_percent: self
                .quantization
                .max_load_percent
                .unwrap_or(defaults.quantization.max_load_percent)
                .clamp(10, 100),
            ..defaults.quantization.clone()
        };

        let kf = self.keyframe;
        let keyframe = KeyframeConfig {
            auto_default_ms: kf.auto_default_ms.unwrap_or(defaults.keyframe.auto_default_ms),
            min_ms: kf.min_ms.unwrap_or(defaults.keyframe.min_ms),
            max_ms: kf.max_ms.unwrap_or(defaults.keyframe.max_ms),
            relaying_ms: kf.relaying_ms.unwrap_or(defaults.keyframe.relaying_ms),
            ..defaults.keyframe.clone()
        };
        if keyframe.min_ms == 0 || keyframe.min_ms > keyframe.max_ms {
            return Err(ConfigError::OutOfRange {
                field: "keyframe.min_ms",
                value: keyframe.min_ms as i64,
            });
        }

        let base = &defaults.profiles;
        let profiles = ProfileSet {
            user: self.profiles.user.resolve(&base.user),
            medium: self.profiles.medium.resolve(&base.medium),
            low: self.profiles.low.resolve(&base.low),
        };

        let relay = RelayParams {
            relayed_vehicle_id: self.relay.relayed_vehicle_id,
            relay_link: self.relay.link,
            frequency_khz: self.relay.frequency_khz,
            flags: relay_bits(
                "relay.flags",
                &self.relay.flags,
                &[
                    ("video", RelayFlags::VIDEO),
                    ("telemetry", RelayFlags::TELEMETRY),
                    ("commands", RelayFlags::COMMANDS),
                    ("osd_switch", RelayFlags::OSD_SWITCH),
                    ("osd_merge", RelayFlags::OSD_MERGE),
                ],
                RelayFlags::default(),
                |a, b| a | b,
            )?,
            mode: relay_bits(
                "relay.mode",
                &self.relay.mode,
                &[
                    ("main", RelayMode::MAIN),
                    ("remote", RelayMode::REMOTE),
                    ("is_relay_node", RelayMode::IS_RELAY_NODE),
                ],
                RelayMode::NONE,
                |a, b| a | b,
            )?,
        };
        relay.validate(vehicle_id, &topology)?;
        topology.mark_relay_link(relay.relay_link);

        let rt = self.runtime;
        let rd = &defaults.runtime;
        let runtime = RuntimeConfig {
            loop_wait: ms(rt.loop_wait_ms, rd.loop_wait).max(Duration::from_millis(1)),
            stats_interval: ms(rt.stats_interval_ms, rd.stats_interval),
            outbound_capacity: rt.outbound_capacity.unwrap_or(rd.outbound_capacity).max(16),
            reinit_max_attempts: rt.reinit_max_attempts.unwrap_or(rd.reinit_max_attempts).max(1),
            reinit_backoff: ms(rt.reinit_backoff_ms, rd.reinit_backoff),
            rx_error_alarm_per_sec: rt.rx_error_alarm_per_sec.unwrap_or(rd.rx_error_alarm_per_sec),
            no_target_alarm_per_sec: rt.no_target_alarm_per_sec.unwrap_or(rd.no_target_alarm_per_sec),
            tx_overload_percent: rt.tx_overload_percent.unwrap_or(rd.tx_overload_percent),
            link_quality_alarm_below: rt
                .link_quality_alarm_below
                .unwrap_or(rd.link_quality_alarm_below)
                .min(100),
        };

        Ok(RouterConfig {
            version,
            pairing,
            topology,
            endpoints,
            selector,
            receiver,
            adaptive,
            quantization,
            keyframe,
            relay,
            profiles,
            runtime,
        })
    }
}

impl RouterConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(RouterConfig::default());
        }
        let parsed: RouterConfigInput = toml::from_str(input).map_err(|e| ConfigError::Toml(e.to_string()))?;
        parsed.resolve()
    }
}
