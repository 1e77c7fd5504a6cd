//! # Adaptive Video Link
//!
//! Trades video quality for link robustness. The profile controller walks
//! `{User, Medium, Low} × shift` from reception feedback; the quantization
//! and keyframe controllers tune the encoder within the active profile.
//!
//! The controller is the only writer of [`OverwriteState`]. Everyone else
//! reads immutable snapshots published through `ArcSwap`.

pub mod controller;
pub mod keyframe;
pub mod quantization;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::radio::DataRate;

pub use controller::{AdaptiveController, PeerReport};
pub use keyframe::{KeyframeConfig, KeyframeController, KeyframeInput};
pub use quantization::{QuantizationConfig, QuantizationController, QuantizationInput};

/// Upper bound on EC blocks per data block group.
pub const MAX_FECS: u8 = 32;

// ─── Profiles ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoProfile {
    User,
    Medium,
    Low,
}

impl VideoProfile {
    pub fn lower(self) -> Option<VideoProfile> {
        match self {
            VideoProfile::User => Some(VideoProfile::Medium),
            VideoProfile::Medium => Some(VideoProfile::Low),
            VideoProfile::Low => None,
        }
    }

    pub fn higher(self) -> Option<VideoProfile> {
        match self {
            VideoProfile::User => None,
            VideoProfile::Medium => Some(VideoProfile::User),
            VideoProfile::Low => Some(VideoProfile::Medium),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoProfile::User => "user",
            VideoProfile::Medium => "medium",
            VideoProfile::Low => "low",
        }
    }
}

/// Encoder and EC settings of one profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSettings {
    pub bitrate_bps: u32,
    pub data_blocks: u8,
    pub base_fec: u8,
    /// Pinned keyframe interval; `None` lets the keyframe controller decide.
    pub fixed_keyframe_ms: Option<u32>,
    pub adaptive_quantization: bool,
    pub fps: u32,
    pub radio_rate: DataRate,
}

impl ProfileSettings {
    /// Highest shift level the profile supports.
    pub fn max_shift(&self) -> u8 {
        MAX_FECS
            .min(self.data_blocks.saturating_mul(3))
            .saturating_sub(self.base_fec)
    }

    /// EC blocks at `shift`, clamped to `[base_fec, 3 × data_blocks]`.
    pub fn ec_blocks(&self, shift: u8) -> u8 {
        let ceiling = self.data_blocks.saturating_mul(3).max(self.base_fec);
        self.base_fec.saturating_add(shift).clamp(self.base_fec, ceiling)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSet {
    pub user: ProfileSettings,
    pub medium: ProfileSettings,
    pub low: ProfileSettings,
}

impl ProfileSet {
    pub fn get(&self, profile: VideoProfile) -> &ProfileSettings {
        match profile {
            VideoProfile::User => &self.user,
            VideoProfile::Medium => &self.medium,
            VideoProfile::Low => &self.low,
        }
    }
}

impl Default for ProfileSet {
    fn default() -> Self {
        ProfileSet {
            user: ProfileSettings {
                bitrate_bps: 8_000_000,
                data_blocks: 8,
                base_fec: 4,
                fixed_keyframe_ms: None,
                adaptive_quantization: true,
                fps: 30,
                radio_rate: DataRate::mcs(3),
            },
            medium: ProfileSettings {
                bitrate_bps: 4_000_000,
                data_blocks: 6,
                base_fec: 4,
                fixed_keyframe_ms: None,
                adaptive_quantization: true,
                fps: 30,
                radio_rate: DataRate::mcs(1),
            },
            low: ProfileSettings {
                bitrate_bps: 1_500_000,
                data_blocks: 4,
                base_fec: 4,
                fixed_keyframe_ms: None,
                adaptive_quantization: false,
                fps: 30,
                radio_rate: DataRate::MCS0,
            },
        }
    }
}

// ─── Shared State ───────────────────────────────────────────────────────────

/// Snapshot of everything the adaptive layer decided.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverwriteState {
    pub profile: VideoProfile,
    pub forced: Option<VideoProfile>,
    pub shift: u8,
    /// Standing downward bitrate adjustment from TX overload.
    pub bitrate_overwrite_down_bps: u32,
    pub data_blocks: u8,
    pub ec_blocks: u8,
    pub target_bitrate_bps: u32,
    /// 0 means the encoder default.
    pub quantization: u8,
    pub keyframe_ms: u32,
    pub video_rate: DataRate,
}

/// Outputs of the adaptive layer, applied by the router.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkCommand {
    SetBitrate { bps: u32 },
    SetQuantization { value: u8 },
    SetKeyframe { interval_ms: u32 },
    BroadcastState(Arc<OverwriteState>),
}

// ─── Configuration ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    /// 1..=10; higher reacts faster and more aggressively.
    pub adjustment_strength: u8,
    pub use_peer_feedback: bool,
    pub go_lower_on_link_lost: bool,
    /// Link loss never drops below Medium.
    pub medium_only: bool,
    /// Shift levels kept in reserve when escalating to a higher profile.
    pub up_margin: u8,
    pub minimum_ok_interval: Duration,
    pub stats_interval: Duration,
    pub peer_fresh: Duration,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        AdaptiveConfig {
            adjustment_strength: 5,
            use_peer_feedback: false,
            go_lower_on_link_lost: true,
            medium_only: false,
            up_margin: 1,
            minimum_ok_interval: Duration::from_millis(1000),
            stats_interval: Duration::from_millis(80),
            peer_fresh: Duration::from_millis(1500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_ladder() {
        assert_eq!(VideoProfile::User.lower(), Some(VideoProfile::Medium));
        assert_eq!(VideoProfile::Low.lower(), None);
        assert_eq!(VideoProfile::Low.higher(), Some(VideoProfile::Medium));
        assert_eq!(VideoProfile::User.higher(), None);
    }

    #[test]
    fn max_shift_respects_fec_ceiling() {
        let set = ProfileSet::default();
        assert_eq!(set.user.max_shift(), 20);
        assert_eq!(set.medium.max_shift(), 14);
        assert_eq!(set.low.max_shift(), 8);

        let wide = ProfileSettings {
            data_blocks: 16,
            base_fec: 2,
            ..set.user.clone()
        };
        assert_eq!(wide.max_shift(), MAX_FECS - 2);
    }

    #[test]
    fn ec_blocks_clamped() {
        let p = ProfileSet::default().low;
        assert_eq!(p.ec_blocks(0), 4);
        assert_eq!(p.ec_blocks(p.max_shift()), 12);
        assert_eq!(p.ec_blocks(200), 12);
    }
}
