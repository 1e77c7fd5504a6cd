//! # Profile Controller
//!
//! Walks the `{User, Medium, Low} × shift` ladder from local RX quality,
//! optional peer reports, and controller-link liveness.
//!
//! ## Policy
//!
//! Evaluated every `check_interval`, which shrinks as adjustment strength
//! grows. Local quality is averaged over a short window for down-shifts and
//! a long one for up-shifts. Down-shifts past the profile's last level land
//! on the next lower profile at shift 0; up-shifts past shift 0 land on the
//! next higher profile just below its maximum shift, and only after quality
//! has held for `minimum_ok_interval`. Every transition waits out a dwell
//! time measured from the previous one.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use quanta::Instant;

use super::{AdaptiveConfig, LinkCommand, OverwriteState, ProfileSet, VideoProfile};

/// Quality history depth, in stats intervals.
pub const MAX_INTERVALS: usize = 24;
/// Fewest samples a down-shift decision needs.
pub const MIN_INTERVALS: usize = 3;
const EMPTY_SAMPLE: u8 = 255;
/// Average local quality below this shifts down.
const QUALITY_OK: f32 = 90.0;

const NON_USER_BITRATE_FLOOR: u32 = 250_000;
const BITRATE_FLOOR: u32 = 200_000;

const OVERLOAD_MIN_STEP: u32 = 100_000;
const OVERLOAD_LOW_STEP: u32 = 250_000;
const OVERLOAD_RECOVER_STEP: u32 = 500_000;
const OVERLOAD_RECOVER_AFTER: Duration = Duration::from_secs(1);

/// Per-interval counters reported by the peer (controller side).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeerReport {
    pub intervals: u32,
    /// Blocks reconstructed using every available EC block.
    pub at_ec_limit: u32,
    pub retransmissions: u32,
    pub bad_output: u32,
    /// Intervals with missing data.
    pub missing: u32,
}

#[derive(Debug, Default)]
struct Evaluation {
    down_levels: u8,
    down_profile: bool,
    up_ok: bool,
}

pub struct AdaptiveController {
    config: AdaptiveConfig,
    profiles: ProfileSet,
    state: OverwriteState,
    published: Arc<ArcSwap<OverwriteState>>,
    history: [u8; MAX_INTERVALS],
    history_next: usize,
    peer: Option<(PeerReport, Instant)>,
    last_check: Option<Instant>,
    last_change: Instant,
    profile_changed_at: Instant,
    good_since: Option<Instant>,
    last_controller_packet: Option<Instant>,
    overload_last: Option<Instant>,
    overload_last_shrink: Option<Instant>,
}

impl AdaptiveController {
    pub fn new(config: AdaptiveConfig, profiles: ProfileSet, now: Instant) -> Self {
        let state = initial_state(&profiles, VideoProfile::User, None);
        let published = Arc::new(ArcSwap::from_pointee(state.clone()));
        AdaptiveController {
            config,
            profiles,
            state,
            published,
            history: [EMPTY_SAMPLE; MAX_INTERVALS],
            history_next: 0,
            peer: None,
            last_check: None,
            last_change: now,
            profile_changed_at: now,
            good_since: None,
            last_controller_packet: None,
            overload_last: None,
            overload_last_shrink: None,
        }
    }

    pub fn state(&self) -> &OverwriteState {
        &self.state
    }

    pub fn profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    /// Shared handle readers load snapshots from.
    pub fn snapshot_handle(&self) -> Arc<ArcSwap<OverwriteState>> {
        self.published.clone()
    }

    pub fn profile_changed_at(&self) -> Instant {
        self.profile_changed_at
    }

    pub fn last_controller_packet(&self) -> Option<Instant> {
        self.last_controller_packet
    }

    /// How often callers should feed a quality sample.
    pub fn stats_interval(&self) -> Duration {
        self.config.stats_interval
    }

    // ─── Derived Parameters ─────────────────────────────────────────────

    /// Normalised strength in `[0, 1]`; the User profile reacts two notches
    /// harder.
    pub fn strength(&self) -> f32 {
        let mut adj = self.config.adjustment_strength as f32;
        if self.state.profile == VideoProfile::User {
            adj += 2.0;
        }
        (0.8 * adj / 10.0).clamp(0.0, 1.0)
    }

    pub fn check_interval(&self) -> Duration {
        let ms = 200u64.saturating_sub(self.config.adjustment_strength as u64 * 15);
        Duration::from_millis(ms.max(20))
    }

    pub fn down_window(&self) -> usize {
        let w = 3.0 + (1.0 - self.strength()) * 0.5 * MAX_INTERVALS as f32;
        (w as usize).clamp(MIN_INTERVALS, MAX_INTERVALS)
    }

    pub fn up_window(&self) -> usize {
        let w = 6.0 + self.strength() * MAX_INTERVALS as f32;
        (w as usize).min(MAX_INTERVALS)
    }

    pub fn dwell_down(&self) -> Duration {
        let weak = 1.0 - self.strength();
        let ms = match self.state.profile {
            VideoProfile::Medium => 200.0 + weak * 1000.0,
            _ => 50.0 + weak * 500.0,
        };
        Duration::from_millis(ms.round() as u64)
    }

    pub fn dwell_up(&self) -> Duration {
        Duration::from_millis((500.0 + (1.0 - self.strength()) * 1500.0).round() as u64)
    }

    fn per_level(&self) -> f32 {
        ((1.0 - self.strength()) * 50.0).max(1.0)
    }

    fn link_lost_threshold(&self) -> Duration {
        let adj = self.config.adjustment_strength as f32;
        let ms = 1000.0 + (1.0 - adj / 10.0).max(0.0) * 2000.0;
        Duration::from_millis(ms.round() as u64)
    }

    // ─── Inputs ─────────────────────────────────────────────────────────

    /// One stats-interval quality sample (0..=100).
    pub fn record_rx_quality(&mut self, quality: u8) {
        self.history[self.history_next] = quality.min(100);
        self.history_next = (self.history_next + 1) % MAX_INTERVALS;
    }

    pub fn record_peer_report(&mut self, report: PeerReport, now: Instant) {
        self.peer = Some((report, now));
    }

    pub fn note_controller_packet(&mut self, now: Instant) {
        self.last_controller_packet = Some(now);
    }

    /// Newest quality sample, if any.
    pub fn latest_quality(&self) -> Option<u8> {
        let idx = (self.history_next + MAX_INTERVALS - 1) % MAX_INTERVALS;
        Some(self.history[idx]).filter(|&q| q != EMPTY_SAMPLE)
    }

    /// Best quality sample still in the history.
    pub fn best_recent_quality(&self) -> Option<u8> {
        self.history.iter().copied().filter(|&q| q != EMPTY_SAMPLE).max()
    }

    /// Average of the newest `n` samples. `None` when fewer than `need`
    /// samples exist.
    fn average(&self, n: usize, need: usize) -> Option<f32> {
        let mut sum = 0u32;
        let mut count = 0usize;
        for back in 1..=n.min(MAX_INTERVALS) {
            let idx = (self.history_next + MAX_INTERVALS - back) % MAX_INTERVALS;
            let q = self.history[idx];
            if q == EMPTY_SAMPLE {
                break;
            }
            sum += q as u32;
            count += 1;
        }
        (count >= need && count > 0).then(|| sum as f32 / count as f32)
    }

    // ─── Evaluation ─────────────────────────────────────────────────────

    fn evaluate(&self, now: Instant) -> Evaluation {
        let mut eval = Evaluation::default();
        let per_level = self.per_level();

        if let Some(avg) = self.average(self.down_window(), MIN_INTERVALS) {
            if avg < QUALITY_OK {
                let levels = ((QUALITY_OK - avg) / per_level) as u8;
                eval.down_levels = levels.max(1);
            }
        }
        let up_window = self.up_window();
        if let Some(avg) = self.average(up_window, up_window) {
            eval.up_ok = avg >= QUALITY_OK - per_level / 2.0;
        }

        if let Some(peer) = self.fresh_peer(now) {
            let s = self.strength();
            let weak = 1.0 - s;
            let i = peer.intervals as f32;
            let ec = peer.at_ec_limit as f32;
            let retr = peer.retransmissions as f32;

            if ec > i * (0.7 * weak + 0.1) {
                eval.down_levels = eval.down_levels.saturating_add(1);
            }
            if retr > i * (0.5 * weak + 0.2) {
                eval.down_levels = eval.down_levels.saturating_add(1);
            }
            if peer.bad_output as f32 > 0.5 * i + 1.0 || retr > i * (0.9 * weak + 0.1) {
                eval.down_profile = true;
            }
            let peer_up = (peer.missing as f32) < 0.5 * i
                && ec < i * (0.3 * weak + 0.05) + 1.0
                && retr < i * (0.2 * weak + 0.1) + 1.0;
            eval.up_ok &= peer_up;
        }
        eval
    }

    fn fresh_peer(&self, now: Instant) -> Option<PeerReport> {
        if !self.config.use_peer_feedback {
            return None;
        }
        self.peer
            .filter(|(_, at)| now.saturating_duration_since(*at) <= self.config.peer_fresh)
            .map(|(r, _)| r)
    }

    fn link_lost_target(&self, now: Instant) -> Option<VideoProfile> {
        if !self.config.go_lower_on_link_lost {
            return None;
        }
        let last = self.last_controller_packet?;
        let threshold = self.link_lost_threshold();
        if now.saturating_duration_since(last) <= threshold {
            return None;
        }
        if now.saturating_duration_since(self.last_change) < threshold.mul_f32(0.7) {
            return None;
        }
        match self.state.profile {
            VideoProfile::User => Some(VideoProfile::Medium),
            VideoProfile::Medium if !self.config.medium_only => Some(VideoProfile::Low),
            _ => None,
        }
    }

    /// Periodic evaluation. Runs at most once per `check_interval`.
    pub fn tick(&mut self, now: Instant) -> Vec<LinkCommand> {
        if self
            .last_check
            .is_some_and(|t| now.saturating_duration_since(t) < self.check_interval())
        {
            return Vec::new();
        }
        self.last_check = Some(now);

        if self.state.forced.is_some() {
            return Vec::new();
        }
        if let Some(lower) = self.link_lost_target(now) {
            return self.apply(lower, 0, now, "controller link lost");
        }

        let eval = self.evaluate(now);
        if eval.up_ok {
            self.good_since.get_or_insert(now);
        } else {
            self.good_since = None;
        }

        let since_change = now.saturating_duration_since(self.last_change);
        let profile = self.state.profile;
        let max_shift = self.profiles.get(profile).max_shift();

        if eval.down_profile || eval.down_levels > 0 {
            if since_change < self.dwell_down() {
                return Vec::new();
            }
            let past_max = self.state.shift as u16 + eval.down_levels as u16 > max_shift as u16;
            if eval.down_profile || past_max {
                return match profile.lower() {
                    Some(lower) => self.apply(lower, 0, now, "quality low"),
                    None => self.apply(profile, max_shift, now, "quality low"),
                };
            }
            return self.apply(profile, self.state.shift + eval.down_levels, now, "quality low");
        }

        if eval.up_ok && since_change >= self.dwell_up() {
            if self.state.shift > 0 {
                return self.apply(profile, self.state.shift - 1, now, "quality good");
            }
            let held = self
                .good_since
                .is_some_and(|t| now.saturating_duration_since(t) >= self.config.minimum_ok_interval);
            if let (Some(higher), true) = (profile.higher(), held) {
                let shift = self
                    .profiles
                    .get(higher)
                    .max_shift()
                    .saturating_sub(self.config.up_margin);
                return self.apply(higher, shift, now, "quality good");
            }
        }
        Vec::new()
    }

    // ─── Overrides ──────────────────────────────────────────────────────

    /// Pin (or release) the profile. Pinning resets the overwrite state.
    pub fn force_profile(&mut self, profile: Option<VideoProfile>, now: Instant) -> Vec<LinkCommand> {
        self.state.forced = profile;
        match profile {
            Some(p) => {
                tracing::info!(profile = p.as_str(), "video profile forced");
                self.reset(now)
            }
            None => {
                tracing::info!("video profile released");
                vec![self.publish()]
            }
        }
    }

    /// Back to shift 0 of the base profile with no overwrite and no history.
    pub fn reset(&mut self, now: Instant) -> Vec<LinkCommand> {
        let profile = self.state.forced.unwrap_or(VideoProfile::User);
        let keyframe_ms = self.state.keyframe_ms;
        self.state = initial_state(&self.profiles, profile, self.state.forced);
        self.state.keyframe_ms = keyframe_ms;
        self.history = [EMPTY_SAMPLE; MAX_INTERVALS];
        self.history_next = 0;
        self.peer = None;
        self.good_since = None;
        self.last_change = now;
        self.profile_changed_at = now;
        self.overload_last = None;
        self.overload_last_shrink = None;
        vec![
            LinkCommand::SetBitrate {
                bps: self.state.target_bitrate_bps,
            },
            self.publish(),
        ]
    }

    /// Feed the TX overload detector. Overload grows the standing downward
    /// bitrate overwrite; a quiet second shrinks it again.
    pub fn record_tx_overload(&mut self, overloaded: bool, now: Instant) -> Vec<LinkCommand> {
        let total = self.state.bitrate_overwrite_down_bps;
        let low = self.state.profile == VideoProfile::Low;
        let new_total = if overloaded {
            let cap = if low {
                OVERLOAD_LOW_STEP
            } else {
                self.state.target_bitrate_bps / 4
            };
            let step = OVERLOAD_MIN_STEP.max(total / 10).min(cap);
            let max_total = self.profiles.user.bitrate_bps / 3 * 2;
            self.overload_last = Some(now);
            self.overload_last_shrink = Some(now);
            total.saturating_add(step).min(max_total)
        } else {
            let quiet = |t: Option<Instant>| {
                t.is_none_or(|t| now.saturating_duration_since(t) >= OVERLOAD_RECOVER_AFTER)
            };
            if total == 0 || !quiet(self.overload_last) || !quiet(self.overload_last_shrink) {
                return Vec::new();
            }
            self.overload_last_shrink = Some(now);
            let step = if low { OVERLOAD_LOW_STEP } else { OVERLOAD_RECOVER_STEP };
            total.saturating_sub(step)
        };

        if new_total == total {
            return Vec::new();
        }
        tracing::info!(
            overwrite_bps = new_total,
            previous_bps = total,
            overloaded,
            "video bitrate overwrite changed"
        );
        self.state.bitrate_overwrite_down_bps = new_total;
        let mut cmds = Vec::new();
        self.refresh_bitrate(&mut cmds);
        cmds.push(self.publish());
        cmds
    }

    /// Record the quantization the encoder now uses.
    pub fn set_quantization(&mut self, value: u8) -> Vec<LinkCommand> {
        self.state.quantization = value;
        vec![LinkCommand::SetQuantization { value }, self.publish()]
    }

    pub fn set_keyframe(&mut self, interval_ms: u32) -> Vec<LinkCommand> {
        self.state.keyframe_ms = interval_ms;
        vec![LinkCommand::SetKeyframe { interval_ms }, self.publish()]
    }

    // ─── Transitions ────────────────────────────────────────────────────

    fn apply(&mut self, profile: VideoProfile, shift: u8, now: Instant, reason: &'static str) -> Vec<LinkCommand> {
        if profile == self.state.profile && shift == self.state.shift {
            return Vec::new();
        }
        let settings = self.profiles.get(profile);
        let shift = shift.min(settings.max_shift());
        let from = (self.state.profile, self.state.shift);

        self.state.data_blocks = settings.data_blocks;
        self.state.ec_blocks = settings.ec_blocks(shift);
        self.state.video_rate = settings.radio_rate;
        self.state.shift = shift;
        if profile != self.state.profile {
            self.state.profile = profile;
            self.profile_changed_at = now;
            self.good_since = None;
        }
        self.last_change = now;

        tracing::info!(
            from_profile = from.0.as_str(),
            from_shift = from.1,
            profile = profile.as_str(),
            shift,
            ec = self.state.ec_blocks,
            reason,
            "video link shift"
        );

        let mut cmds = Vec::new();
        self.refresh_bitrate(&mut cmds);
        cmds.push(self.publish());
        cmds
    }

    fn refresh_bitrate(&mut self, cmds: &mut Vec<LinkCommand>) {
        let bps = self.compute_bitrate();
        if bps != self.state.target_bitrate_bps {
            self.state.target_bitrate_bps = bps;
            cmds.push(LinkCommand::SetBitrate { bps });
        }
    }

    fn compute_bitrate(&self) -> u32 {
        let base = self.profiles.get(self.state.profile).bitrate_bps;
        let mut bps = base.saturating_sub(self.state.bitrate_overwrite_down_bps);
        if self.state.profile != VideoProfile::User {
            bps = bps.max(NON_USER_BITRATE_FLOOR);
        }
        bps.max(BITRATE_FLOOR)
    }

    fn publish(&self) -> LinkCommand {
        let snapshot = Arc::new(self.state.clone());
        self.published.store(snapshot.clone());
        LinkCommand::BroadcastState(snapshot)
    }
}

fn initial_state(profiles: &ProfileSet, profile: VideoProfile, forced: Option<VideoProfile>) -> OverwriteState {
    let settings = profiles.get(profile);
    OverwriteState {
        profile,
        forced,
        shift: 0,
        bitrate_overwrite_down_bps: 0,
        data_blocks: settings.data_blocks,
        ec_blocks: settings.ec_blocks(0),
        target_bitrate_bps: settings.bitrate_bps.max(BITRATE_FLOOR),
        quantization: 0,
        keyframe_ms: settings.fixed_keyframe_ms.unwrap_or(0),
        video_rate: settings.radio_rate,
    }
}
