//! Encoder quantization control.
//!
//! Watches encoder output against the profile's target bitrate and nudges
//! the quantization parameter: up when output overflows the target or the
//! radio budget, down when it sits under target. Independent of profile
//! shifting, and only active for profiles with adaptive quantization.

use std::time::Duration;

use quanta::Instant;

pub const QUANTIZATION_MIN: u8 = 5;
pub const QUANTIZATION_MAX: u8 = 44;

/// Rate-measurement windows for the overflow checks.
const FAST_WINDOW: Duration = Duration::from_millis(500);
const SLOW_WINDOW: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct QuantizationConfig {
    /// React on the fast window with short dwells.
    pub strength_high: bool,
    pub video_start_holdoff: Duration,
    pub profile_change_holdoff: Duration,
    pub min_change_gap: Duration,
    /// Share of the slowest radio rate video may use, in percent.
    pub max_load_percent: u64,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        QuantizationConfig {
            strength_high: false,
            video_start_holdoff: Duration::from_secs(4),
            profile_change_holdoff: Duration::from_millis(500),
            min_change_gap: Duration::from_millis(200),
            max_load_percent: 80,
        }
    }
}

/// Measurements for one check.
#[derive(Debug, Clone, Copy)]
pub struct QuantizationInput {
    /// Adaptive quantization enabled on the active profile.
    pub enabled: bool,
    pub video_bps: u64,
    /// Everything the radios are sending.
    pub total_bps: u64,
    pub target_bps: u64,
    pub min_radio_bps: u64,
    pub profile_changed_at: Instant,
}

pub struct QuantizationController {
    config: QuantizationConfig,
    value: u8,
    disabled_applied: bool,
    video_started: Option<Instant>,
    last_check: Option<Instant>,
    last_change: Option<Instant>,
    fast_since: Option<Instant>,
    slow_since: Option<Instant>,
    under_since: Option<Instant>,
}

impl QuantizationController {
    pub fn new(config: QuantizationConfig) -> Self {
        QuantizationController {
            config,
            value: 0,
            disabled_applied: false,
            video_started: None,
            last_check: None,
            last_change: None,
            fast_since: None,
            slow_since: None,
            under_since: None,
        }
    }

    /// Current value; 0 means the encoder default.
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Window over which callers should measure `video_bps`.
    pub fn measure_window(&self) -> Duration {
        if self.config.strength_high {
            FAST_WINDOW
        } else {
            SLOW_WINDOW
        }
    }

    fn check_interval(&self) -> Duration {
        Duration::from_millis(if self.config.strength_high { 100 } else { 200 })
    }

    fn overflow_dwell(&self) -> Duration {
        Duration::from_millis(if self.config.strength_high { 250 } else { 500 })
    }

    fn underflow_dwell(&self) -> Duration {
        Duration::from_millis(if self.config.strength_high { 500 } else { 1000 })
    }

    pub fn note_video_started(&mut self, now: Instant) {
        self.video_started.get_or_insert(now);
    }

    /// Starting point for a target bitrate.
    pub fn initial_for(target_bps: u64) -> u8 {
        if target_bps < 2_000_000 {
            40
        } else if target_bps < 5_000_000 {
            30
        } else {
            20
        }
    }

    /// Returns the new value when it changes.
    pub fn update(&mut self, input: QuantizationInput, now: Instant) -> Option<u8> {
        if !input.enabled {
            if self.disabled_applied {
                return None;
            }
            self.disabled_applied = true;
            self.value = 0;
            self.clear_conditions();
            return Some(0);
        }
        self.disabled_applied = false;

        let started = self.video_started?;
        if now.saturating_duration_since(started) < self.config.video_start_holdoff
            || now.saturating_duration_since(input.profile_changed_at) < self.config.profile_change_holdoff
        {
            return None;
        }
        if self
            .last_check
            .is_some_and(|t| now.saturating_duration_since(t) < self.check_interval())
        {
            return None;
        }
        self.last_check = Some(now);

        if self.value == 0 {
            self.value = Self::initial_for(input.target_bps);
            self.last_change = Some(now);
            return Some(self.value);
        }

        let max_load = input.min_radio_bps * self.config.max_load_percent / 100;
        let target = input.target_bps;
        let fast = input.video_bps * 100 >= target * 110 || input.total_bps * 100 > max_load * 110;
        let slow = input.video_bps * 100 >= target * 105;
        let under = input.video_bps * 100 < target * 90;

        let held = |since: &mut Option<Instant>, active: bool| -> Duration {
            if active {
                now.saturating_duration_since(*since.get_or_insert(now))
            } else {
                *since = None;
                Duration::ZERO
            }
        };
        let fast_for = held(&mut self.fast_since, fast);
        let slow_for = held(&mut self.slow_since, slow);
        let under_for = held(&mut self.under_since, under);

        let step: i8 = if fast && fast_for >= self.overflow_dwell() {
            2
        } else if slow && slow_for >= self.overflow_dwell() {
            1
        } else if under && under_for >= self.underflow_dwell() {
            -1
        } else {
            return None;
        };

        if self
            .last_change
            .is_some_and(|t| now.saturating_duration_since(t) < self.config.min_change_gap)
        {
            return None;
        }
        let next = (self.value as i16 + step as i16).clamp(QUANTIZATION_MIN as i16, QUANTIZATION_MAX as i16) as u8;
        self.clear_conditions();
        if next == self.value {
            return None;
        }
        tracing::debug!(from = self.value, to = next, video_bps = input.video_bps, target, "quantization step");
        self.value = next;
        self.last_change = Some(now);
        Some(next)
    }

    fn clear_conditions(&mut self) {
        self.fast_since = None;
        self.slow_since = None;
        self.under_since = None;
    }
}
