//! Keyframe interval control.
//!
//! Short intervals recover faster from loss; long ones save bitrate. The
//! interval tracks reception quality and controller-link freshness unless
//! the profile or relaying pins it.

use std::time::Duration;

use quanta::Instant;

use super::VideoProfile;

#[derive(Debug, Clone)]
pub struct KeyframeConfig {
    pub auto_default_ms: u32,
    pub min_ms: u32,
    pub max_ms: u32,
    /// Interval while this node passes another vehicle's video through.
    pub relaying_ms: u32,
    /// Controller link counts as fresh below this age.
    pub controller_fresh: Duration,
}

impl Default for KeyframeConfig {
    fn default() -> Self {
        KeyframeConfig {
            auto_default_ms: 200,
            min_ms: 100,
            max_ms: 6000,
            relaying_ms: 200,
            controller_fresh: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KeyframeInput {
    pub relay_pass_through: bool,
    pub fixed_interval_ms: Option<u32>,
    /// Time since the last controller packet; `None` if never linked.
    pub controller_link_age: Option<Duration>,
    pub quality: Option<u8>,
    pub best_quality: Option<u8>,
    /// Interval the controller asked for.
    pub requested_ms: Option<u32>,
    pub profile: VideoProfile,
    pub at_max_shift: bool,
    pub fps: u32,
}

pub struct KeyframeController {
    config: KeyframeConfig,
    current_ms: u32,
    last_change: Option<Instant>,
}

impl KeyframeController {
    pub fn new(config: KeyframeConfig) -> Self {
        let current_ms = config.auto_default_ms;
        KeyframeController {
            config,
            current_ms,
            last_change: None,
        }
    }

    pub fn interval_ms(&self) -> u32 {
        self.current_ms
    }

    /// Shortest interval worth using: two frames, never below the default.
    pub fn lowest_ms(&self, fps: u32) -> u32 {
        let two_frames = 2000 / fps.max(1);
        self.config.auto_default_ms.max(two_frames)
    }

    /// Returns the new interval when it changes.
    pub fn update(&mut self, input: KeyframeInput, now: Instant) -> Option<u32> {
        let lowest = self.lowest_ms(input.fps);
        let fresh = input
            .controller_link_age
            .is_some_and(|age| age < self.config.controller_fresh);

        // (interval, minimum spacing since the last change)
        let (wanted, spacing) = if input.relay_pass_through {
            (self.config.relaying_ms, 0)
        } else if let Some(fixed) = input.fixed_interval_ms {
            (fixed, 0)
        } else if let (true, true, Some(req)) = (
            fresh,
            input.best_quality.is_some_and(|q| q >= 20),
            input.requested_ms,
        ) {
            (req, 0)
        } else if !fresh
            || input.profile == VideoProfile::Low
            || (input.profile == VideoProfile::Medium && input.at_max_shift)
        {
            (lowest, 0)
        } else {
            match input.quality {
                Some(q) if q < 50 => (lowest, 300),
                Some(q) if q < 70 => ((self.current_ms / 2).max(lowest * 2).min(self.current_ms), 300),
                Some(q) if q > 90 => (self.current_ms.saturating_mul(4), 200),
                Some(q) if q > 70 => (self.current_ms.saturating_mul(2), 400),
                _ => return None,
            }
        };

        let wanted = wanted.clamp(self.config.min_ms, self.config.max_ms);
        if wanted == self.current_ms {
            return None;
        }
        if self
            .last_change
            .is_some_and(|t| now.saturating_duration_since(t) < Duration::from_millis(spacing))
        {
            return None;
        }
        tracing::debug!(from = self.current_ms, to = wanted, "keyframe interval");
        self.current_ms = wanted;
        self.last_change = Some(now);
        Some(wanted)
    }
}
