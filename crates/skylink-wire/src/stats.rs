//! # Link Statistics
//!
//! Counter records for the radio link. Everything here is plain data plus
//! small windowed helpers; the RX pipeline and TX selector own the instances.
//! All records serialize to JSON for the router's stats snapshot.

use std::collections::VecDeque;
use std::time::Duration;

use quanta::Instant;
use serde::Serialize;

// ─── Per-Interface RX ───────────────────────────────────────────────────────

/// Receive counters for one radio interface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InterfaceRxStats {
    /// Radio buffers read from the interface.
    pub buffers: u64,
    /// Packets split out of those buffers (CRC good or bad).
    pub packets: u64,
    pub bytes: u64,
    pub crc_errors: u64,
    /// Buffers whose structure could not be delimited.
    pub malformed: u64,
    /// CRC failures recovered by a known reconstruction.
    pub reconstructed: u64,
    pub duplicates: u64,
    pub stale: u64,
    /// Packets dropped because they came from an unpaired vehicle.
    pub foreign: u64,
}

impl InterfaceRxStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of received packets that failed the CRC.
    pub fn error_ratio(&self) -> f64 {
        if self.packets == 0 {
            0.0
        } else {
            self.crc_errors as f64 / self.packets as f64
        }
    }
}

// ─── Per-Interface TX ───────────────────────────────────────────────────────

/// Transmit counters for one radio interface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InterfaceTxStats {
    pub frames: u64,
    pub bytes: u64,
    pub video_frames: u64,
    pub data_frames: u64,
    /// Rate used for the most recent frame (bps, or negative MCS code).
    pub last_rate: i32,
}

// ─── Per-Stream ─────────────────────────────────────────────────────────────

/// Counters for one logical stream (either direction).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StreamCounters {
    pub packets: u64,
    pub bytes: u64,
}

impl StreamCounters {
    pub fn record(&mut self, bytes: usize) {
        self.packets += 1;
        self.bytes += bytes as u64;
    }
}

// ─── Rate Counter ───────────────────────────────────────────────────────────

/// Windowed rate counter for computing bytes/sec or packets/sec.
#[derive(Debug, Clone)]
pub struct RateCounter {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
}

impl RateCounter {
    pub fn new(window: Duration) -> Self {
        RateCounter {
            samples: VecDeque::with_capacity(128),
            window,
        }
    }

    /// Record a sample at `now`.
    pub fn record(&mut self, now: Instant, value: u64) {
        self.samples.push_back((now, value));
        self.cleanup(now);
    }

    /// Sum of values in the window divided by the window length (per second).
    pub fn rate(&self, now: Instant) -> f64 {
        self.count_in_window(now) as f64 / self.window.as_secs_f64()
    }

    /// Total within the window ending at `now`.
    pub fn count_in_window(&self, now: Instant) -> u64 {
        self.samples
            .iter()
            .filter(|(t, _)| now.saturating_duration_since(*t) <= self.window)
            .map(|(_, v)| v)
            .sum()
    }

    fn cleanup(&mut self, now: Instant) {
        while let Some((t, _)) = self.samples.front() {
            if now.saturating_duration_since(*t) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

// ─── RX Quality ─────────────────────────────────────────────────────────────

/// Good/bad packet tally for one sampling interval, turned into a 0..=100
/// reception quality score.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityTally {
    good: u32,
    bad: u32,
}

impl QualityTally {
    pub fn record_good(&mut self) {
        self.good = self.good.saturating_add(1);
    }

    pub fn record_bad(&mut self) {
        self.bad = self.bad.saturating_add(1);
    }

    /// Quality for the interval, or `None` if nothing was received.
    pub fn quality(&self) -> Option<u8> {
        let total = self.good as u64 + self.bad as u64;
        if total == 0 {
            return None;
        }
        Some((self.good as u64 * 100 / total) as u8)
    }

    /// Return the interval's quality and start a new interval.
    pub fn take(&mut self) -> Option<u8> {
        let q = self.quality();
        *self = QualityTally::default();
        q
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── RX Counters ────────────────────────────────────────────────────

    #[test]
    fn error_ratio_zero_div() {
        assert_eq!(InterfaceRxStats::new().error_ratio(), 0.0);
    }

    #[test]
    fn error_ratio_correct() {
        let stats = InterfaceRxStats {
            packets: 200,
            crc_errors: 10,
            ..Default::default()
        };
        assert!((stats.error_ratio() - 0.05).abs() < 0.001);
    }

    #[test]
    fn rx_stats_serialization() {
        let stats = InterfaceRxStats {
            packets: 5,
            duplicates: 1,
            ..Default::default()
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"packets\":5"));
        assert!(json.contains("\"duplicates\":1"));
    }

    // ─── RateCounter ────────────────────────────────────────────────────

    #[test]
    fn rate_counter_window_sum() {
        let t0 = Instant::now();
        let mut counter = RateCounter::new(Duration::from_secs(1));
        counter.record(t0, 100);
        counter.record(t0 + Duration::from_millis(500), 200);
        assert_eq!(counter.count_in_window(t0 + Duration::from_millis(600)), 300);
        assert!((counter.rate(t0 + Duration::from_millis(600)) - 300.0).abs() < 0.001);
    }

    #[test]
    fn rate_counter_expires_old_samples() {
        let t0 = Instant::now();
        let mut counter = RateCounter::new(Duration::from_millis(100));
        counter.record(t0, 1000);
        counter.record(t0 + Duration::from_millis(250), 10);
        assert_eq!(counter.count_in_window(t0 + Duration::from_millis(250)), 10);
    }

    // ─── Quality ────────────────────────────────────────────────────────

    #[test]
    fn quality_none_when_idle() {
        assert_eq!(QualityTally::default().quality(), None);
    }

    #[test]
    fn quality_take_resets() {
        let mut tally = QualityTally::default();
        for _ in 0..3 {
            tally.record_good();
        }
        tally.record_bad();
        assert_eq!(tally.take(), Some(75));
        assert_eq!(tally.take(), None);
    }
}
