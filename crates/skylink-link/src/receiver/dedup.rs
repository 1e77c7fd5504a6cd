//! Per-vehicle, per-stream sequence tracking.
//!
//! Tracks the highest accepted sequence for every `(vehicle, stream)` pair,
//! plus a 512-slot ring of recently accepted sequences for exact-duplicate
//! detection. State is created lazily on the first packet. At most
//! `max_vehicles` senders are tracked; a new one evicts the longest idle.
//!
//! Sequences are 28 bits wide on the wire. A jump from just below the top
//! of that range to just above zero is forward progress, not a restart.

use std::collections::HashMap;
use std::time::Duration;

use quanta::Instant;
use skylink_wire::wire::{stream_slot, MAX_RADIO_STREAMS, STREAM_SEQUENCE_MASK};

const RING_SLOTS: usize = 512;
const RING_MASK: u32 = (RING_SLOTS - 1) as u32;
const EMPTY_SLOT: u32 = u32::MAX;

/// Concurrent senders a receiver keeps sequence state for.
pub const MAX_TRACKED_VEHICLES: usize = 6;

#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Packets further behind the max than this are stale.
    pub stale_window: u32,
    /// Packets further behind than this mean the sender restarted.
    pub restart_gap: u32,
    /// Treat a stale packet as a restart after the stream idled this long.
    pub idle_restart_after: Option<Duration>,
    pub max_vehicles: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            stale_window: 10,
            restart_gap: 1000,
            idle_restart_after: None,
            max_vehicles: MAX_TRACKED_VEHICLES,
        }
    }
}

/// Outcome of checking one sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqVerdict {
    Accept,
    Duplicate,
    /// Too far behind; dropped without touching state.
    Stale,
    /// The vehicle restarted. Its state was reset and tracking resumed at
    /// this sequence.
    Restart,
}

struct StreamTrack {
    max_seq: u32,
    ring: Box<[u32; RING_SLOTS]>,
    last_rx: Instant,
}

impl StreamTrack {
    fn start(seq: u32, now: Instant) -> Self {
        let mut track = StreamTrack {
            max_seq: seq,
            ring: Box::new([EMPTY_SLOT; RING_SLOTS]),
            last_rx: now,
        };
        track.ring[(seq & RING_MASK) as usize] = seq;
        track
    }

    fn record(&mut self, seq: u32, advance: bool, now: Instant) {
        self.ring[(seq & RING_MASK) as usize] = seq;
        if advance {
            self.max_seq = seq;
        }
        self.last_rx = now;
    }
}

/// Where `seq` lies relative to a stream's max.
enum Position {
    Ahead,
    Behind(u32),
}

fn position(max: u32, seq: u32, restart_gap: u32) -> Position {
    let forward = seq.wrapping_sub(max) & STREAM_SEQUENCE_MASK;
    let backward = max.wrapping_sub(seq) & STREAM_SEQUENCE_MASK;
    if seq > max {
        // A huge jump up from near zero is a late packet from before a wrap.
        if backward <= restart_gap {
            Position::Behind(backward)
        } else {
            Position::Ahead
        }
    } else if seq < max && forward <= restart_gap {
        Position::Ahead
    } else {
        Position::Behind(max - seq)
    }
}

struct VehicleTracks {
    streams: [Option<StreamTrack>; MAX_RADIO_STREAMS],
    last_rx: Instant,
}

impl VehicleTracks {
    fn new(now: Instant) -> Self {
        VehicleTracks {
            streams: Default::default(),
            last_rx: now,
        }
    }
}

#[derive(Default)]
pub struct DuplicateDetector {
    config: DedupConfig,
    vehicles: HashMap<u32, VehicleTracks>,
    evicted: u64,
}

impl DuplicateDetector {
    pub fn new(config: DedupConfig) -> Self {
        DuplicateDetector {
            config,
            vehicles: HashMap::new(),
            evicted: 0,
        }
    }

    fn tracks_for(&mut self, vehicle: u32, now: Instant) -> &mut VehicleTracks {
        if !self.vehicles.contains_key(&vehicle) && self.vehicles.len() >= self.config.max_vehicles.max(1) {
            let idlest = self
                .vehicles
                .iter()
                .min_by_key(|(_, tracks)| tracks.last_rx)
                .map(|(id, _)| *id);
            if let Some(id) = idlest {
                self.vehicles.remove(&id);
                self.evicted += 1;
                tracing::debug!(vehicle_id = id, "sequence state evicted");
            }
        }
        let tracks = self.vehicles.entry(vehicle).or_insert_with(|| VehicleTracks::new(now));
        tracks.last_rx = now;
        tracks
    }

    pub fn check(&mut self, vehicle: u32, stream: u8, seq: u32, now: Instant) -> SeqVerdict {
        let slot = stream_slot(stream);
        let config = self.config.clone();
        let tracks = self.tracks_for(vehicle, now);
        let Some(track) = tracks.streams[slot].as_mut() else {
            tracks.streams[slot] = Some(StreamTrack::start(seq, now));
            return SeqVerdict::Accept;
        };

        let behind = match position(track.max_seq, seq, config.restart_gap) {
            Position::Ahead => {
                track.record(seq, true, now);
                return SeqVerdict::Accept;
            }
            Position::Behind(behind) => behind,
        };
        let idle = config
            .idle_restart_after
            .is_some_and(|limit| now.saturating_duration_since(track.last_rx) > limit);

        if behind > config.restart_gap || (behind > config.stale_window && idle) {
            // Restart resets every stream of the vehicle.
            tracks.streams = Default::default();
            tracks.streams[slot] = Some(StreamTrack::start(seq, now));
            return SeqVerdict::Restart;
        }
        if behind > config.stale_window {
            return SeqVerdict::Stale;
        }
        if track.ring[(seq & RING_MASK) as usize] == seq {
            return SeqVerdict::Duplicate;
        }
        track.record(seq, false, now);
        SeqVerdict::Accept
    }

    /// Highest accepted sequence for a stream.
    pub fn max_seq(&self, vehicle: u32, stream: u8) -> Option<u32> {
        self.vehicles
            .get(&vehicle)
            .and_then(|t| t.streams[stream_slot(stream)].as_ref())
            .map(|t| t.max_seq)
    }

    /// Forget everything about a vehicle.
    pub fn reset_vehicle(&mut self, vehicle: u32) {
        self.vehicles.remove(&vehicle);
    }

    pub fn tracked_vehicles(&self) -> usize {
        self.vehicles.len()
    }

    /// Vehicles dropped to make room for a new sender.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> DuplicateDetector {
        DuplicateDetector::new(DedupConfig::default())
    }

    #[test]
    fn first_packet_starts_tracking() {
        let mut d = detector();
        let now = Instant::now();
        assert_eq!(d.check(7, 4, 100, now), SeqVerdict::Accept);
        assert_eq!(d.max_seq(7, 4), Some(100));
        assert_eq!(d.max_seq(7, 1), None);
    }

    #[test]
    fn exact_repeat_is_duplicate() {
        let mut d = detector();
        let now = Instant::now();
        d.check(7, 4, 100, now);
        d.check(7, 4, 101, now);
        assert_eq!(d.check(7, 4, 101, now), SeqVerdict::Duplicate);
        assert_eq!(d.check(7, 4, 100, now), SeqVerdict::Duplicate);
    }

    #[test]
    fn late_within_window_accepted_once() {
        let mut d = detector();
        let now = Instant::now();
        d.check(7, 4, 100, now);
        d.check(7, 4, 105, now);
        assert_eq!(d.check(7, 4, 103, now), SeqVerdict::Accept);
        assert_eq!(d.check(7, 4, 103, now), SeqVerdict::Duplicate);
        assert_eq!(d.max_seq(7, 4), Some(105));
    }

    #[test]
    fn stale_leaves_state_untouched() {
        let mut d = detector();
        let now = Instant::now();
        d.check(7, 4, 50, now);
        assert_eq!(d.check(7, 4, 5, now), SeqVerdict::Stale);
        assert_eq!(d.max_seq(7, 4), Some(50));
    }

    #[test]
    fn far_behind_is_restart_and_resets_vehicle() {
        let mut d = detector();
        let now = Instant::now();
        d.check(7, 1, 300, now);
        d.check(7, 4, 2000, now);
        assert_eq!(d.check(7, 4, 5, now), SeqVerdict::Restart);
        assert_eq!(d.max_seq(7, 4), Some(5));
        assert_eq!(d.max_seq(7, 1), None);
        assert_eq!(d.check(7, 4, 6, now), SeqVerdict::Accept);
    }

    #[test]
    fn idle_stream_restarts_on_stale() {
        let mut d = DuplicateDetector::new(DedupConfig {
            idle_restart_after: Some(Duration::from_secs(2)),
            ..Default::default()
        });
        let t0 = Instant::now();
        d.check(7, 4, 50, t0);
        assert_eq!(d.check(7, 4, 5, t0 + Duration::from_secs(1)), SeqVerdict::Stale);
        assert_eq!(d.check(7, 4, 5, t0 + Duration::from_secs(3)), SeqVerdict::Restart);
        assert_eq!(d.max_seq(7, 4), Some(5));
    }

    #[test]
    fn vehicles_tracked_independently() {
        let mut d = detector();
        let now = Instant::now();
        d.check(1, 4, 1000, now);
        assert_eq!(d.check(2, 4, 3, now), SeqVerdict::Accept);
        d.reset_vehicle(1);
        assert_eq!(d.tracked_vehicles(), 1);
    }

    // ─── Stream Ids ─────────────────────────────────────────────────────

    #[test]
    fn out_of_range_stream_shares_slot_zero() {
        let mut d = detector();
        let now = Instant::now();
        assert_eq!(d.check(7, 0, 100, now), SeqVerdict::Accept);
        assert_eq!(d.check(7, 9, 100, now), SeqVerdict::Duplicate);
        assert_eq!(d.max_seq(7, 12), Some(100));
        assert_eq!(d.max_seq(7, 1), None);
    }

    // ─── Sequence Wrap ──────────────────────────────────────────────────

    #[test]
    fn wrap_past_field_width_is_forward_progress() {
        let mut d = detector();
        let now = Instant::now();
        d.check(7, 4, STREAM_SEQUENCE_MASK - 2, now);
        d.check(7, 1, 300, now);
        assert_eq!(d.check(7, 4, STREAM_SEQUENCE_MASK, now), SeqVerdict::Accept);
        assert_eq!(d.check(7, 4, 1, now), SeqVerdict::Accept);
        assert_eq!(d.max_seq(7, 4), Some(1));
        // No restart: the other stream keeps its state.
        assert_eq!(d.max_seq(7, 1), Some(300));
        assert_eq!(d.check(7, 4, 2, now), SeqVerdict::Accept);
    }

    #[test]
    fn late_packet_from_before_wrap_is_judged_behind() {
        let mut d = detector();
        let now = Instant::now();
        d.check(7, 4, STREAM_SEQUENCE_MASK - 1, now);
        d.check(7, 4, 3, now);
        // Four behind the max across the wrap, never seen before.
        assert_eq!(d.check(7, 4, STREAM_SEQUENCE_MASK, now), SeqVerdict::Accept);
        assert_eq!(d.check(7, 4, STREAM_SEQUENCE_MASK - 1, now), SeqVerdict::Duplicate);
        assert_eq!(d.check(7, 4, STREAM_SEQUENCE_MASK - 200, now), SeqVerdict::Stale);
        assert_eq!(d.max_seq(7, 4), Some(3));
    }

    // ─── Vehicle Cap ────────────────────────────────────────────────────

    #[test]
    fn tracked_vehicles_capped_by_evicting_longest_idle() {
        let mut d = detector();
        let t0 = Instant::now();
        for vehicle in 0..MAX_TRACKED_VEHICLES as u32 {
            d.check(vehicle, 0, 10, t0 + Duration::from_millis(vehicle as u64));
        }
        // Vehicle 0 is heard again, so vehicle 1 is now the idlest.
        d.check(0, 0, 11, t0 + Duration::from_secs(1));
        d.check(100, 0, 10, t0 + Duration::from_secs(2));

        assert_eq!(d.tracked_vehicles(), MAX_TRACKED_VEHICLES);
        assert_eq!(d.evicted(), 1);
        assert_eq!(d.max_seq(1, 0), None);
        assert_eq!(d.max_seq(0, 0), Some(11));
        assert_eq!(d.max_seq(100, 0), Some(10));
    }

    #[test]
    fn many_senders_never_exceed_cap() {
        let mut d = DuplicateDetector::new(DedupConfig {
            max_vehicles: 3,
            ..Default::default()
        });
        let t0 = Instant::now();
        for vehicle in 0..50u32 {
            d.check(vehicle, 2, 1, t0 + Duration::from_millis(vehicle as u64));
            assert!(d.tracked_vehicles() <= 3);
        }
        assert_eq!(d.evicted(), 47);
    }
}
