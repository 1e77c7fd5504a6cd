//! # Alarms
//!
//! Aggregate link problems are surfaced as Ruby `ALARM` packets. Each alarm
//! class is rate-limited (one packet per second, repaired packets once per
//! ten seconds); occurrences in between are folded into the next packet's
//! repeat count.

use std::collections::HashMap;
use std::time::Duration;

use bytes::BytesMut;
use quanta::Instant;
use skylink_wire::stats::RateCounter;
use skylink_wire::wire::{build, packet_type, AlarmBody, Module, PacketHeader, BROADCAST_VEHICLE_ID};
use skylink_wire::FrameError;

const ALARM_INTERVAL: Duration = Duration::from_secs(1);
const RECONSTRUCTED_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmClass {
    /// Parse or CRC errors above the rate threshold.
    RxErrors,
    /// Frames dropped because no interface could carry them.
    NoEligibleInterface,
    /// Video TX is over its airtime budget.
    TxOverload,
    /// Sustained poor reception.
    LinkQuality,
    RadioReinitFailed,
    /// A packet failed its CRC and was repaired by zeroing its source id.
    PacketReconstructed,
}

impl AlarmClass {
    pub fn id(&self) -> u32 {
        match self {
            AlarmClass::RxErrors => 1 << 0,
            AlarmClass::NoEligibleInterface => 1 << 1,
            AlarmClass::TxOverload => 1 << 2,
            AlarmClass::LinkQuality => 1 << 3,
            AlarmClass::RadioReinitFailed => 1 << 4,
            AlarmClass::PacketReconstructed => 1 << 5,
        }
    }

    /// Shortest gap between two packets of this class.
    pub fn interval(&self) -> Duration {
        match self {
            AlarmClass::PacketReconstructed => RECONSTRUCTED_INTERVAL,
            _ => ALARM_INTERVAL,
        }
    }
}

#[derive(Default)]
struct ClassState {
    last_sent: Option<Instant>,
    suppressed: u32,
}

#[derive(Default)]
pub struct AlarmLimiter {
    classes: HashMap<AlarmClass, ClassState>,
    raised: u64,
    suppressed: u64,
}

impl AlarmLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the alarm body to send, or `None` while the class is inside
    /// its [`AlarmClass::interval`].
    pub fn raise(&mut self, class: AlarmClass, flags1: u32, flags2: u32, now: Instant) -> Option<AlarmBody> {
        let state = self.classes.entry(class).or_default();
        if state
            .last_sent
            .is_some_and(|t| now.saturating_duration_since(t) < class.interval())
        {
            state.suppressed += 1;
            self.suppressed += 1;
            return None;
        }
        let repeat_count = state.suppressed + 1;
        state.suppressed = 0;
        state.last_sent = Some(now);
        self.raised += 1;
        tracing::warn!(?class, flags1, flags2, repeat_count, "alarm raised");
        Some(AlarmBody {
            alarm_id: class.id(),
            flags1,
            flags2,
            repeat_count,
        })
    }

    pub fn raised(&self) -> u64 {
        self.raised
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

/// Counts events over a one-second window and reports when they exceed a
/// threshold.
pub struct ErrorRateMonitor {
    counter: RateCounter,
    threshold_per_sec: u64,
}

impl ErrorRateMonitor {
    pub fn new(threshold_per_sec: u64) -> Self {
        ErrorRateMonitor {
            counter: RateCounter::new(Duration::from_secs(1)),
            threshold_per_sec,
        }
    }

    pub fn record(&mut self, count: u64, now: Instant) {
        if count > 0 {
            self.counter.record(now, count);
        }
    }

    /// Events in the last second, if above the threshold.
    pub fn exceeded(&self, now: Instant) -> Option<u64> {
        let n = self.counter.count_in_window(now);
        (n > self.threshold_per_sec).then_some(n)
    }
}

/// Ruby `ALARM` packet from this vehicle.
pub fn alarm_packet(vehicle_id: u32, body: &AlarmBody) -> Result<BytesMut, FrameError> {
    let header = PacketHeader::new(Module::Ruby, packet_type::ALARM, vehicle_id, BROADCAST_VEHICLE_ID);
    let mut payload = BytesMut::with_capacity(AlarmBody::ENCODED_LEN);
    body.encode(&mut payload);
    build(&header, &payload, None)
}
