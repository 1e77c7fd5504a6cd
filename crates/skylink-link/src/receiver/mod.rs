//! # Receive Pipeline (RX)
//!
//! Turns raw radio buffers into routed packets:
//!
//! 1. split the chained buffer and validate each packet's CRC
//!    (with one explicit reconstruction attempt for a late-stamped source id);
//! 2. filter by pairing and relay role, pairing with the first sender heard
//!    when no pairing exists yet;
//! 3. deduplicate per `(vehicle, stream)` and detect vehicle restarts;
//! 4. dispatch by module tag.
//!
//! The pipeline never panics on input and never dispatches a packet whose CRC
//! failed. Every drop is counted on the arrival interface.

pub mod dedup;

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;
use serde::Serialize;
use skylink_wire::stats::{InterfaceRxStats, QualityTally, StreamCounters};
use skylink_wire::wire::{
    packet_type, reconstruct_packet, stream_slot, ChainIter, CommandResponseHeader, Module, Packet,
    PacketHeader, ReconstructKind, MAX_RADIO_STREAMS,
};

use self::dedup::{DedupConfig, DuplicateDetector, SeqVerdict};
use crate::relay::{RelayMode, RelayParams};

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub dedup: DedupConfig,
    /// Deliver RC packets (otherwise they are dropped).
    pub rc_enabled: bool,
    /// Attempt the zero-source-id reconstruction on CRC failure.
    pub reconstruct_source_id: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            dedup: DedupConfig::default(),
            rc_enabled: true,
            reconstruct_source_id: true,
        }
    }
}

/// Which local consumer a packet is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Consumer {
    /// Pairing, pings, radio config sync, alarms, log segments.
    Protocol,
    Commands,
    Telemetry,
    Rc,
    Video,
    Audio,
    LocalControl,
}

/// Why a packet was dropped (not an error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    CrcFailure,
    Duplicate,
    Stale,
    ForeignVehicle,
    RcDisabled,
    VideoNotViewed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RxEvent {
    Dispatch {
        consumer: Consumer,
        interface: usize,
        link: Option<usize>,
        packet: Packet,
    },
    /// The vehicle restarted; its video and telemetry pipelines must reset.
    VehicleRestarted { vehicle_id: u32 },
    /// Whole buffer from the relayed vehicle on the relay link.
    RelayFromVehicle {
        interface: usize,
        link: usize,
        buffer: Bytes,
    },
    /// Response to the last issued command arrived.
    CommandRtt { counter: u32, rtt: Duration },
    /// No pairing existed and this vehicle is now the paired peer.
    FirstPairingDone { vehicle_id: u32 },
    /// A CRC failure was repaired; the packet was dispatched with a zero
    /// source id.
    PacketReconstructed { interface: usize },
    Dropped {
        interface: usize,
        vehicle_id: u32,
        reason: DropReason,
    },
}

/// Who we are and who we talk to.
#[derive(Debug, Clone, Default)]
pub struct PairingState {
    pub local_vehicle_id: u32,
    /// The peer this node is paired with (vehicle on a controller, controller
    /// on a vehicle).
    pub paired_vehicle_id: Option<u32>,
    pub first_pairing_done: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReceiverStats {
    pub interfaces: Vec<InterfaceRxStats>,
    pub streams: [StreamCounters; MAX_RADIO_STREAMS],
    pub restarts: u64,
    pub relay_buffers: u64,
    pub last_command_rtt_ms: Option<u64>,
}

pub struct ReceivePipeline {
    config: ReceiverConfig,
    pairing: PairingState,
    relay: RelayParams,
    dedup: DuplicateDetector,
    stats: ReceiverStats,
    quality: Vec<QualityTally>,
    /// Last packet time per source vehicle, capped like the dedup state.
    last_rx_from: HashMap<u32, Instant>,
    last_command: Option<(u32, Instant)>,
    last_command_response: Option<Instant>,
}

impl ReceivePipeline {
    pub fn new(config: ReceiverConfig, pairing: PairingState, interfaces: usize) -> Self {
        let dedup = DuplicateDetector::new(config.dedup.clone());
        ReceivePipeline {
            config,
            pairing,
            relay: RelayParams::default(),
            dedup,
            stats: ReceiverStats {
                interfaces: vec![InterfaceRxStats::new(); interfaces],
                ..Default::default()
            },
            quality: vec![QualityTally::default(); interfaces],
            last_rx_from: HashMap::new(),
            last_command: None,
            last_command_response: None,
        }
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    pub fn pairing(&self) -> &PairingState {
        &self.pairing
    }

    pub fn set_paired(&mut self, vehicle_id: u32) {
        self.pairing.paired_vehicle_id = Some(vehicle_id);
        self.pairing.first_pairing_done = true;
    }

    /// Install new relay parameters. Tracking for a vehicle that is no longer
    /// the relay target is dropped.
    pub fn set_relay(&mut self, relay: RelayParams) {
        if self.relay.relayed_vehicle_id != 0
            && self.relay.relayed_vehicle_id != relay.relayed_vehicle_id
        {
            self.dedup.reset_vehicle(self.relay.relayed_vehicle_id);
        }
        self.relay = relay;
    }

    pub fn max_seq(&self, vehicle: u32, stream: u8) -> Option<u32> {
        self.dedup.max_seq(vehicle, stream)
    }

    /// Time of the last packet from a vehicle.
    pub fn last_rx_from(&self, vehicle: u32) -> Option<Instant> {
        self.last_rx_from.get(&vehicle).copied()
    }

    pub fn tracked_senders(&self) -> usize {
        self.last_rx_from.len()
    }

    fn note_rx_from(&mut self, vehicle: u32, now: Instant) {
        if !self.last_rx_from.contains_key(&vehicle)
            && self.last_rx_from.len() >= self.config.dedup.max_vehicles.max(1)
        {
            let idlest = self.last_rx_from.iter().min_by_key(|(_, t)| **t).map(|(id, _)| *id);
            if let Some(id) = idlest {
                self.last_rx_from.remove(&id);
            }
        }
        self.last_rx_from.insert(vehicle, now);
    }

    /// Remember the command just issued, for RTT matching.
    pub fn note_command_sent(&mut self, counter: u32, now: Instant) {
        self.last_command = Some((counter, now));
    }

    pub fn last_command_response(&self) -> Option<Instant> {
        self.last_command_response
    }

    /// Reception quality per interface since the previous call.
    pub fn take_quality(&mut self) -> Vec<Option<u8>> {
        self.quality.iter_mut().map(|q| q.take()).collect()
    }

    fn iface_stats(&mut self, interface: usize) -> &mut InterfaceRxStats {
        if interface >= self.stats.interfaces.len() {
            self.stats.interfaces.resize(interface + 1, InterfaceRxStats::new());
            self.quality.resize(interface + 1, QualityTally::default());
        }
        &mut self.stats.interfaces[interface]
    }

    fn record_quality(&mut self, interface: usize, good: bool) {
        self.iface_stats(interface);
        if good {
            self.quality[interface].record_good();
        } else {
            self.quality[interface].record_bad();
        }
    }

    /// Process one buffer read from `interface` (member of `link`).
    pub fn process_buffer(
        &mut self,
        interface: usize,
        link: Option<usize>,
        buffer: Bytes,
        now: Instant,
    ) -> Vec<RxEvent> {
        let mut events = Vec::new();
        self.iface_stats(interface).buffers += 1;

        if let Some(link) = link {
            if self.is_relay_buffer(&buffer, link) {
                self.stats.relay_buffers += 1;
                events.push(RxEvent::RelayFromVehicle {
                    interface,
                    link,
                    buffer,
                });
                return events;
            }
        }

        for item in ChainIter::new(buffer) {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    self.iface_stats(interface).malformed += 1;
                    self.record_quality(interface, false);
                    tracing::warn!(interface, error = %e, "malformed radio buffer");
                    break;
                }
            };
            let stats = self.iface_stats(interface);
            stats.packets += 1;
            stats.bytes += item.packet.raw.len() as u64;

            if item.crc_ok {
                self.record_quality(interface, true);
                self.process_packet(interface, link, item.packet, false, now, &mut events);
                continue;
            }
            let repaired = self
                .config
                .reconstruct_source_id
                .then(|| reconstruct_packet(&item.packet, ReconstructKind::ZeroSourceId))
                .flatten();
            let Some(packet) = repaired else {
                self.iface_stats(interface).crc_errors += 1;
                self.record_quality(interface, false);
                events.push(RxEvent::Dropped {
                    interface,
                    vehicle_id: item.packet.header.vehicle_id_src,
                    reason: DropReason::CrcFailure,
                });
                continue;
            };
            self.iface_stats(interface).reconstructed += 1;
            self.record_quality(interface, true);
            tracing::debug!(
                interface,
                received_src = item.packet.header.vehicle_id_src,
                "packet reconstructed with zero source id"
            );
            events.push(RxEvent::PacketReconstructed { interface });
            self.process_packet(interface, link, packet, true, now, &mut events);
        }
        events
    }

    /// A buffer is relay traffic when this node relays, it arrived on the
    /// relay link, and it comes from the relayed vehicle.
    fn is_relay_buffer(&self, buffer: &Bytes, link: usize) -> bool {
        if !self.relay.mode.contains(RelayMode::IS_RELAY_NODE) || self.relay.relay_link != Some(link) {
            return false;
        }
        let Ok(header) = PacketHeader::decode(&mut buffer.clone()) else {
            return false;
        };
        header.vehicle_id_src == self.relay.relayed_vehicle_id
    }

    fn process_packet(
        &mut self,
        interface: usize,
        link: Option<usize>,
        packet: Packet,
        reconstructed: bool,
        now: Instant,
        events: &mut Vec<RxEvent>,
    ) {
        let header = &packet.header;
        let src = header.vehicle_id_src;
        let ptype = header.packet_type;

        let from_relayed = self.relay.mode != RelayMode::NONE && src == self.relay.relayed_vehicle_id;
        // A repaired packet's source id is zero by construction.
        let foreign = self.pairing.first_pairing_done
            && !reconstructed
            && header.module != Module::LocalControl
            && self.pairing.paired_vehicle_id != Some(src)
            && !from_relayed;
        if foreign && !packet_type::is_identity_telemetry(ptype) {
            self.iface_stats(interface).foreign += 1;
            events.push(RxEvent::Dropped {
                interface,
                vehicle_id: src,
                reason: DropReason::ForeignVehicle,
            });
            return;
        }

        if !packet_type::is_ping(ptype) {
            match self.dedup.check(src, header.stream_id, header.sequence, now) {
                SeqVerdict::Accept => {}
                SeqVerdict::Restart => {
                    self.stats.restarts += 1;
                    tracing::info!(
                        vehicle_id = src,
                        stream = header.stream_id,
                        seq = header.sequence,
                        "vehicle restart detected"
                    );
                    events.push(RxEvent::VehicleRestarted { vehicle_id: src });
                }
                SeqVerdict::Duplicate => {
                    self.iface_stats(interface).duplicates += 1;
                    events.push(RxEvent::Dropped {
                        interface,
                        vehicle_id: src,
                        reason: DropReason::Duplicate,
                    });
                    return;
                }
                SeqVerdict::Stale => {
                    self.iface_stats(interface).stale += 1;
                    tracing::debug!(vehicle_id = src, seq = header.sequence, "stale packet");
                    events.push(RxEvent::Dropped {
                        interface,
                        vehicle_id: src,
                        reason: DropReason::Stale,
                    });
                    return;
                }
            }
        }

        if !self.pairing.first_pairing_done
            && !reconstructed
            && !from_relayed
            && header.module != Module::LocalControl
            && src != 0
            && src != self.pairing.local_vehicle_id
        {
            self.set_paired(src);
            tracing::info!(interface, vehicle_id = src, "first pairing done");
            events.push(RxEvent::FirstPairingDone { vehicle_id: src });
        }

        self.note_rx_from(src, now);
        self.stats.streams[stream_slot(header.stream_id)].record(packet.raw.len());

        let consumer = match header.module {
            Module::LocalControl => Consumer::LocalControl,
            Module::Ruby => Consumer::Protocol,
            Module::Telemetry => Consumer::Telemetry,
            Module::Audio => Consumer::Audio,
            Module::Commands => {
                if ptype == packet_type::COMMAND_RESPONSE {
                    self.match_command_response(&packet, now, events);
                }
                Consumer::Commands
            }
            Module::Rc => {
                if !self.config.rc_enabled {
                    events.push(RxEvent::Dropped {
                        interface,
                        vehicle_id: src,
                        reason: DropReason::RcDisabled,
                    });
                    return;
                }
                Consumer::Rc
            }
            Module::Video => {
                if !self.video_viewed(src) {
                    events.push(RxEvent::Dropped {
                        interface,
                        vehicle_id: src,
                        reason: DropReason::VideoNotViewed,
                    });
                    return;
                }
                Consumer::Video
            }
        };

        tracing::trace!(interface, vehicle_id = src, ptype, ?consumer, "dispatch");
        events.push(RxEvent::Dispatch {
            consumer,
            interface,
            link,
            packet,
        });
    }

    /// While viewing the relayed vehicle, only its video is shown; otherwise
    /// only video from anything but the relayed vehicle.
    fn video_viewed(&self, src: u32) -> bool {
        if self.relay.mode == RelayMode::NONE || self.relay.relayed_vehicle_id == 0 {
            return true;
        }
        if self.relay.mode.contains(RelayMode::REMOTE) {
            src == self.relay.relayed_vehicle_id
        } else {
            src != self.relay.relayed_vehicle_id
        }
    }

    fn match_command_response(&mut self, packet: &Packet, now: Instant, events: &mut Vec<RxEvent>) {
        let mut body = packet.payload();
        let Some(resp) = CommandResponseHeader::decode(&mut body) else {
            return;
        };
        let Some((counter, sent_at)) = self.last_command else {
            return;
        };
        if resp.origin_command_counter != counter {
            return;
        }
        let rtt = now.saturating_duration_since(sent_at);
        self.last_command_response = Some(now);
        self.stats.last_command_rtt_ms = Some(rtt.as_millis() as u64);
        events.push(RxEvent::CommandRtt { counter, rtt });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayFlags;
    use bytes::BytesMut;
    use skylink_wire::wire::{build, STREAM_ID_TELEMETRY, STREAM_ID_VIDEO_1};

    use super::dedup::MAX_TRACKED_VEHICLES;

    const VEHICLE: u32 = 0x1111;
    const CONTROLLER: u32 = 0x2222;
    const RELAYED: u32 = 0x3333;

    fn pipeline() -> ReceivePipeline {
        ReceivePipeline::new(
            ReceiverConfig::default(),
            PairingState {
                local_vehicle_id: CONTROLLER,
                paired_vehicle_id: Some(VEHICLE),
                first_pairing_done: true,
            },
            2,
        )
    }

    fn video(src: u32, seq: u32) -> BytesMut {
        let h = PacketHeader::new(Module::Video, packet_type::VIDEO_DATA, src, CONTROLLER)
            .with_stream(STREAM_ID_VIDEO_1)
            .with_sequence(seq);
        build(&h, b"video", None).unwrap()
    }

    fn dispatched(events: &[RxEvent]) -> Vec<(Consumer, u32)> {
        events
            .iter()
            .filter_map(|e| match e {
                RxEvent::Dispatch { consumer, packet, .. } => Some((*consumer, packet.sequence())),
                _ => None,
            })
            .collect()
    }

    // ─── Validation ─────────────────────────────────────────────────────

    #[test]
    fn crc_failure_never_dispatched() {
        let mut rx = pipeline();
        let mut pkt = video(VEHICLE, 1);
        let last = pkt.len() - 1;
        pkt[last] ^= 0x01;
        let events = rx.process_buffer(0, Some(0), pkt.freeze(), Instant::now());
        assert!(dispatched(&events).is_empty());
        assert_eq!(rx.stats().interfaces[0].crc_errors, 1);
    }

    #[test]
    fn crc_failure_skips_to_next_chained_packet() {
        let mut rx = pipeline();
        let mut buf = BytesMut::new();
        let mut bad = video(VEHICLE, 1);
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        buf.extend_from_slice(&bad);
        buf.extend_from_slice(&video(VEHICLE, 2));
        let events = rx.process_buffer(0, Some(0), buf.freeze(), Instant::now());
        assert_eq!(dispatched(&events), vec![(Consumer::Video, 2)]);
    }

    #[test]
    fn source_id_reconstruction_accepts_packet() {
        let mut rx = pipeline();
        let h = PacketHeader::new(Module::Telemetry, packet_type::FC_TELEMETRY, 0, CONTROLLER)
            .with_stream(STREAM_ID_TELEMETRY);
        let mut pkt = build(&h, b"fc", None).unwrap();
        pkt[16..20].copy_from_slice(&VEHICLE.to_le_bytes());
        let events = rx.process_buffer(1, Some(1), pkt.freeze(), Instant::now());
        assert_eq!(dispatched(&events), vec![(Consumer::Telemetry, 0)]);
        assert_eq!(rx.stats().interfaces[1].reconstructed, 1);
    }

    #[test]
    fn reconstructed_packet_dispatched_with_zero_source_id() {
        let mut rx = pipeline();
        let h = PacketHeader::new(Module::Video, packet_type::VIDEO_DATA, 0, CONTROLLER)
            .with_stream(STREAM_ID_VIDEO_1)
            .with_sequence(12);
        let mut pkt = build(&h, b"video", None).unwrap();
        pkt[16..20].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        let events = rx.process_buffer(0, Some(0), pkt.freeze(), Instant::now());

        assert!(events.contains(&RxEvent::PacketReconstructed { interface: 0 }));
        let packet = events
            .iter()
            .find_map(|e| match e {
                RxEvent::Dispatch { packet, .. } => Some(packet),
                _ => None,
            })
            .unwrap();
        assert_eq!(packet.header.vehicle_id_src, 0);
        assert_eq!(&packet.raw[16..20], &[0, 0, 0, 0]);
        assert_eq!(rx.max_seq(0, STREAM_ID_VIDEO_1), Some(12));
        assert_eq!(rx.max_seq(0xDEAD_BEEF, STREAM_ID_VIDEO_1), None);
        assert!(rx.last_rx_from(0xDEAD_BEEF).is_none());
    }

    #[test]
    fn reconstruction_disabled_drops_packet() {
        let mut rx = ReceivePipeline::new(
            ReceiverConfig {
                reconstruct_source_id: false,
                ..Default::default()
            },
            PairingState::default(),
            1,
        );
        let mut pkt = video(0, 1);
        pkt[16..20].copy_from_slice(&VEHICLE.to_le_bytes());
        let events = rx.process_buffer(0, Some(0), pkt.freeze(), Instant::now());
        assert!(dispatched(&events).is_empty());
        assert_eq!(rx.stats().interfaces[0].crc_errors, 1);
    }

    #[test]
    fn malformed_buffer_counted() {
        let mut rx = pipeline();
        let events = rx.process_buffer(0, Some(0), Bytes::from_static(&[1, 2, 3]), Instant::now());
        assert!(events.is_empty());
        assert_eq!(rx.stats().interfaces[0].malformed, 1);
    }

    // ─── Sequencing ─────────────────────────────────────────────────────

    #[test]
    fn duplicates_dropped() {
        let mut rx = pipeline();
        let now = Instant::now();
        rx.process_buffer(0, Some(0), video(VEHICLE, 10).freeze(), now);
        let events = rx.process_buffer(1, Some(1), video(VEHICLE, 10).freeze(), now);
        assert!(dispatched(&events).is_empty());
        assert_eq!(rx.stats().interfaces[1].duplicates, 1);
    }

    #[test]
    fn pings_bypass_dedup() {
        let mut rx = pipeline();
        let now = Instant::now();
        let h = PacketHeader::new(Module::Ruby, packet_type::PING_CLOCK, VEHICLE, CONTROLLER);
        let ping = build(&h, &[1, 0, 0, 0, 0, 0], None).unwrap().freeze();
        for _ in 0..3 {
            let events = rx.process_buffer(0, Some(0), ping.clone(), now);
            assert_eq!(dispatched(&events).len(), 1);
        }
        assert_eq!(rx.max_seq(VEHICLE, 0), None);
    }

    // ─── Filtering ──────────────────────────────────────────────────────

    #[test]
    fn foreign_vehicle_dropped_except_telemetry() {
        let mut rx = pipeline();
        let now = Instant::now();
        let events = rx.process_buffer(0, Some(0), video(0x9999, 1).freeze(), now);
        assert!(dispatched(&events).is_empty());
        assert_eq!(rx.stats().interfaces[0].foreign, 1);

        let h = PacketHeader::new(Module::Telemetry, packet_type::RUBY_TELEMETRY_SHORT, 0x9999, CONTROLLER)
            .with_stream(STREAM_ID_TELEMETRY);
        let events = rx.process_buffer(0, Some(0), build(&h, b"t", None).unwrap().freeze(), now);
        assert_eq!(dispatched(&events), vec![(Consumer::Telemetry, 0)]);
    }

    #[test]
    fn before_pairing_everything_accepted() {
        let mut rx = ReceivePipeline::new(ReceiverConfig::default(), PairingState::default(), 1);
        let events = rx.process_buffer(0, Some(0), video(0x9999, 1).freeze(), Instant::now());
        assert_eq!(dispatched(&events).len(), 1);
    }

    #[test]
    fn first_sender_becomes_paired_peer() {
        let mut rx = ReceivePipeline::new(
            ReceiverConfig::default(),
            PairingState {
                local_vehicle_id: CONTROLLER,
                ..Default::default()
            },
            1,
        );
        let now = Instant::now();

        // Our own id never pairs.
        rx.process_buffer(0, Some(0), video(CONTROLLER, 1).freeze(), now);
        assert!(!rx.pairing().first_pairing_done);

        let events = rx.process_buffer(0, Some(0), video(0x9999, 1).freeze(), now);
        assert_eq!(dispatched(&events), vec![(Consumer::Video, 1)]);
        assert!(events.contains(&RxEvent::FirstPairingDone { vehicle_id: 0x9999 }));
        assert_eq!(rx.pairing().paired_vehicle_id, Some(0x9999));
        assert!(rx.pairing().first_pairing_done);

        let events = rx.process_buffer(0, Some(0), video(VEHICLE, 1).freeze(), now);
        assert!(dispatched(&events).is_empty());
        assert_eq!(rx.stats().interfaces[0].foreign, 1);

        let events = rx.process_buffer(0, Some(0), video(0x9999, 2).freeze(), now);
        assert_eq!(dispatched(&events), vec![(Consumer::Video, 2)]);
        assert!(!events.iter().any(|e| matches!(e, RxEvent::FirstPairingDone { .. })));
    }

    #[test]
    fn sender_tracking_bounded() {
        let mut rx = pipeline();
        let t0 = Instant::now();
        for (i, src) in (0x5000..0x5000 + MAX_TRACKED_VEHICLES as u32 + 4).enumerate() {
            let h = PacketHeader::new(Module::Telemetry, packet_type::RUBY_TELEMETRY_SHORT, src, CONTROLLER)
                .with_stream(STREAM_ID_TELEMETRY)
                .with_sequence(1);
            let pkt = build(&h, b"t", None).unwrap().freeze();
            rx.process_buffer(0, Some(0), pkt, t0 + Duration::from_millis(i as u64));
            assert!(rx.tracked_senders() <= MAX_TRACKED_VEHICLES);
        }
        assert_eq!(rx.tracked_senders(), MAX_TRACKED_VEHICLES);
        assert!(rx.last_rx_from(0x5000).is_none());
        assert_eq!(rx.max_seq(0x5000, STREAM_ID_TELEMETRY), None);
    }

    #[test]
    fn out_of_range_stream_counted_on_stream_zero() {
        let mut rx = pipeline();
        let h = PacketHeader::new(Module::Video, packet_type::VIDEO_DATA, VEHICLE, CONTROLLER)
            .with_stream(11)
            .with_sequence(4);
        rx.process_buffer(0, Some(0), build(&h, b"v", None).unwrap().freeze(), Instant::now());
        assert_eq!(rx.stats().streams[0].packets, 1);
        assert_eq!(rx.max_seq(VEHICLE, 0), Some(4));
    }

    #[test]
    fn rc_disabled_drops_rc() {
        let mut rx = ReceivePipeline::new(
            ReceiverConfig {
                rc_enabled: false,
                ..Default::default()
            },
            PairingState::default(),
            1,
        );
        let h = PacketHeader::new(Module::Rc, packet_type::RC_FULL_FRAME, VEHICLE, CONTROLLER);
        let events = rx.process_buffer(0, Some(0), build(&h, b"rc", None).unwrap().freeze(), Instant::now());
        assert!(events.iter().any(|e| matches!(
            e,
            RxEvent::Dropped {
                reason: DropReason::RcDisabled,
                ..
            }
        )));
    }

    #[test]
    fn relay_node_hands_off_relayed_buffers() {
        let mut rx = ReceivePipeline::new(
            ReceiverConfig::default(),
            PairingState {
                local_vehicle_id: VEHICLE,
                paired_vehicle_id: Some(CONTROLLER),
                first_pairing_done: true,
            },
            2,
        );
        rx.set_relay(RelayParams {
            relayed_vehicle_id: RELAYED,
            relay_link: Some(1),
            frequency_khz: 2_412_000,
            flags: RelayFlags::VIDEO,
            mode: RelayMode::IS_RELAY_NODE,
        });
        let events = rx.process_buffer(1, Some(1), video(RELAYED, 5).freeze(), Instant::now());
        assert!(matches!(events[0], RxEvent::RelayFromVehicle { link: 1, .. }));

        // Off the relay link the buffer is not forwarded and its video is not shown.
        let events = rx.process_buffer(0, Some(0), video(RELAYED, 6).freeze(), Instant::now());
        assert!(dispatched(&events).is_empty());
    }

    #[test]
    fn controller_views_relayed_video_in_remote_mode() {
        let mut rx = pipeline();
        rx.set_relay(RelayParams {
            relayed_vehicle_id: RELAYED,
            relay_link: Some(1),
            frequency_khz: 2_412_000,
            flags: RelayFlags::VIDEO,
            mode: RelayMode::REMOTE,
        });
        let now = Instant::now();
        let events = rx.process_buffer(0, Some(0), video(RELAYED, 1).freeze(), now);
        assert_eq!(dispatched(&events), vec![(Consumer::Video, 1)]);
        let events = rx.process_buffer(0, Some(0), video(VEHICLE, 1).freeze(), now);
        assert!(dispatched(&events).is_empty());
    }

    #[test]
    fn relay_target_change_resets_tracking() {
        let mut rx = pipeline();
        let relay = RelayParams {
            relayed_vehicle_id: RELAYED,
            relay_link: Some(1),
            frequency_khz: 2_412_000,
            flags: RelayFlags::VIDEO,
            mode: RelayMode::MAIN,
        };
        rx.set_relay(relay.clone());
        rx.process_buffer(0, Some(0), video(RELAYED, 40).freeze(), Instant::now());
        assert_eq!(rx.max_seq(RELAYED, STREAM_ID_VIDEO_1), Some(40));
        rx.set_relay(RelayParams {
            relayed_vehicle_id: 0x4444,
            ..relay
        });
        assert_eq!(rx.max_seq(RELAYED, STREAM_ID_VIDEO_1), None);
    }

    // ─── Commands ───────────────────────────────────────────────────────

    #[test]
    fn command_response_updates_rtt() {
        let mut rx = pipeline();
        let t0 = Instant::now();
        rx.note_command_sent(77, t0);
        let mut body = BytesMut::new();
        CommandResponseHeader {
            origin_command_type: 3,
            origin_command_counter: 77,
        }
        .encode(&mut body);
        let h = PacketHeader::new(Module::Commands, packet_type::COMMAND_RESPONSE, VEHICLE, CONTROLLER);
        let pkt = build(&h, &body, None).unwrap().freeze();
        let events = rx.process_buffer(0, Some(0), pkt, t0 + Duration::from_millis(35));
        assert!(events.contains(&RxEvent::CommandRtt {
            counter: 77,
            rtt: Duration::from_millis(35)
        }));
        assert_eq!(rx.stats().last_command_rtt_ms, Some(35));
    }

    // ─── Quality ────────────────────────────────────────────────────────

    #[test]
    fn quality_reflects_crc_failures() {
        let mut rx = pipeline();
        let now = Instant::now();
        for seq in 0..3 {
            rx.process_buffer(0, Some(0), video(VEHICLE, seq).freeze(), now);
        }
        let mut bad = video(VEHICLE, 3);
        bad[26] ^= 0xFF;
        rx.process_buffer(0, Some(0), bad.freeze(), now);
        assert_eq!(rx.take_quality(), vec![Some(75), None]);
    }
}
