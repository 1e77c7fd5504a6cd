//! # Router
//!
//! Single-owner state of one node's data link. Everything here runs on the
//! router thread: outbound packets are sequenced, chained and written to the
//! selected radios; inbound buffers go through serial reassembly, relay
//! checks and the receive pipeline; the adaptive controllers are ticked on a
//! fixed cadence. No locks are taken; the runtime hands results to other
//! threads through channels and snapshots.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::{Bytes, BytesMut};
use quanta::Instant;
use rand::rngs::StdRng;
use rand::{RngExt as _, SeedableRng};
use serde::Serialize;
use skylink_wire::ipc::{LocalControl, ModelChange};
use skylink_wire::short::{split_into_short_packets, SerialScanner, ShortPacketAccumulator};
use skylink_wire::stats::RateCounter;
use skylink_wire::stream::StreamMultiplexer;
use skylink_wire::wire::{packet_type, Module, Packet, PacketHeader, MAX_PACKET_PAYLOAD};

use crate::adaptive::{
    AdaptiveController, KeyframeController, KeyframeInput, LinkCommand, OverwriteState, PeerReport,
    QuantizationController, QuantizationInput, VideoProfile,
};
use crate::alarms::{alarm_packet, AlarmClass, AlarmLimiter, ErrorRateMonitor};
use crate::config::{RouterConfig, RuntimeConfig};
use crate::error::{RelayConfigError, SelectError};
use crate::radio::{DataRate, RadioPort, RadioTopology};
use crate::receiver::{Consumer, DropReason, ReceivePipeline, ReceiverStats, RxEvent};
use crate::relay::{RelayFlags, RelayForwarder, RelayMode, RelayOutcome, RelayParams, RelayStats};
use crate::selector::{FrameSummary, LinkSelector, SelectorStats, TxTarget};

/// Reads drained from one port per poll.
const MAX_READS_PER_POLL: usize = 64;
const READ_BUFFER_LEN: usize = 4096;

/// Something the router produced for a local consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Packet {
        consumer: Consumer,
        vehicle_id: u32,
        packet: Packet,
    },
    VehicleRestarted {
        vehicle_id: u32,
    },
    CommandRtt {
        counter: u32,
        rtt: Duration,
    },
    /// Local-control message for the other node processes.
    Local(LocalControl),
    /// Encoder / overwrite update from the adaptive layer.
    Link(LinkCommand),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RouterStats {
    pub rx: ReceiverStats,
    pub tx: SelectorStats,
    pub relay: RelayStats,
    pub adaptive: Option<OverwriteState>,
    pub frames_sent: u64,
    pub tx_errors: u64,
    pub video_dropped_paused: u64,
    pub alarms_raised: u64,
    pub alarms_suppressed: u64,
    pub radio_reinits: u64,
    pub radio_reinit_failures: u64,
    pub serial_resets: u64,
    pub video_paused: bool,
}

#[derive(Default)]
struct SerialRx {
    scanner: SerialScanner,
    accumulator: ShortPacketAccumulator,
}

type Sleeper = Box<dyn FnMut(Duration) + Send>;

pub struct RouterState {
    vehicle_id: u32,
    topology: RadioTopology,
    ports: Vec<Box<dyn RadioPort>>,
    runtime: RuntimeConfig,

    mux: StreamMultiplexer,
    selector: LinkSelector,
    pipeline: ReceivePipeline,
    relay: RelayForwarder,

    adaptive: AdaptiveController,
    quantization: QuantizationController,
    keyframe: KeyframeController,
    requested_keyframe_ms: Option<u32>,

    alarms: AlarmLimiter,
    rx_errors: ErrorRateMonitor,
    no_target: ErrorRateMonitor,
    rx_errors_seen: u64,

    serial: Vec<SerialRx>,
    short_ids: Vec<u8>,

    video_tx: RateCounter,
    encoder_video: RateCounter,
    total_tx: RateCounter,
    last_sample: Option<Instant>,

    video_paused: bool,
    rng: StdRng,
    sleeper: Sleeper,
    read_buf: Vec<u8>,

    frames_sent: u64,
    tx_errors: u64,
    video_dropped_paused: u64,
    radio_reinits: u64,
    radio_reinit_failures: u64,
}

impl RouterState {
    /// Build the router over `ports`, one per configured interface.
    pub fn new(config: &RouterConfig, ports: Vec<Box<dyn RadioPort>>, now: Instant) -> Self {
        let mut topology = config.topology.clone();
        let interfaces = topology.interfaces.len().max(ports.len());
        let vehicle_id = config.pairing.local_vehicle_id;

        let mut pipeline = ReceivePipeline::new(config.receiver.clone(), config.pairing.clone(), interfaces);
        let mut relay = RelayForwarder::new();
        if config.relay.is_active() {
            match relay.apply_params(config.relay.clone(), vehicle_id, &mut topology) {
                Ok(_) => pipeline.set_relay(relay.params().clone()),
                Err(e) => tracing::warn!(error = %e, "configured relay parameters ignored"),
            }
        }

        let selector = LinkSelector::new(config.selector.clone(), &topology);
        let adaptive = AdaptiveController::new(config.adaptive.clone(), config.profiles.clone(), now);
        let quantization = QuantizationController::new(config.quantization.clone());
        let measure = quantization.measure_window();

        RouterState {
            vehicle_id,
            ports,
            runtime: config.runtime.clone(),
            mux: StreamMultiplexer::new(),
            selector,
            pipeline,
            relay,
            adaptive,
            quantization,
            keyframe: KeyframeController::new(config.keyframe.clone()),
            requested_keyframe_ms: None,
            alarms: AlarmLimiter::new(),
            rx_errors: ErrorRateMonitor::new(config.runtime.rx_error_alarm_per_sec),
            no_target: ErrorRateMonitor::new(config.runtime.no_target_alarm_per_sec),
            rx_errors_seen: 0,
            serial: (0..interfaces).map(|_| SerialRx::default()).collect(),
            short_ids: vec![0; interfaces],
            video_tx: RateCounter::new(Duration::from_secs(1)),
            encoder_video: RateCounter::new(measure),
            total_tx: RateCounter::new(Duration::from_secs(1)),
            last_sample: None,
            video_paused: false,
            rng: StdRng::seed_from_u64(vehicle_id as u64),
            sleeper: Box::new(std::thread::sleep),
            read_buf: vec![0; READ_BUFFER_LEN],
            frames_sent: 0,
            tx_errors: 0,
            video_dropped_paused: 0,
            radio_reinits: 0,
            radio_reinit_failures: 0,
            topology,
        }
    }

    /// Replace the blocking sleep used between radio reopen attempts.
    pub fn with_sleeper(mut self, sleeper: impl FnMut(Duration) + Send + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn vehicle_id(&self) -> u32 {
        self.vehicle_id
    }

    pub fn topology(&self) -> &RadioTopology {
        &self.topology
    }

    pub fn pipeline(&self) -> &ReceivePipeline {
        &self.pipeline
    }

    pub fn adaptive(&self) -> &AdaptiveController {
        &self.adaptive
    }

    pub fn relay(&self) -> &RelayForwarder {
        &self.relay
    }

    pub fn last_sequence(&self, stream_id: u8) -> Option<u32> {
        self.mux.last_sequence(stream_id)
    }

    pub fn snapshot_handle(&self) -> Arc<ArcSwap<OverwriteState>> {
        self.adaptive.snapshot_handle()
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            rx: self.pipeline.stats().clone(),
            tx: self.selector.stats().clone(),
            relay: self.relay.stats().clone(),
            adaptive: Some(self.adaptive.state().clone()),
            frames_sent: self.frames_sent,
            tx_errors: self.tx_errors,
            video_dropped_paused: self.video_dropped_paused,
            alarms_raised: self.alarms.raised(),
            alarms_suppressed: self.alarms.suppressed(),
            radio_reinits: self.radio_reinits,
            radio_reinit_failures: self.radio_reinit_failures,
            serial_resets: self.serial.iter().map(|s| s.accumulator.resets).sum(),
            video_paused: self.video_paused,
        }
    }

    // ─── TX ─────────────────────────────────────────────────────────────

    /// Sequence, chain and transmit sealed packets. Returns frames written.
    ///
    /// Video, pings and everything else are chained separately so a frame's
    /// class (and a ping reply's pinned link) covers all of its packets.
    pub fn send(&mut self, packets: Vec<BytesMut>, now: Instant) -> usize {
        let mut video = Vec::new();
        let mut pings = Vec::new();
        let mut other = Vec::new();

        for mut packet in packets {
            let (is_video, ptype) = match PacketHeader::decode(&mut &packet[..]) {
                Ok(h) => (h.module == Module::Video || h.is_video_stream(), h.packet_type),
                Err(e) => {
                    tracing::warn!(error = %e, len = packet.len(), "outbound packet rejected");
                    continue;
                }
            };
            if is_video && self.video_paused {
                self.video_dropped_paused += 1;
                continue;
            }
            if let Err(e) = self.mux.stamp(&mut packet) {
                tracing::warn!(error = %e, "outbound packet rejected");
                continue;
            }
            if is_video {
                self.quantization.note_video_started(now);
                self.encoder_video.record(now, packet.len() as u64);
                video.push(packet.freeze());
            } else if packet_type::is_ping(ptype) {
                pings.push(packet.freeze());
            } else {
                other.push(packet.freeze());
            }
        }

        let mut frames = self.mux.chain(video, MAX_PACKET_PAYLOAD);
        frames.extend(pings);
        frames.extend(self.mux.chain(other, MAX_PACKET_PAYLOAD));
        frames
            .into_iter()
            .filter(|frame| self.transmit_frame(frame.clone(), now))
            .count()
    }

    /// Write one already-chained frame to every selected interface. The
    /// frame is not restamped; relayed buffers go through here unchanged.
    pub fn transmit_frame(&mut self, frame: Bytes, now: Instant) -> bool {
        let summary = FrameSummary::inspect(&frame);
        let video_rate = Some(self.adaptive.state().video_rate).filter(DataRate::is_set);
        let targets = match self.selector.select_targets(&self.topology, &summary, video_rate, now) {
            Ok(targets) => targets,
            Err(SelectError::NoEligibleInterface) => {
                self.no_target.record(1, now);
                return false;
            }
        };

        let mut written = false;
        for target in targets {
            match self.write_target(&target, &frame) {
                Ok(bytes) => {
                    self.selector.record_sent(&target, &summary, bytes);
                    written = true;
                }
                Err(e) => {
                    self.tx_errors += 1;
                    tracing::warn!(interface = target.interface, error = %e, "radio write failed");
                }
            }
        }
        if !written {
            return false;
        }
        self.selector.record_streams(&summary);
        self.frames_sent += 1;
        self.total_tx.record(now, frame.len() as u64);
        if summary.is_video {
            self.video_tx.record(now, frame.len() as u64);
        }
        true
    }

    fn write_target(&mut self, target: &TxTarget, frame: &[u8]) -> anyhow::Result<usize> {
        let iface = target.interface;
        let Some(port) = self.ports.iter_mut().find(|p| p.index() == iface) else {
            anyhow::bail!("no port for interface {iface}");
        };
        if !target.short_form {
            return port.write(frame, target.rate);
        }
        if iface >= self.short_ids.len() {
            self.short_ids.resize(iface + 1, 0);
        }
        let mut total = 0;
        for short in split_into_short_packets(frame, &mut self.short_ids[iface]) {
            total += port.write(&short, target.rate)?;
        }
        Ok(total)
    }

    // ─── RX ─────────────────────────────────────────────────────────────

    /// Drain every port without blocking.
    pub fn poll_ports(&mut self, now: Instant) -> Vec<Delivery> {
        let mut out = Vec::new();
        let mut buf = std::mem::take(&mut self.read_buf);
        for p in 0..self.ports.len() {
            let iface = self.ports[p].index();
            for _ in 0..MAX_READS_PER_POLL {
                match self.ports[p].try_read(&mut buf) {
                    Ok(Some(0)) | Ok(None) => break,
                    Ok(Some(n)) => {
                        let data = Bytes::copy_from_slice(&buf[..n]);
                        out.extend(self.handle_radio_buffer(iface, data, now));
                    }
                    Err(e) => {
                        tracing::warn!(interface = iface, error = %e, "radio read failed");
                        break;
                    }
                }
            }
        }
        self.read_buf = buf;
        out
    }

    /// Process one buffer read from `interface`.
    pub fn handle_radio_buffer(&mut self, interface: usize, data: Bytes, now: Instant) -> Vec<Delivery> {
        let mut out = Vec::new();
        let link = self.topology.link_of(interface);
        let serial = self
            .topology
            .interface(interface)
            .is_some_and(|i| i.caps.is_serial());

        if serial {
            if interface >= self.serial.len() {
                self.serial.resize_with(interface + 1, SerialRx::default);
            }
            let mut packets = Vec::new();
            let rx = &mut self.serial[interface];
            rx.scanner.push(&data);
            while let Some((header, body)) = rx.scanner.next_packet() {
                packets.extend(rx.accumulator.push(header, &body).into_iter().map(|(p, _)| p));
            }
            for packet in packets {
                self.ingest(interface, link, packet, now, &mut out);
            }
        } else {
            self.ingest(interface, link, data, now, &mut out);
        }
        out
    }

    fn ingest(&mut self, interface: usize, link: Option<usize>, buffer: Bytes, now: Instant, out: &mut Vec<Delivery>) {
        if self.is_for_relayed_vehicle(link, &buffer) {
            if let Some(relay_link) = self.relay.forward_from_controller_to_relayed_vehicle(&buffer) {
                self.write_on_link(relay_link, &buffer);
            }
            return;
        }

        for event in self.pipeline.process_buffer(interface, link, buffer, now) {
            match event {
                RxEvent::Dispatch { consumer, packet, .. } => {
                    let src = packet.header.vehicle_id_src;
                    if self.is_controller(src) {
                        self.adaptive.note_controller_packet(now);
                    }
                    out.push(Delivery::Packet {
                        consumer,
                        vehicle_id: src,
                        packet,
                    });
                }
                RxEvent::VehicleRestarted { vehicle_id } => out.push(Delivery::VehicleRestarted { vehicle_id }),
                RxEvent::RelayFromVehicle { interface, link, buffer } => {
                    if let RelayOutcome::Forward(upstream) =
                        self.relay.forward_from_relayed_vehicle(link, interface, &buffer)
                    {
                        self.transmit_frame(upstream, now);
                    }
                }
                RxEvent::CommandRtt { counter, rtt } => out.push(Delivery::CommandRtt { counter, rtt }),
                RxEvent::FirstPairingDone { vehicle_id } => {
                    out.push(Delivery::Local(LocalControl::FirstPairingDone { vehicle_id }));
                }
                RxEvent::PacketReconstructed { .. } => {
                    self.raise(AlarmClass::PacketReconstructed, 0, 1, now);
                }
                RxEvent::Dropped { reason, .. } => {
                    if reason == DropReason::CrcFailure {
                        tracing::trace!(interface, "crc failure");
                    }
                }
            }
        }
    }

    /// Controller traffic on a non-relay link addressed to the vehicle this
    /// node relays.
    fn is_for_relayed_vehicle(&self, link: Option<usize>, buffer: &Bytes) -> bool {
        let params = self.relay.params();
        if !params.mode.contains(RelayMode::IS_RELAY_NODE) || params.relayed_vehicle_id == 0 {
            return false;
        }
        if link.is_none() || link == params.relay_link {
            return false;
        }
        PacketHeader::decode(&mut &buffer[..])
            .is_ok_and(|h| h.vehicle_id_dest == params.relayed_vehicle_id && h.vehicle_id_src != self.vehicle_id)
    }

    fn write_on_link(&mut self, link: usize, buffer: &Bytes) {
        let Some(info) = self.topology.link(link) else {
            return;
        };
        let rate = info.data_rate;
        for iface in info.interfaces.clone() {
            if let Some(port) = self.ports.iter_mut().find(|p| p.index() == iface) {
                if let Err(e) = port.write(buffer, rate) {
                    self.tx_errors += 1;
                    tracing::warn!(interface = iface, error = %e, "relay write failed");
                }
            }
        }
    }

    fn is_controller(&self, src: u32) -> bool {
        match self.pipeline.pairing().paired_vehicle_id {
            Some(id) => id == src,
            None => src != self.vehicle_id,
        }
    }

    // ─── Control ────────────────────────────────────────────────────────

    /// Apply a local-control message from another node process.
    pub fn handle_local_control(&mut self, msg: LocalControl, now: Instant) -> Vec<Delivery> {
        tracing::debug!(?msg, "local control");
        let mut out = Vec::new();
        match &msg {
            LocalControl::ModelChanged { change, .. } => {
                if *change != ModelChange::RelayParams {
                    out.extend(self.adaptive.reset(now).into_iter().map(Delivery::Link));
                }
            }
            LocalControl::ReinitializeRadioLinks => {
                return self.reinitialize_radios(now);
            }
            LocalControl::PauseVideo => self.video_paused = true,
            LocalControl::ResumeVideo => self.video_paused = false,
            LocalControl::SetSikSerialSpeed { baud } => {
                let serial: Vec<usize> = self
                    .topology
                    .interfaces
                    .iter_mut()
                    .filter(|i| i.caps.is_serial())
                    .map(|i| {
                        i.current_rate = DataRate(*baud as i32);
                        i.index
                    })
                    .collect();
                self.reopen_interfaces(&serial);
            }
            LocalControl::FirstPairingDone { vehicle_id } => {
                if self.pipeline.pairing().paired_vehicle_id != Some(*vehicle_id) {
                    self.pipeline.set_paired(*vehicle_id);
                }
            }
            LocalControl::Reboot
            | LocalControl::SetCameraParam { .. }
            | LocalControl::BroadcastVehicleStats
            | LocalControl::RouterReady => {}
        }
        out.push(Delivery::Local(msg));
        out
    }

    /// Reopen every radio with bounded, jittered retries. When a radio stays
    /// down a reboot is requested.
    pub fn reinitialize_radios(&mut self, now: Instant) -> Vec<Delivery> {
        let all: Vec<usize> = self.ports.iter().map(|p| p.index()).collect();
        self.radio_reinits += 1;
        let failed = self.reopen_interfaces(&all);
        for rx in &mut self.serial {
            *rx = SerialRx::default();
        }
        if failed.is_empty() {
            tracing::info!(radios = all.len(), "radio links reinitialized");
            return Vec::new();
        }

        self.radio_reinit_failures += 1;
        tracing::error!(?failed, "radio reinitialization failed, requesting reboot");
        let mut out = Vec::new();
        if let Some(body) = self.alarms.raise(AlarmClass::RadioReinitFailed, failed.len() as u32, 0, now) {
            self.send_alarm(&body, now);
        }
        out.push(Delivery::Local(LocalControl::Reboot));
        out
    }

    /// Returns the interfaces that could not be reopened.
    fn reopen_interfaces(&mut self, interfaces: &[usize]) -> Vec<usize> {
        let attempts = self.runtime.reinit_max_attempts.max(1);
        let base = self.runtime.reinit_backoff;
        let mut failed = Vec::new();

        for &iface in interfaces {
            let Some(p) = self.ports.iter().position(|p| p.index() == iface) else {
                continue;
            };
            let mut ok = false;
            for attempt in 0..attempts {
                match self.ports[p].reopen() {
                    Ok(()) => {
                        ok = true;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(interface = iface, attempt, error = %e, "radio reopen failed");
                        if attempt + 1 < attempts {
                            let jitter = base.mul_f64(self.rng.random::<f64>() * 0.5);
                            (self.sleeper)(base * 2u32.saturating_pow(attempt) + jitter);
                        }
                    }
                }
            }
            if !ok {
                failed.push(iface);
            }
        }
        failed
    }

    /// Validate and apply relay parameters. On error the previous parameters
    /// stay in force.
    pub fn apply_relay_params(&mut self, params: RelayParams) -> Result<Vec<Delivery>, RelayConfigError> {
        let change = self.relay.apply_params(params, self.vehicle_id, &mut self.topology)?;
        self.pipeline.set_relay(self.relay.params().clone());
        self.selector.resize(&self.topology);
        let failed = self.reopen_interfaces(&change.reopen_interfaces);
        if !failed.is_empty() {
            tracing::warn!(?failed, "radios did not reopen after relay change");
        }
        let mut out = Vec::new();
        if let Some(vehicle_id) = change.previous_vehicle {
            tracing::info!(vehicle_id, "stopped relaying vehicle");
        }
        out.push(Delivery::Local(change.notify));
        Ok(out)
    }

    pub fn force_profile(&mut self, profile: Option<VideoProfile>, now: Instant) -> Vec<Delivery> {
        self.adaptive
            .force_profile(profile, now)
            .into_iter()
            .map(Delivery::Link)
            .collect()
    }

    pub fn record_peer_report(&mut self, report: PeerReport, now: Instant) {
        self.adaptive.record_peer_report(report, now);
    }

    /// Keyframe interval asked for by the controller.
    pub fn request_keyframe_interval(&mut self, interval_ms: Option<u32>) {
        self.requested_keyframe_ms = interval_ms;
    }

    pub fn note_command_sent(&mut self, counter: u32, now: Instant) {
        self.pipeline.note_command_sent(counter, now);
    }

    // ─── Periodic ───────────────────────────────────────────────────────

    /// Run the periodic controllers. Call at least every stats interval.
    pub fn tick(&mut self, now: Instant) -> Vec<Delivery> {
        let mut cmds = Vec::new();

        let due = self
            .last_sample
            .is_none_or(|t| now.saturating_duration_since(t) >= self.adaptive.stats_interval());
        if due {
            self.last_sample = Some(now);
            if let Some(q) = self.pipeline.take_quality().into_iter().flatten().max() {
                self.adaptive.record_rx_quality(q);
                if q < self.runtime.link_quality_alarm_below {
                    self.raise(AlarmClass::LinkQuality, q as u32, 0, now);
                }
            }
            let overloaded = self.tx_overloaded(now);
            cmds.extend(self.adaptive.record_tx_overload(overloaded, now));
            if overloaded {
                self.raise(AlarmClass::TxOverload, 0, 0, now);
            }
            self.check_error_rates(now);
        }

        cmds.extend(self.adaptive.tick(now));

        let input = self.quantization_input(now);
        if let Some(value) = self.quantization.update(input, now) {
            cmds.extend(self.adaptive.set_quantization(value));
        }
        let input = self.keyframe_input(now);
        if let Some(ms) = self.keyframe.update(input, now) {
            cmds.extend(self.adaptive.set_keyframe(ms));
        }

        cmds.into_iter().map(Delivery::Link).collect()
    }

    fn tx_overloaded(&self, now: Instant) -> bool {
        let rate = self.adaptive.state().video_rate;
        let budget = rate.effective_bps() * self.runtime.tx_overload_percent / 100;
        budget > 0 && (self.video_tx.rate(now) * 8.0) as u64 > budget
    }

    fn check_error_rates(&mut self, now: Instant) {
        let seen: u64 = self
            .pipeline
            .stats()
            .interfaces
            .iter()
            .map(|i| i.crc_errors + i.malformed)
            .sum();
        self.rx_errors.record(seen.saturating_sub(self.rx_errors_seen), now);
        self.rx_errors_seen = seen;

        if let Some(n) = self.rx_errors.exceeded(now) {
            self.raise(AlarmClass::RxErrors, n as u32, 0, now);
        }
        if let Some(n) = self.no_target.exceeded(now) {
            self.raise(AlarmClass::NoEligibleInterface, n as u32, 0, now);
        }
    }

    fn raise(&mut self, class: AlarmClass, flags1: u32, flags2: u32, now: Instant) {
        if let Some(body) = self.alarms.raise(class, flags1, flags2, now) {
            self.send_alarm(&body, now);
        }
    }

    fn send_alarm(&mut self, body: &skylink_wire::wire::AlarmBody, now: Instant) {
        match alarm_packet(self.vehicle_id, body) {
            Ok(packet) => {
                self.send(vec![packet], now);
            }
            Err(e) => tracing::warn!(error = %e, "alarm packet not built"),
        }
    }

    fn quantization_input(&self, now: Instant) -> QuantizationInput {
        let state = self.adaptive.state();
        let settings = self.adaptive.profiles().get(state.profile);
        let min_radio_bps = self
            .topology
            .links
            .iter()
            .filter(|l| l.caps.can_transmit_video() && !l.caps.is_relay_only())
            .map(|l| l.video_rate.min_effective(state.video_rate).effective_bps())
            .filter(|&bps| bps > 0)
            .min()
            .unwrap_or(0);
        QuantizationInput {
            enabled: settings.adaptive_quantization,
            video_bps: (self.encoder_video.rate(now) * 8.0) as u64,
            total_bps: (self.total_tx.rate(now) * 8.0) as u64,
            target_bps: state.target_bitrate_bps as u64,
            min_radio_bps,
            profile_changed_at: self.adaptive.profile_changed_at(),
        }
    }

    fn keyframe_input(&self, now: Instant) -> KeyframeInput {
        let state = self.adaptive.state();
        let settings = self.adaptive.profiles().get(state.profile);
        let relay = self.relay.params();
        KeyframeInput {
            relay_pass_through: relay.mode.contains(RelayMode::IS_RELAY_NODE)
                && relay.flags.contains(RelayFlags::VIDEO),
            fixed_interval_ms: settings.fixed_keyframe_ms,
            controller_link_age: self
                .adaptive
                .last_controller_packet()
                .map(|t| now.saturating_duration_since(t)),
            quality: self.adaptive.latest_quality(),
            best_quality: self.adaptive.best_recent_quality(),
            requested_ms: self.requested_keyframe_ms,
            profile: state.profile,
            at_max_shift: state.shift >= settings.max_shift(),
            fps: settings.fps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::memory::{MemoryPort, MemoryTap};
    use crate::radio::test_support::*;
    use skylink_wire::wire::{build, ChainIter, STREAM_ID_DATA, STREAM_ID_VIDEO_1};

    const LOCAL: u32 = 10;
    const PEER: u32 = 20;

    fn router() -> (RouterState, Vec<MemoryTap>) {
        let mut config = RouterConfig::default();
        config.pairing.local_vehicle_id = LOCAL;
        config.topology = two_link_topology();
        let mut ports: Vec<Box<dyn RadioPort>> = Vec::new();
        let mut taps = Vec::new();
        for i in 0..config.topology.interfaces.len() {
            let (port, tap) = MemoryPort::new(i);
            ports.push(Box::new(port));
            taps.push(tap);
        }
        let r = RouterState::new(&config, ports, Instant::now()).with_sleeper(|_| {});
        (r, taps)
    }

    fn packet(module: Module, stream: u8, len: usize) -> BytesMut {
        let h = PacketHeader::new(module, packet_type::VIDEO_DATA, LOCAL, PEER).with_stream(stream);
        build(&h, &vec![0xAB; len], None).unwrap()
    }

    #[test]
    fn send_stamps_and_chains() {
        let (mut r, taps) = router();
        let now = Instant::now();
        let sent = r.send(
            vec![
                packet(Module::Video, STREAM_ID_VIDEO_1, 100),
                packet(Module::Video, STREAM_ID_VIDEO_1, 100),
                packet(Module::Telemetry, STREAM_ID_DATA, 50),
            ],
            now,
        );
        assert_eq!(sent, 2, "video and data chained apart");
        assert_eq!(r.last_sequence(STREAM_ID_VIDEO_1), Some(1));

        let written = taps[0].drain_written();
        let seqs: Vec<u32> = written
            .iter()
            .flat_map(|(b, _)| ChainIter::new(b.clone()))
            .map(|i| i.unwrap().packet.sequence())
            .collect();
        assert!(seqs.starts_with(&[0, 1]));
    }

    #[test]
    fn paused_video_is_dropped() {
        let (mut r, taps) = router();
        let now = Instant::now();
        r.handle_local_control(LocalControl::PauseVideo, now);
        assert_eq!(r.send(vec![packet(Module::Video, STREAM_ID_VIDEO_1, 10)], now), 0);
        assert!(taps[0].drain_written().is_empty());
        assert_eq!(r.stats().video_dropped_paused, 1);

        r.handle_local_control(LocalControl::ResumeVideo, now);
        assert_eq!(r.send(vec![packet(Module::Video, STREAM_ID_VIDEO_1, 10)], now), 1);
    }

    #[test]
    fn model_change_resets_adaptive_state() {
        let (mut r, _) = router();
        let now = Instant::now();
        let out = r.handle_local_control(
            LocalControl::ModelChanged {
                change: ModelChange::VideoBitrate,
                extra: 0,
            },
            now,
        );
        assert!(out.iter().any(|d| matches!(d, Delivery::Link(LinkCommand::SetBitrate { .. }))));
        assert!(matches!(out.last(), Some(Delivery::Local(_))));
    }

    fn from_peer(src: u32, seq: u32) -> BytesMut {
        let h = PacketHeader::new(Module::Video, packet_type::VIDEO_DATA, src, LOCAL)
            .with_stream(STREAM_ID_VIDEO_1)
            .with_sequence(seq);
        build(&h, b"video", None).unwrap()
    }

    // ─── Pairing ────────────────────────────────────────────────────────

    #[test]
    fn first_pairing_reported_to_local_processes() {
        let (mut r, _) = router();
        let now = Instant::now();
        let out = r.handle_radio_buffer(0, from_peer(PEER, 1).freeze(), now);
        assert!(out.contains(&Delivery::Local(LocalControl::FirstPairingDone { vehicle_id: PEER })));
        assert!(out.iter().any(|d| matches!(d, Delivery::Packet { vehicle_id: PEER, .. })));
        assert_eq!(r.pipeline().pairing().paired_vehicle_id, Some(PEER));

        let out = r.handle_radio_buffer(0, from_peer(PEER + 1, 1).freeze(), now);
        assert!(out.is_empty());
    }

    // ─── Alarms ─────────────────────────────────────────────────────────

    #[test]
    fn reconstructed_packets_raise_rate_limited_alarm() {
        let (mut r, _) = router();
        let t0 = Instant::now();
        for (i, at) in [0u64, 1, 5, 9].into_iter().enumerate() {
            let mut pkt = from_peer(0, i as u32);
            pkt[16..20].copy_from_slice(&PEER.to_le_bytes());
            let out = r.handle_radio_buffer(0, pkt.freeze(), t0 + Duration::from_secs(at));
            assert!(out.iter().any(|d| matches!(d, Delivery::Packet { vehicle_id: 0, .. })));
        }
        assert_eq!(r.stats().alarms_raised, 1);
        assert_eq!(r.stats().alarms_suppressed, 3);
        assert_eq!(r.stats().rx.interfaces[0].reconstructed, 4);
    }

    #[test]
    fn poor_reception_raises_link_quality_alarm() {
        let (mut r, _) = router();
        let now = Instant::now();
        r.handle_radio_buffer(0, from_peer(PEER, 1).freeze(), now);
        for seq in 2..5 {
            let mut bad = from_peer(PEER, seq);
            let last = bad.len() - 1;
            bad[last] ^= 0x5A;
            r.handle_radio_buffer(0, bad.freeze(), now);
        }
        r.tick(now);
        assert_eq!(r.stats().alarms_raised, 1);
    }

    #[test]
    fn good_reception_raises_no_alarm() {
        let (mut r, _) = router();
        let now = Instant::now();
        for seq in 1..5 {
            r.handle_radio_buffer(0, from_peer(PEER, seq).freeze(), now);
        }
        r.tick(now);
        assert_eq!(r.stats().alarms_raised, 0);
    }

    #[test]
    fn malformed_outbound_is_skipped() {
        let (mut r, _) = router();
        assert_eq!(r.send(vec![BytesMut::from(&[1u8, 2, 3][..])], Instant::now()), 0);
    }
}
