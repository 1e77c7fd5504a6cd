//! End-to-end router scenarios over in-memory radios.
//!
//! Each test drives a [`RouterState`] through its public surface: buffers are
//! injected on the radio taps, deliveries and written frames are observed,
//! and time advances deterministically.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use quanta::Instant;
use skylink_link::adaptive::{LinkCommand, VideoProfile};
use skylink_link::radio::memory::{MemoryPort, MemoryTap};
use skylink_link::radio::RadioPort;
use skylink_link::receiver::Consumer;
use skylink_link::relay::{RelayFlags, RelayMode, RelayParams};
use skylink_link::{Delivery, RouterConfig, RouterState};
use skylink_wire::ipc::LocalControl;
use skylink_wire::wire::{
    build, packet_type, ChainIter, Module, PacketHeader, STREAM_ID_DATA, STREAM_ID_TELEMETRY, STREAM_ID_VIDEO_1,
};

const VEHICLE: u32 = 10;
const CONTROLLER: u32 = 20;

fn two_links(local: u32, peer: u32) -> String {
    format!(
        r#"
        vehicle_id = {local}
        paired_vehicle_id = {peer}

        [[links]]
        capabilities = ["rx", "tx", "video", "data"]
        frequency_khz = 5745000

        [[links]]
        capabilities = ["rx", "tx", "video", "data"]
        frequency_khz = 5765000

        [[interfaces]]
        link = 0
        capabilities = ["rx", "tx", "video", "data"]

        [[interfaces]]
        link = 1
        capabilities = ["rx", "tx", "video", "data"]
        "#
    )
}

fn router_with(config: &RouterConfig, fail_reopens: u32) -> (RouterState, Vec<MemoryTap>) {
    let mut ports: Vec<Box<dyn RadioPort>> = Vec::new();
    let mut taps = Vec::new();
    for i in 0..config.topology.interfaces.len() {
        let (mut port, tap) = MemoryPort::new(i);
        port.fail_reopens = fail_reopens;
        ports.push(Box::new(port));
        taps.push(tap);
    }
    let router = RouterState::new(config, ports, Instant::now()).with_sleeper(|_| {});
    (router, taps)
}

fn router(toml: &str) -> (RouterState, Vec<MemoryTap>) {
    router_with(&RouterConfig::from_toml_str(toml).unwrap(), 0)
}

fn packet(src: u32, dst: u32, module: Module, ptype: u8, stream: u8, seq: u32) -> BytesMut {
    let h = PacketHeader::new(module, ptype, src, dst)
        .with_stream(stream)
        .with_sequence(seq);
    build(&h, &[0x5A; 40], None).unwrap()
}

fn video(src: u32, seq: u32) -> BytesMut {
    packet(src, CONTROLLER, Module::Video, packet_type::VIDEO_DATA, STREAM_ID_VIDEO_1, seq)
}

fn corrupt(mut p: BytesMut) -> BytesMut {
    let last = p.len() - 1;
    p[last] ^= 0xFF;
    p
}

fn chain(packets: &[BytesMut]) -> Bytes {
    let mut buf = BytesMut::new();
    for p in packets {
        buf.extend_from_slice(p);
    }
    buf.freeze()
}

/// `(consumer, vehicle, sequence)` of every delivered packet.
fn dispatched(out: &[Delivery]) -> Vec<(Consumer, u32, u32)> {
    out.iter()
        .filter_map(|d| match d {
            Delivery::Packet {
                consumer,
                vehicle_id,
                packet,
            } => Some((*consumer, *vehicle_id, packet.sequence())),
            _ => None,
        })
        .collect()
}

fn restarts(out: &[Delivery]) -> usize {
    out.iter()
        .filter(|d| matches!(d, Delivery::VehicleRestarted { .. }))
        .count()
}

// ─── Receive Path ───────────────────────────────────────────────────────────

#[test]
fn chained_video_dispatches_in_order() {
    let (mut r, taps) = router(&two_links(CONTROLLER, VEHICLE));
    taps[0].inject(chain(&[video(VEHICLE, 100), video(VEHICLE, 101), video(VEHICLE, 102)]));

    let out = r.poll_ports(Instant::now());
    assert_eq!(
        dispatched(&out),
        vec![
            (Consumer::Video, VEHICLE, 100),
            (Consumer::Video, VEHICLE, 101),
            (Consumer::Video, VEHICLE, 102),
        ]
    );
    assert_eq!(r.pipeline().max_seq(VEHICLE, STREAM_ID_VIDEO_1), Some(102));
}

#[test]
fn stale_packet_dropped_without_state_change() {
    let (mut r, taps) = router(&two_links(CONTROLLER, VEHICLE));
    let now = Instant::now();
    taps[0].inject(chain(&[video(VEHICLE, 50)]));
    r.poll_ports(now);

    taps[0].inject(chain(&[video(VEHICLE, 5)]));
    let out = r.poll_ports(now + Duration::from_millis(10));
    assert!(dispatched(&out).is_empty());
    assert_eq!(restarts(&out), 0);
    assert_eq!(r.pipeline().max_seq(VEHICLE, STREAM_ID_VIDEO_1), Some(50));
    assert_eq!(r.stats().rx.interfaces[0].stale, 1);
}

#[test]
fn large_backward_jump_is_one_restart() {
    let (mut r, taps) = router(&two_links(CONTROLLER, VEHICLE));
    let now = Instant::now();
    taps[0].inject(chain(&[video(VEHICLE, 2000)]));
    r.poll_ports(now);

    taps[0].inject(chain(&[video(VEHICLE, 5)]));
    let out = r.poll_ports(now + Duration::from_millis(10));
    assert_eq!(restarts(&out), 1);
    assert_eq!(dispatched(&out), vec![(Consumer::Video, VEHICLE, 5)]);
    assert_eq!(r.pipeline().max_seq(VEHICLE, STREAM_ID_VIDEO_1), Some(5));

    taps[0].inject(chain(&[video(VEHICLE, 6)]));
    let out = r.poll_ports(now + Duration::from_millis(20));
    assert_eq!(restarts(&out), 0, "tracking resumed from the new sequence");
}

#[test]
fn crc_failures_are_never_dispatched() {
    let (mut r, taps) = router(&two_links(CONTROLLER, VEHICLE));
    taps[1].inject(chain(&[video(VEHICLE, 1), corrupt(video(VEHICLE, 2)), video(VEHICLE, 3)]));
    let out = r.poll_ports(Instant::now());
    let seqs: Vec<u32> = dispatched(&out).into_iter().map(|(_, _, s)| s).collect();
    assert_eq!(seqs, vec![1, 3]);
    assert_eq!(r.stats().rx.interfaces[1].crc_errors, 1);
}

#[test]
fn foreign_vehicle_is_filtered() {
    let (mut r, taps) = router(&two_links(CONTROLLER, VEHICLE));
    taps[0].inject(chain(&[video(999, 1)]));
    assert!(dispatched(&r.poll_ports(Instant::now())).is_empty());
    assert_eq!(r.stats().rx.interfaces[0].foreign, 1);
}

// ─── Transmit Path ──────────────────────────────────────────────────────────

#[test]
fn outbound_sequences_are_monotonic_on_air() {
    let (mut r, taps) = router(&two_links(VEHICLE, CONTROLLER));
    let now = Instant::now();
    for round in 0..5u32 {
        let batch = (0..4)
            .map(|_| packet(VEHICLE, CONTROLLER, Module::Video, packet_type::VIDEO_DATA, STREAM_ID_VIDEO_1, 0))
            .collect();
        r.send(batch, now + Duration::from_millis(round as u64 * 33));
    }

    let seqs: Vec<u32> = taps[0]
        .drain_written()
        .into_iter()
        .flat_map(|(frame, _)| ChainIter::new(frame))
        .map(|item| item.unwrap().packet.sequence())
        .collect();
    assert_eq!(seqs, (0..20).collect::<Vec<_>>());
    assert_eq!(r.last_sequence(STREAM_ID_VIDEO_1), Some(19));
}

#[test]
fn ping_reply_keeps_its_sequence_and_link() {
    use skylink_wire::wire::PingReply;

    let (mut r, taps) = router(&two_links(VEHICLE, CONTROLLER));
    let mut body = BytesMut::new();
    PingReply {
        ping_id: 7,
        flags: 0,
        local_time_ms: 1234,
        radio_link_id: 1,
    }
    .encode(&mut body);
    let h = PacketHeader::new(Module::Ruby, packet_type::PING_CLOCK_REPLY, VEHICLE, CONTROLLER).with_sequence(77);
    let reply = build(&h, &body, None).unwrap();

    assert_eq!(r.send(vec![reply], Instant::now()), 1);
    assert!(taps[0].drain_written().is_empty(), "pinned to link 1");
    let written = taps[1].drain_written();
    assert_eq!(written.len(), 1);
    let item = ChainIter::new(written[0].0.clone()).next().unwrap().unwrap();
    assert_eq!(item.packet.sequence(), 77);
}

// ─── Serial Radios ──────────────────────────────────────────────────────────

const SERIAL: &str = r#"
    vehicle_id = VID
    paired_vehicle_id = PID

    [[links]]
    capabilities = ["rx", "tx", "data"]
    frequency_khz = 433000

    [[interfaces]]
    link = 0
    capabilities = ["rx", "tx", "data", "serial"]
    rate = 57600
"#;

fn serial_router(local: u32, peer: u32) -> (RouterState, Vec<MemoryTap>) {
    router(
        &SERIAL
            .replace("VID", &local.to_string())
            .replace("PID", &peer.to_string()),
    )
}

#[test]
fn serial_link_carries_short_packets_end_to_end() {
    let (mut vehicle, vtaps) = serial_router(VEHICLE, CONTROLLER);
    let (mut controller, ctaps) = serial_router(CONTROLLER, VEHICLE);
    let now = Instant::now();

    let telemetry = packet(VEHICLE, CONTROLLER, Module::Telemetry, packet_type::FC_TELEMETRY, STREAM_ID_TELEMETRY, 0);
    assert_eq!(vehicle.send(vec![telemetry], now), 1);
    let video = packet(VEHICLE, CONTROLLER, Module::Video, packet_type::VIDEO_DATA, STREAM_ID_VIDEO_1, 0);
    assert_eq!(vehicle.send(vec![video], now), 0, "serial never carries video");

    let mut stream = BytesMut::from(&b"\x00garbage"[..]);
    for (short, rate) in vtaps[0].drain_written() {
        assert_eq!(rate.0, 57600);
        stream.extend_from_slice(&short);
    }
    let stream = stream.freeze();
    let mid = stream.len() / 2;
    ctaps[0].inject(stream.slice(..mid));
    ctaps[0].inject(stream.slice(mid..));

    let out = controller.poll_ports(now);
    assert_eq!(dispatched(&out), vec![(Consumer::Telemetry, VEHICLE, 0)]);
}

// ─── Adaptive Video ─────────────────────────────────────────────────────────

#[test]
fn poor_quality_walks_user_down_to_medium_with_one_bitrate_push() {
    let (mut r, taps) = router(&two_links(VEHICLE, CONTROLLER));
    let t0 = Instant::now();
    let mut seq = 0;
    let mut bitrate_pushes = Vec::new();

    for step in 0..750u64 {
        let now = t0 + Duration::from_millis(step * 40);
        // 2 good of 5: quality 40.
        let mut batch = Vec::new();
        for i in 0..5 {
            let p = packet(CONTROLLER, VEHICLE, Module::Commands, packet_type::COMMAND, STREAM_ID_DATA, seq);
            seq += 1;
            batch.push(if i < 2 { p } else { corrupt(p) });
        }
        taps[0].inject(chain(&batch));
        r.poll_ports(now);
        for d in r.tick(now) {
            if let Delivery::Link(LinkCommand::SetBitrate { bps }) = d {
                bitrate_pushes.push(bps);
            }
        }
        if r.adaptive().state().profile == VideoProfile::Medium {
            break;
        }
    }

    let state = r.adaptive().state();
    assert_eq!(state.profile, VideoProfile::Medium);
    assert_eq!(state.shift, 0);
    assert_eq!(bitrate_pushes, vec![r.adaptive().profiles().medium.bitrate_bps]);
    assert_eq!(r.snapshot_handle().load().profile, VideoProfile::Medium);
}

#[test]
fn forced_profile_holds_against_quality() {
    let (mut r, taps) = router(&two_links(VEHICLE, CONTROLLER));
    let t0 = Instant::now();
    r.force_profile(Some(VideoProfile::Low), t0);
    let mut seq = 0;
    for step in 1..100u64 {
        let now = t0 + Duration::from_millis(step * 40);
        let p = packet(CONTROLLER, VEHICLE, Module::Commands, packet_type::COMMAND, STREAM_ID_DATA, seq);
        seq += 1;
        taps[0].inject(chain(&[p]));
        r.poll_ports(now);
        r.tick(now);
    }
    assert_eq!(r.adaptive().state().profile, VideoProfile::Low);
}

// ─── Relay ──────────────────────────────────────────────────────────────────

const LOCAL: u32 = 100;
const RELAYED: u32 = 200;
const GROUND: u32 = 300;

fn relay_node() -> (RouterState, Vec<MemoryTap>) {
    let toml = format!(
        r#"{}
        [relay]
        relayed_vehicle_id = {RELAYED}
        link = 1
        frequency_khz = 5765000
        flags = ["video", "telemetry"]
        mode = ["is_relay_node"]
        "#,
        two_links(LOCAL, GROUND)
    );
    router(&toml)
}

fn from_relayed(seq: u32) -> BytesMut {
    packet(RELAYED, GROUND, Module::Video, packet_type::VIDEO_DATA, STREAM_ID_VIDEO_1, seq)
}

#[test]
fn relay_buffer_with_one_bad_packet_forwards_nothing() {
    let (mut r, taps) = relay_node();
    let before = r.stats().relay.dropped_buffers;
    taps[1].inject(chain(&[from_relayed(1), from_relayed(2), corrupt(from_relayed(3))]));
    let out = r.poll_ports(Instant::now());

    assert!(dispatched(&out).is_empty());
    assert!(taps[0].drain_written().is_empty(), "0 bytes forwarded upstream");
    let stats = r.stats().relay;
    assert_eq!(stats.dropped_buffers, before + 1);
    assert_eq!(stats.forwarded_bytes, 0);
}

#[test]
fn relay_buffer_is_forwarded_unchanged() {
    let (mut r, taps) = relay_node();
    let buffer = chain(&[from_relayed(1), from_relayed(2)]);
    taps[1].inject(buffer.clone());
    r.poll_ports(Instant::now());

    let written = taps[0].drain_written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].0, buffer);
    assert!(taps[1].drain_written().is_empty(), "relay link is relay-only");
    assert_eq!(r.stats().relay.forwarded_bytes, buffer.len() as u64);
}

#[test]
fn controller_traffic_for_relayed_vehicle_goes_down_the_relay_link() {
    let (mut r, taps) = relay_node();
    let cmd = chain(&[packet(GROUND, RELAYED, Module::Commands, packet_type::COMMAND, STREAM_ID_DATA, 3)]);
    taps[0].inject(cmd.clone());
    let out = r.poll_ports(Instant::now());

    assert!(dispatched(&out).is_empty());
    let written = taps[1].drain_written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].0, cmd);
    assert_eq!(r.stats().relay.to_vehicle_buffers, 1);
}

#[test]
fn rejected_relay_params_keep_previous() {
    let (mut r, _) = relay_node();
    let bad = RelayParams {
        relayed_vehicle_id: LOCAL,
        relay_link: Some(1),
        frequency_khz: 5765000,
        flags: RelayFlags::VIDEO,
        mode: RelayMode::IS_RELAY_NODE,
    };
    assert!(r.apply_relay_params(bad).is_err());
    assert_eq!(r.relay().params().relayed_vehicle_id, RELAYED);
    assert_eq!(r.topology().relay_link(), Some(1));
}

#[test]
fn clearing_relay_frees_the_link() {
    let (mut r, _) = relay_node();
    let out = r.apply_relay_params(RelayParams::default()).unwrap();
    assert!(matches!(out.last(), Some(Delivery::Local(LocalControl::ModelChanged { .. }))));
    assert_eq!(r.topology().relay_link(), None);
    assert!(!r.topology().interfaces[1].caps.is_relay_only());
}

// ─── Radio Reinit ───────────────────────────────────────────────────────────

#[test]
fn failed_reinit_requests_reboot_after_bounded_retries() {
    let config = RouterConfig::from_toml_str(&two_links(VEHICLE, CONTROLLER)).unwrap();
    let attempts = config.runtime.reinit_max_attempts;
    let (r, _) = router_with(&config, u32::MAX);
    let sleeps = Arc::new(Mutex::new(Vec::new()));
    let recorded = sleeps.clone();
    let mut r = r.with_sleeper(move |d| recorded.lock().unwrap().push(d));

    let out = r.handle_local_control(LocalControl::ReinitializeRadioLinks, Instant::now());
    assert!(out.contains(&Delivery::Local(LocalControl::Reboot)));
    let sleeps = sleeps.lock().unwrap();
    assert_eq!(sleeps.len() as u32, 2 * (attempts - 1), "two radios");
    assert!(sleeps[1] > sleeps[0], "backoff grows");
    assert_eq!(r.stats().radio_reinit_failures, 1);
}

#[test]
fn successful_reinit_is_quiet() {
    let (mut r, _) = router(&two_links(VEHICLE, CONTROLLER));
    let out = r.handle_local_control(LocalControl::ReinitializeRadioLinks, Instant::now());
    assert!(out.is_empty());
    assert_eq!(r.stats().radio_reinits, 1);
}

// ─── Stats ──────────────────────────────────────────────────────────────────

#[test]
fn stats_serialize_to_json() {
    let (mut r, taps) = router(&two_links(CONTROLLER, VEHICLE));
    taps[0].inject(chain(&[video(VEHICLE, 1)]));
    r.poll_ports(Instant::now());
    let json = serde_json::to_value(r.stats()).unwrap();
    assert_eq!(json["rx"]["interfaces"][0]["packets"], 1);
    assert_eq!(json["adaptive"]["profile"], "user");
}
