//! Property-based tests for the SkyLink wire format.
//!
//! Parsing must never panic on hostile input, chained buffers must split back
//! into exactly the packets that were chained, and sequence numbers must be
//! strictly increasing per stream.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use skylink_wire::short::{split_into_short_packets, SerialScanner, ShortPacketAccumulator};
use skylink_wire::stream::StreamMultiplexer;
use skylink_wire::wire::*;

fn header_strategy() -> impl Strategy<Value = PacketHeader> {
    (0u8..7, any::<u8>(), 0u8..8, any::<u32>(), any::<u32>(), any::<u32>(), any::<bool>()).prop_map(
        |(module, ptype, stream, seq, src, dst, retx)| {
            let module = Module::from_bits(module).unwrap();
            let mut h = PacketHeader::new(module, ptype, src, dst)
                .with_stream(stream)
                .with_sequence(seq);
            h.retransmitted = retx;
            h
        },
    )
}

// ─── Hostile Input ──────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn parse_never_panics(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
        if let Ok(v) = parse_and_validate(&data) {
            prop_assert!(v.packet_length >= HEADER_LEN);
            prop_assert!(v.packet_length <= data.len());
        }
        let _ = try_reconstruct(&data, ReconstructKind::ZeroSourceId);
    }

    #[test]
    fn chain_iter_never_overruns(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let mut consumed = 0usize;
        for item in ChainIter::new(Bytes::from(data.clone())) {
            match item {
                Ok(item) => consumed += item.packet.raw.len(),
                Err(_) => break,
            }
        }
        prop_assert!(consumed <= data.len());
    }
}

// ─── Build / Chain ──────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn built_packet_validates(
        header in header_strategy(),
        payload in proptest::collection::vec(any::<u8>(), 0..MAX_PACKET_PAYLOAD),
    ) {
        let pkt = build(&header, &payload, None).unwrap();
        let v = parse_and_validate(&pkt).unwrap();
        prop_assert!(v.crc_ok);
        prop_assert_eq!(v.packet_length, HEADER_LEN + payload.len());

        let decoded = PacketHeader::decode(&mut pkt.freeze()).unwrap();
        prop_assert_eq!(decoded.stream_id, header.stream_id);
        prop_assert_eq!(decoded.sequence, header.sequence);
        prop_assert_eq!(decoded.vehicle_id_src, header.vehicle_id_src);
    }

    #[test]
    fn chained_lengths_sum_to_buffer(
        sizes in proptest::collection::vec(0usize..200, 1..8),
    ) {
        let mut buf = BytesMut::new();
        for (i, size) in sizes.iter().enumerate() {
            let header = PacketHeader::new(Module::Telemetry, packet_type::FC_TELEMETRY, 5, 1)
                .with_sequence(i as u32);
            buf.extend_from_slice(&build(&header, &vec![i as u8; *size], None).unwrap());
        }
        let total = buf.len();
        let items: Vec<_> = ChainIter::new(buf.freeze()).map(|r| r.unwrap()).collect();
        prop_assert_eq!(items.len(), sizes.len());
        let sum: usize = items.iter().map(|i| i.packet.raw.len()).sum();
        prop_assert_eq!(sum, total);
        for (i, item) in items.iter().enumerate() {
            prop_assert!(item.crc_ok);
            prop_assert_eq!(item.packet.sequence(), i as u32);
        }
    }

    #[test]
    fn short_framing_reassembles(payload_len in 0usize..MAX_PACKET_PAYLOAD, first_id in any::<u8>()) {
        let header = PacketHeader::new(Module::Commands, packet_type::COMMAND, 3, 1);
        let pkt = build(&header, &vec![0x5A; payload_len], None).unwrap().freeze();
        let mut id = first_id;
        let mut scanner = SerialScanner::new();
        for part in split_into_short_packets(&pkt, &mut id) {
            scanner.push(&part);
        }
        let mut acc = ShortPacketAccumulator::new();
        let mut out = Vec::new();
        while let Some((h, data)) = scanner.next_packet() {
            out.extend(acc.push(h, &data));
        }
        prop_assert_eq!(out.len(), 1);
        prop_assert_eq!(&out[0].0, &pkt);
    }
}

// ─── Sequencing ─────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn sequences_strictly_increase_per_stream(streams in proptest::collection::vec(0u8..8, 1..500)) {
        let mut mux = StreamMultiplexer::new();
        let mut last: [Option<u32>; 8] = [None; 8];
        for s in streams {
            let seq = mux.next_sequence(s);
            if let Some(prev) = last[s as usize] {
                prop_assert!(seq > prev);
            }
            last[s as usize] = Some(seq);
        }
    }

    #[test]
    fn chain_preserves_order_and_ceiling(
        sizes in proptest::collection::vec(0usize..400, 1..20),
        ceiling in 300usize..1500,
    ) {
        let mut mux = StreamMultiplexer::new();
        let packets: Vec<Bytes> = sizes
            .iter()
            .map(|size| {
                let header = PacketHeader::new(Module::Video, packet_type::VIDEO_DATA, 1, 2)
                    .with_stream(STREAM_ID_VIDEO_1);
                let mut p = build(&header, &vec![0u8; *size], None).unwrap();
                mux.stamp(&mut p).unwrap();
                p.freeze()
            })
            .collect();
        let frames = mux.chain(packets.clone(), ceiling);

        let mut seqs = Vec::new();
        for frame in &frames {
            let items: Vec<_> = ChainIter::new(frame.clone()).map(|r| r.unwrap()).collect();
            if items.len() > 1 {
                prop_assert!(frame.len() <= ceiling);
            }
            seqs.extend(items.iter().map(|i| i.packet.sequence()));
        }
        let expected: Vec<u32> = (0..sizes.len() as u32).collect();
        prop_assert_eq!(seqs, expected);
    }
}
