#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use skylink_wire::wire::{parse_and_validate, try_reconstruct, ChainIter, PacketHeader, ReconstructKind};

/// Radio buffers come straight off the air. Validation, chain walking and
/// reconstruction must return errors for garbage, never panic or read past
/// the buffer.
fuzz_target!(|data: &[u8]| {
    if let Ok(v) = parse_and_validate(data) {
        assert!(v.packet_length <= data.len());
        if let Ok(header) = PacketHeader::decode(&mut &data[..]) {
            assert_eq!(header.total_length as usize, v.packet_length);
        }
    }

    let _ = try_reconstruct(data, ReconstructKind::ZeroSourceId);

    let mut consumed = 0usize;
    for item in ChainIter::new(Bytes::copy_from_slice(data)) {
        match item {
            Ok(item) => consumed += item.packet.raw.len(),
            Err(_) => break,
        }
    }
    assert!(consumed <= data.len());
});
