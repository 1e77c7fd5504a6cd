#![no_main]

use libfuzzer_sys::fuzz_target;
use skylink_wire::short::{SerialScanner, ShortPacketAccumulator};

/// Serial radios deliver an unframed byte stream in arbitrary chunks. The
/// scanner must resynchronise on garbage and the accumulator must never
/// emit more bytes than it was fed.
fuzz_target!(|data: &[u8]| {
    let mut scanner = SerialScanner::new();
    let mut acc = ShortPacketAccumulator::new();
    let mut emitted = 0usize;

    for chunk in data.chunks(17) {
        scanner.push(chunk);
        while let Some((header, payload)) = scanner.next_packet() {
            for (packet, _crc_ok) in acc.push(header, &payload) {
                emitted += packet.len();
            }
        }
    }
    assert!(emitted <= data.len());
});
