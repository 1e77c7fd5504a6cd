//! # Stream Multiplexer
//!
//! Issues per-stream sequence numbers and chains logical packets into radio
//! frames.
//!
//! Sequence numbers are strictly increasing per stream and only wrap at the
//! 28-bit width of the header's sequence field. Ping traffic never consumes a sequence number.
//! Chaining preserves submission order and never splits a packet.

use bytes::{Bytes, BytesMut};

use crate::error::FrameError;
use crate::wire::{self, packet_type, stream_slot, MAX_PACKET_TOTAL_SIZE, MAX_RADIO_STREAMS, STREAM_SEQUENCE_MASK};

/// Per-stream sequence counters for one sender.
#[derive(Debug, Clone)]
pub struct StreamMultiplexer {
    next: [u32; MAX_RADIO_STREAMS],
    issued: [bool; MAX_RADIO_STREAMS],
    /// Total frames emitted by [`chain`](Self::chain).
    pub frames_emitted: u64,
}

impl Default for StreamMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamMultiplexer {
    pub fn new() -> Self {
        StreamMultiplexer {
            next: [0; MAX_RADIO_STREAMS],
            issued: [false; MAX_RADIO_STREAMS],
            frames_emitted: 0,
        }
    }

    /// Issue the next sequence number for `stream_id`.
    pub fn next_sequence(&mut self, stream_id: u8) -> u32 {
        let slot = stream_slot(stream_id);
        let seq = self.next[slot];
        self.next[slot] = seq.wrapping_add(1) & STREAM_SEQUENCE_MASK;
        self.issued[slot] = true;
        seq
    }

    /// Last issued sequence for a stream, if any.
    pub fn last_sequence(&self, stream_id: u8) -> Option<u32> {
        let slot = stream_slot(stream_id);
        self.issued[slot].then(|| self.next[slot].wrapping_sub(1) & STREAM_SEQUENCE_MASK)
    }

    /// Assign a sequence to a sealed packet, restamping its header and CRC.
    ///
    /// Ping and ping-reply packets pass through with their sequence untouched.
    pub fn stamp(&mut self, packet: &mut BytesMut) -> Result<Option<u32>, FrameError> {
        wire::parse_and_validate(packet)?;
        let ptype = packet[5];
        if packet_type::is_ping(ptype) {
            return Ok(None);
        }
        let stream_id = (u32::from_le_bytes([packet[6], packet[7], packet[8], packet[9]])
            >> wire::STREAM_INDEX_SHIFT) as u8;
        let seq = self.next_sequence(stream_id);
        wire::restamp_sequence(packet, stream_id, seq)?;
        Ok(Some(seq))
    }

    /// Concatenate packets into frames no larger than `ceiling` bytes.
    ///
    /// A packet that would push the running frame past the ceiling starts a
    /// new frame. A single packet larger than the ceiling is sent alone.
    pub fn chain<I>(&mut self, packets: I, ceiling: usize) -> Vec<Bytes>
    where
        I: IntoIterator<Item = Bytes>,
    {
        let ceiling = ceiling.min(MAX_PACKET_TOTAL_SIZE);
        let mut frames = Vec::new();
        let mut current = BytesMut::with_capacity(ceiling);

        for packet in packets {
            if !current.is_empty() && current.len() + packet.len() > ceiling {
                frames.push(current.split().freeze());
            }
            current.extend_from_slice(&packet);
        }
        if !current.is_empty() {
            frames.push(current.freeze());
        }
        self.frames_emitted += frames.len() as u64;
        frames
    }
}
