//! # Short-Form Framing
//!
//! Narrow-band serial radios (SiK modems) carry at most a few hundred bytes per
//! write and deliver a raw byte stream. Full packets are cut into chunks, each
//! behind a 5-byte short header:
//!
//! ```text
//! +------+-----------+-------------+------------------+
//! | 0xF5 | packet_id | data_length | check (u16 LE)   |  data ...
//! +------+-----------+-------------+------------------+
//! ```
//!
//! `check` is the low 16 bits of CRC-32 over the first three bytes.
//!
//! Receive side is two-phase: [`SerialScanner`] locates structurally valid
//! short headers in the byte stream, then [`ShortPacketAccumulator`] rebuilds
//! full packets and validates them with [`crate::wire::parse_and_validate`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::wire::{self, HEADER_LEN, MAX_PACKET_TOTAL_SIZE};

pub const SHORT_HEADER_LEN: usize = 5;
pub const SHORT_START_MARKER: u8 = 0xF5;
pub const MAX_SHORT_DATA: usize = 250;

/// Scanner gives up on a garbage run after this many bytes...
const SCAN_GIVE_UP: usize = 400;
/// ...and keeps only this many trailing bytes.
const SCAN_KEEP: usize = 256;

// ─── Short Header ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortHeader {
    pub packet_id: u8,
    pub data_length: u8,
}

impl ShortHeader {
    fn check(packet_id: u8, data_length: u8) -> u16 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[SHORT_START_MARKER, packet_id, data_length]);
        (hasher.finalize() & 0xFFFF) as u16
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(SHORT_START_MARKER);
        buf.put_u8(self.packet_id);
        buf.put_u8(self.data_length);
        buf.put_u16_le(Self::check(self.packet_id, self.data_length));
    }

    /// Decode and verify a short header.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, FrameError> {
        if buf.remaining() < SHORT_HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: SHORT_HEADER_LEN,
                available: buf.remaining(),
            });
        }
        let marker = buf.get_u8();
        let packet_id = buf.get_u8();
        let data_length = buf.get_u8();
        let check = buf.get_u16_le();
        if marker != SHORT_START_MARKER
            || data_length == 0
            || data_length as usize > MAX_SHORT_DATA
            || check != Self::check(packet_id, data_length)
        {
            return Err(FrameError::BadShortHeader);
        }
        Ok(ShortHeader {
            packet_id,
            data_length,
        })
    }
}

/// Cut a full packet (or chained frame) into short packets, numbering them
/// from `next_id` (which is advanced).
pub fn split_into_short_packets(frame: &[u8], next_id: &mut u8) -> Vec<Bytes> {
    frame
        .chunks(MAX_SHORT_DATA)
        .map(|chunk| {
            let mut buf = BytesMut::with_capacity(SHORT_HEADER_LEN + chunk.len());
            ShortHeader {
                packet_id: *next_id,
                data_length: chunk.len() as u8,
            }
            .encode(&mut buf);
            buf.put_slice(chunk);
            *next_id = next_id.wrapping_add(1);
            buf.freeze()
        })
        .collect()
}

// ─── Serial Scanner ─────────────────────────────────────────────────────────

/// Finds short packets in a serial byte stream, discarding garbage.
#[derive(Debug, Default)]
pub struct SerialScanner {
    buf: BytesMut,
    /// Bytes dropped while hunting for a header.
    pub discarded: u64,
}

impl SerialScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw serial bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete short packet (header and data).
    pub fn next_packet(&mut self) -> Option<(ShortHeader, Bytes)> {
        loop {
            let start = match self.buf.iter().position(|&b| b == SHORT_START_MARKER) {
                Some(pos) => pos,
                None => {
                    self.trim_garbage();
                    return None;
                }
            };
            if start > 0 {
                self.discard(start);
            }
            if self.buf.len() < SHORT_HEADER_LEN {
                return None;
            }
            match ShortHeader::decode(&mut &self.buf[..SHORT_HEADER_LEN]) {
                Ok(header) => {
                    let full = SHORT_HEADER_LEN + header.data_length as usize;
                    if self.buf.len() < full {
                        self.trim_garbage();
                        return None;
                    }
                    let mut packet = self.buf.split_to(full);
                    packet.advance(SHORT_HEADER_LEN);
                    return Some((header, packet.freeze()));
                }
                Err(_) => {
                    // False marker; step over it and keep hunting.
                    self.discard(1);
                }
            }
        }
    }

    fn discard(&mut self, n: usize) {
        self.buf.advance(n);
        self.discarded += n as u64;
    }

    fn trim_garbage(&mut self) {
        if self.buf.len() >= SCAN_GIVE_UP {
            let drop = self.buf.len() - SCAN_KEEP;
            self.discard(drop);
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

// ─── Accumulator ────────────────────────────────────────────────────────────

/// Rebuilds full packets from consecutive short packets.
#[derive(Debug)]
pub struct ShortPacketAccumulator {
    buf: BytesMut,
    last_id: Option<u8>,
    /// Resets caused by an id gap or overflow.
    pub resets: u64,
}

impl Default for ShortPacketAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShortPacketAccumulator {
    const CAPACITY: usize = 2 * MAX_PACKET_TOTAL_SIZE;

    pub fn new() -> Self {
        ShortPacketAccumulator {
            buf: BytesMut::with_capacity(Self::CAPACITY),
            last_id: None,
            resets: 0,
        }
    }

    fn reset(&mut self) {
        if !self.buf.is_empty() {
            self.resets += 1;
            tracing::debug!(discarded = self.buf.len(), "short packet reassembly reset");
        }
        self.buf.clear();
    }

    /// Add one short packet; returns every full packet now complete.
    ///
    /// Each returned buffer passed [`wire::parse_and_validate`] structurally;
    /// the CRC verdict travels with it.
    pub fn push(&mut self, header: ShortHeader, data: &[u8]) -> Vec<(Bytes, bool)> {
        if let Some(last) = self.last_id {
            if header.packet_id != last.wrapping_add(1) {
                self.reset();
            }
        }
        self.last_id = Some(header.packet_id);

        if self.buf.len() + data.len() > Self::CAPACITY {
            self.reset();
        }
        self.buf.extend_from_slice(data);

        let mut out = Vec::new();
        while self.buf.len() >= HEADER_LEN {
            match wire::parse_and_validate(&self.buf) {
                Ok(v) => {
                    let packet = self.buf.split_to(v.packet_length).freeze();
                    out.push((packet, v.crc_ok));
                }
                Err(FrameError::ExceedsBuffer { .. }) => break,
                Err(_) => {
                    self.reset();
                    break;
                }
            }
        }
        out
    }
}
