//! # SkyLink Wire Format
//!
//! Fixed 24-byte packet header shared by every module on the radio link.
//! All multi-byte fields are little-endian.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +---------------+---------------+---------------+---------------+
//! |                 CRC-32 (low 24 bits significant)              |
//! +---------------+---------------+-------------------------------+
//! | Flags (MMM..) |  Packet Type  |  Stream (4) | Sequence (28) ...
//! +---------------+---------------+-------------------------------+
//!  ... Sequence   | Header Length (16)            | Total Length ...
//! +-------------------------------+-------------------------------+
//!  ... Total Len  | Radio Link Packet Index (16)  | Source VID ...
//! +-------------------------------+-------------------------------+
//!  ... Source VID                 | Destination VID ...
//! +-------------------------------+-------------------------------+
//!  ... Destination VID            |
//! +-------------------------------+
//! ```
//!
//! A radio buffer may carry several packets back to back ("chained"); each
//! packet's `total_length` includes its own header, so the lengths sum to the
//! buffer length.
//!
//! When the extra-data flag is set the packet ends with a trailer
//! `[payload .. | type | size]` where `size` counts the payload plus the two
//! trailer bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Size of the fixed packet header.
pub const HEADER_LEN: usize = 24;

/// Largest packet (or chained frame) that fits in one radio write.
pub const MAX_PACKET_TOTAL_SIZE: usize = 1500;

/// Largest application payload carried by a single packet.
pub const MAX_PACKET_PAYLOAD: usize = 1250;

/// Destination id meaning "every vehicle".
pub const BROADCAST_VEHICLE_ID: u32 = 1_111_111_111;

/// Number of logical streams addressable by the 4-bit stream field.
pub const MAX_RADIO_STREAMS: usize = 8;

pub const STREAM_INDEX_SHIFT: u32 = 28;
pub const STREAM_SEQUENCE_MASK: u32 = 0x0FFF_FFFF;

/// Counter slot for a stream id. Ids past the addressable range share slot 0.
pub fn stream_slot(stream_id: u8) -> usize {
    let slot = stream_id as usize;
    if slot < MAX_RADIO_STREAMS {
        slot
    } else {
        0
    }
}

/// Extra data plus its kind and length bytes must fit the one-byte length.
pub const MAX_EXTRA_DATA: usize = u8::MAX as usize - 2;

/// Only the low 24 bits of the CRC word are compared; the high byte is zero.
pub const CRC_MASK: u32 = 0x00FF_FFFF;

pub const STREAM_ID_DATA: u8 = 0;
pub const STREAM_ID_TELEMETRY: u8 = 1;
pub const STREAM_ID_AUDIO: u8 = 2;
pub const STREAM_ID_DATA2: u8 = 3;
pub const STREAM_ID_VIDEO_1: u8 = 4;

const FLAG_MODULE_MASK: u8 = 0b0000_0111;
const FLAG_HEADERS_ONLY_CRC: u8 = 1 << 3;
const FLAG_RETRANSMITTED: u8 = 1 << 4;
const FLAG_EXTRA_DATA: u8 = 1 << 5;
const FLAG_ENCRYPTED: u8 = 1 << 6;
const FLAG_CAN_START_TX: u8 = 1 << 7;

const OFFSET_SOURCE_ID: usize = 16;

/// Packet type codes. Each module owns a subset; the code space is flat.
pub mod packet_type {
    pub const PING_CLOCK: u8 = 3;
    pub const PING_CLOCK_REPLY: u8 = 4;
    pub const RADIO_REINITIALIZED: u8 = 5;
    pub const MODEL_SETTINGS: u8 = 6;
    pub const PAIRING_REQUEST: u8 = 7;
    pub const PAIRING_CONFIRMATION: u8 = 8;
    pub const RADIO_CONFIG_UPDATED: u8 = 9;
    pub const COMMAND: u8 = 11;
    pub const COMMAND_RESPONSE: u8 = 12;
    pub const LOG_FILE_SEGMENT: u8 = 13;
    pub const ALARM: u8 = 15;
    pub const FIRST_PAIRING_DONE: u8 = 16;
    pub const AUDIO_SEGMENT: u8 = 18;
    pub const VIDEO_REQ_MULTIPLE_PACKETS: u8 = 20;
    pub const VIDEO_ACK: u8 = 21;
    pub const VIDEO_DATA: u8 = 22;
    pub const RC_FULL_FRAME: u8 = 25;
    pub const RC_DOWNLOAD_INFO: u8 = 26;
    pub const EVENT: u8 = 27;
    pub const RUBY_TELEMETRY_SHORT: u8 = 29;
    pub const RUBY_TELEMETRY_EXTENDED: u8 = 30;
    pub const FC_TELEMETRY: u8 = 31;
    pub const FC_TELEMETRY_EXTENDED: u8 = 32;
    pub const RC_TELEMETRY: u8 = 33;

    /// Ping traffic carries no stream sequence and bypasses duplicate checks.
    pub fn is_ping(t: u8) -> bool {
        t == PING_CLOCK || t == PING_CLOCK_REPLY
    }

    /// Telemetry that identifies a vehicle; forwarded from any source.
    pub fn is_identity_telemetry(t: u8) -> bool {
        matches!(
            t,
            RUBY_TELEMETRY_SHORT | RUBY_TELEMETRY_EXTENDED | FC_TELEMETRY | FC_TELEMETRY_EXTENDED
        )
    }

    pub fn is_ruby_telemetry(t: u8) -> bool {
        t == RUBY_TELEMETRY_SHORT || t == RUBY_TELEMETRY_EXTENDED
    }
}

// ─── Module Tag ──────────────────────────────────────────────────────────────

/// Logical component that produced (and consumes) a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Module {
    LocalControl = 0,
    Video = 1,
    Telemetry = 2,
    Commands = 3,
    Rc = 4,
    Ruby = 5,
    Audio = 6,
}

impl Module {
    pub fn from_bits(bits: u8) -> Result<Self, FrameError> {
        match bits & FLAG_MODULE_MASK {
            0 => Ok(Module::LocalControl),
            1 => Ok(Module::Video),
            2 => Ok(Module::Telemetry),
            3 => Ok(Module::Commands),
            4 => Ok(Module::Rc),
            5 => Ok(Module::Ruby),
            6 => Ok(Module::Audio),
            other => Err(FrameError::UnknownModule(other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Module::LocalControl => "local-control",
            Module::Video => "video",
            Module::Telemetry => "telemetry",
            Module::Commands => "commands",
            Module::Rc => "rc",
            Module::Ruby => "ruby",
            Module::Audio => "audio",
        }
    }
}

// ─── Packet Header ──────────────────────────────────────────────────────────

/// Decoded packet header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    /// CRC word as found on the wire (zero until the packet is sealed).
    pub crc: u32,
    pub module: Module,
    pub packet_type: u8,
    /// CRC covers the header only (payload is opaque, e.g. encrypted).
    pub headers_only_crc: bool,
    pub retransmitted: bool,
    pub extra_data: bool,
    pub encrypted: bool,
    pub can_start_tx: bool,
    /// Stream index (high 4 bits of the combined field).
    pub stream_id: u8,
    /// 28-bit per-stream sequence number.
    pub sequence: u32,
    pub header_length: u16,
    pub total_length: u16,
    pub radio_link_packet_index: u16,
    pub vehicle_id_src: u32,
    pub vehicle_id_dest: u32,
}

impl PacketHeader {
    /// Header for a new packet; lengths and CRC are filled in by [`build`].
    pub fn new(module: Module, packet_type: u8, vehicle_id_src: u32, vehicle_id_dest: u32) -> Self {
        PacketHeader {
            crc: 0,
            module,
            packet_type,
            headers_only_crc: false,
            retransmitted: false,
            extra_data: false,
            encrypted: false,
            can_start_tx: false,
            stream_id: STREAM_ID_DATA,
            sequence: 0,
            header_length: HEADER_LEN as u16,
            total_length: HEADER_LEN as u16,
            radio_link_packet_index: 0,
            vehicle_id_src,
            vehicle_id_dest,
        }
    }

    pub fn with_stream(mut self, stream_id: u8) -> Self {
        self.stream_id = stream_id;
        self
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence & STREAM_SEQUENCE_MASK;
        self
    }

    pub fn retransmission(mut self) -> Self {
        self.retransmitted = true;
        self
    }

    fn flags_byte(&self) -> u8 {
        let mut flags = self.module as u8 & FLAG_MODULE_MASK;
        if self.headers_only_crc {
            flags |= FLAG_HEADERS_ONLY_CRC;
        }
        if self.retransmitted {
            flags |= FLAG_RETRANSMITTED;
        }
        if self.extra_data {
            flags |= FLAG_EXTRA_DATA;
        }
        if self.encrypted {
            flags |= FLAG_ENCRYPTED;
        }
        if self.can_start_tx {
            flags |= FLAG_CAN_START_TX;
        }
        flags
    }

    /// Combined stream-index/sequence word as it appears on the wire.
    pub fn stream_packet_idx(&self) -> u32 {
        ((self.stream_id as u32) << STREAM_INDEX_SHIFT) | (self.sequence & STREAM_SEQUENCE_MASK)
    }

    /// True for video streams (`STREAM_ID_VIDEO_1` and above).
    pub fn is_video_stream(&self) -> bool {
        self.stream_id >= STREAM_ID_VIDEO_1
    }

    /// Encode the header into a buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.crc);
        buf.put_u8(self.flags_byte());
        buf.put_u8(self.packet_type);
        buf.put_u32_le(self.stream_packet_idx());
        buf.put_u16_le(self.header_length);
        buf.put_u16_le(self.total_length);
        buf.put_u16_le(self.radio_link_packet_index);
        buf.put_u32_le(self.vehicle_id_src);
        buf.put_u32_le(self.vehicle_id_dest);
    }

    /// Decode a header from a buffer. Structure only; lengths and CRC are
    /// checked by [`parse_and_validate`].
    pub fn decode(buf: &mut impl Buf) -> Result<Self, FrameError> {
        if buf.remaining() < HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: HEADER_LEN,
                available: buf.remaining(),
            });
        }
        let crc = buf.get_u32_le();
        let flags = buf.get_u8();
        let module = Module::from_bits(flags)?;
        let packet_type = buf.get_u8();
        let idx = buf.get_u32_le();
        let header_length = buf.get_u16_le();
        let total_length = buf.get_u16_le();
        let radio_link_packet_index = buf.get_u16_le();
        let vehicle_id_src = buf.get_u32_le();
        let vehicle_id_dest = buf.get_u32_le();

        Ok(PacketHeader {
            crc,
            module,
            packet_type,
            headers_only_crc: flags & FLAG_HEADERS_ONLY_CRC != 0,
            retransmitted: flags & FLAG_RETRANSMITTED != 0,
            extra_data: flags & FLAG_EXTRA_DATA != 0,
            encrypted: flags & FLAG_ENCRYPTED != 0,
            can_start_tx: flags & FLAG_CAN_START_TX != 0,
            stream_id: (idx >> STREAM_INDEX_SHIFT) as u8,
            sequence: idx & STREAM_SEQUENCE_MASK,
            header_length,
            total_length,
            radio_link_packet_index,
            vehicle_id_src,
            vehicle_id_dest,
        })
    }
}

// ─── Validation ─────────────────────────────────────────────────────────────

/// Outcome of structurally parsing one packet at the start of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validated {
    /// Declared `total_length`, already checked against the buffer bound.
    pub packet_length: usize,
    /// Whether the embedded CRC matched.
    pub crc_ok: bool,
}

/// Read the length fields of the packet at the start of `buf` and check them
/// against the buffer bound and against each other.
fn checked_lengths(buf: &[u8]) -> Result<(usize, usize), FrameError> {
    if buf.len() < HEADER_LEN {
        return Err(FrameError::Truncated {
            needed: HEADER_LEN,
            available: buf.len(),
        });
    }
    let header = u16::from_le_bytes([buf[10], buf[11]]) as usize;
    let total = u16::from_le_bytes([buf[12], buf[13]]) as usize;
    if total < HEADER_LEN {
        return Err(FrameError::LengthBelowHeader {
            total,
            min: HEADER_LEN,
        });
    }
    if header < HEADER_LEN || header > total {
        return Err(FrameError::BadHeaderLength { header, total });
    }
    if total > buf.len() {
        return Err(FrameError::ExceedsBuffer {
            total,
            available: buf.len(),
        });
    }
    Ok((header, total))
}

fn crc_over(covered: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(covered);
    hasher.finalize() & CRC_MASK
}

/// CRC of a packet whose lengths have already been checked.
fn packet_crc(packet: &[u8], header_len: usize, total_len: usize) -> u32 {
    let headers_only = packet[4] & FLAG_HEADERS_ONLY_CRC != 0;
    let end = if headers_only { header_len } else { total_len };
    crc_over(&packet[4..end])
}

fn embedded_crc(packet: &[u8]) -> u32 {
    u32::from_le_bytes([packet[0], packet[1], packet[2], packet[3]]) & CRC_MASK
}

/// Parse and validate the packet at the start of `buf`.
///
/// Length fields are read first and never trusted beyond `buf.len()`. A CRC
/// mismatch is reported through [`Validated::crc_ok`] with the length intact,
/// so callers can still step over the packet in a chained buffer.
pub fn parse_and_validate(buf: &[u8]) -> Result<Validated, FrameError> {
    let (header_len, total_len) = checked_lengths(buf)?;
    let crc_ok = packet_crc(buf, header_len, total_len) == embedded_crc(buf);
    Ok(Validated {
        packet_length: total_len,
        crc_ok,
    })
}

/// Known corruption patterns that can be repaired after a CRC failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructKind {
    /// The sender sealed the packet before stamping its source vehicle id;
    /// the CRC matches once that field is zero-filled.
    ZeroSourceId,
}

/// Retry CRC validation under a specific corruption hypothesis.
///
/// Returns `Some` only when the packet at the start of `buf` validates once
/// the hypothesis is applied. See [`reconstruct_packet`] for the repaired
/// packet itself.
pub fn try_reconstruct(buf: &[u8], kind: ReconstructKind) -> Option<Validated> {
    let (header_len, total_len) = checked_lengths(buf).ok()?;
    match kind {
        ReconstructKind::ZeroSourceId => {
            let mut copy = buf[..total_len].to_vec();
            copy[OFFSET_SOURCE_ID..OFFSET_SOURCE_ID + 4].fill(0);
            let crc_ok = packet_crc(&copy, header_len, total_len) == embedded_crc(&copy);
            crc_ok.then_some(Validated {
                packet_length: total_len,
                crc_ok: true,
            })
        }
    }
}

/// Apply a reconstruction to a parsed packet, returning the repaired copy
/// whose header and bytes both carry the hypothesis (a zero source id).
pub fn reconstruct_packet(packet: &Packet, kind: ReconstructKind) -> Option<Packet> {
    try_reconstruct(&packet.raw, kind)?;
    match kind {
        ReconstructKind::ZeroSourceId => {
            let mut raw = BytesMut::from(&packet.raw[..]);
            raw[OFFSET_SOURCE_ID..OFFSET_SOURCE_ID + 4].fill(0);
            let mut header = packet.header.clone();
            header.vehicle_id_src = 0;
            Some(Packet {
                header,
                raw: raw.freeze(),
            })
        }
    }
}

/// Recompute and embed the CRC of a complete packet, e.g. after the
/// multiplexer restamps its sequence field.
pub fn seal(packet: &mut [u8]) -> Result<(), FrameError> {
    let (header_len, total_len) = checked_lengths(packet)?;
    let crc = packet_crc(packet, header_len, total_len);
    packet[0..4].copy_from_slice(&crc.to_le_bytes());
    Ok(())
}

/// Rewrite the stream/sequence word of a complete packet and reseal it.
pub fn restamp_sequence(packet: &mut [u8], stream_id: u8, sequence: u32) -> Result<(), FrameError> {
    checked_lengths(packet)?;
    let idx = ((stream_id as u32) << STREAM_INDEX_SHIFT) | (sequence & STREAM_SEQUENCE_MASK);
    packet[6..10].copy_from_slice(&idx.to_le_bytes());
    seal(packet)
}

// ─── Build ──────────────────────────────────────────────────────────────────

/// Build a complete packet: header, payload, optional extra-data trailer.
/// Length fields are populated from the actual content and the CRC is
/// embedded last.
pub fn build(
    header: &PacketHeader,
    payload: &[u8],
    extra: Option<&ExtraData>,
) -> Result<BytesMut, FrameError> {
    if let Some(extra) = extra.filter(|e| e.data.len() > MAX_EXTRA_DATA) {
        return Err(FrameError::ExtraDataTooLong {
            len: extra.data.len(),
            max: MAX_EXTRA_DATA,
        });
    }
    let trailer_len = extra.map_or(0, |e| e.data.len() + 2);
    let total = HEADER_LEN + payload.len() + trailer_len;
    if total > MAX_PACKET_TOTAL_SIZE {
        return Err(FrameError::Oversized {
            len: total,
            max: MAX_PACKET_TOTAL_SIZE,
        });
    }

    let mut header = header.clone();
    header.crc = 0;
    header.header_length = HEADER_LEN as u16;
    header.total_length = total as u16;
    header.extra_data = extra.is_some();

    let mut buf = BytesMut::with_capacity(total);
    header.encode(&mut buf);
    buf.put_slice(payload);
    if let Some(extra) = extra {
        buf.put_slice(&extra.data);
        buf.put_u8(extra.kind);
        buf.put_u8((extra.data.len() + 2) as u8);
    }
    seal(&mut buf)?;
    Ok(buf)
}

// ─── Parsed Packet ──────────────────────────────────────────────────────────

/// A complete packet split out of a radio buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    /// The whole packet, header included.
    pub raw: Bytes,
}

impl Packet {
    /// Payload bytes between the header and the extra-data trailer (if any).
    pub fn payload(&self) -> Bytes {
        let start = self.header.header_length as usize;
        let end = match self.extra() {
            Ok(Some(extra)) => self.raw.len() - extra.data.len() - 2,
            _ => self.raw.len(),
        };
        self.raw.slice(start..end.max(start))
    }

    /// The extra-data trailer, when the flag is set.
    pub fn extra(&self) -> Result<Option<ExtraData>, FrameError> {
        if !self.header.extra_data {
            return Ok(None);
        }
        parse_extra_data(&self.raw, self.header.header_length as usize).map(Some)
    }

    pub fn stream_id(&self) -> u8 {
        self.header.stream_id
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }
}

/// One item yielded by [`ChainIter`].
#[derive(Debug, Clone)]
pub struct ChainItem {
    pub packet: Packet,
    pub crc_ok: bool,
}

/// Iterator over the chained packets of a radio buffer.
///
/// Stops after the first structural error (the remaining bytes cannot be
/// delimited). CRC failures are yielded so callers can count them and move on.
pub struct ChainIter {
    buf: Bytes,
    failed: bool,
}

impl ChainIter {
    pub fn new(buf: Bytes) -> Self {
        ChainIter { buf, failed: false }
    }
}

impl Iterator for ChainIter {
    type Item = Result<ChainItem, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }
        let validated = match parse_and_validate(&self.buf) {
            Ok(v) => v,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };
        let raw = self.buf.split_to(validated.packet_length);
        let header = match PacketHeader::decode(&mut raw.clone()) {
            Ok(h) => h,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };
        Some(Ok(ChainItem {
            packet: Packet { header, raw },
            crc_ok: validated.crc_ok,
        }))
    }
}

// ─── Extra-Data Trailer ─────────────────────────────────────────────────────

/// Extra-data trailer kind for a pending frequency change; the link index is
/// added to this base.
pub const EXTRA_DATA_FREQUENCY_CHANGE: u8 = 0x10;

/// Out-of-band data appended after the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraData {
    pub kind: u8,
    pub data: Bytes,
}

fn parse_extra_data(packet: &[u8], header_len: usize) -> Result<ExtraData, FrameError> {
    let len = packet.len();
    if len < header_len + 2 {
        return Err(FrameError::BadTrailer);
    }
    let size = packet[len - 1] as usize;
    let kind = packet[len - 2];
    if size < 2 || len < header_len + size {
        return Err(FrameError::BadTrailer);
    }
    let start = len - size;
    Ok(ExtraData {
        kind,
        data: Bytes::copy_from_slice(&packet[start..len - 2]),
    })
}

/// Notification that a radio link is about to move to a new frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyChange {
    pub link_index: u8,
    pub frequency_khz: u32,
}

impl FrequencyChange {
    pub fn to_extra(&self) -> ExtraData {
        ExtraData {
            kind: EXTRA_DATA_FREQUENCY_CHANGE.wrapping_add(self.link_index),
            data: Bytes::copy_from_slice(&self.frequency_khz.to_le_bytes()),
        }
    }

    pub fn from_extra(extra: &ExtraData) -> Option<Self> {
        let link_index = extra.kind.checked_sub(EXTRA_DATA_FREQUENCY_CHANGE)?;
        if link_index >= 0x10 || extra.data.len() < 4 {
            return None;
        }
        let mut data = extra.data.clone();
        Some(FrequencyChange {
            link_index,
            frequency_khz: data.get_u32_le(),
        })
    }
}

// ─── Packet Bodies ──────────────────────────────────────────────────────────

/// Body of a `PING_CLOCK_REPLY`. `radio_link_id` pins the reply to the link
/// the ping arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingReply {
    pub ping_id: u8,
    pub flags: u8,
    pub local_time_ms: u32,
    pub radio_link_id: u8,
}

impl PingReply {
    pub const ENCODED_LEN: usize = 7;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ping_id);
        buf.put_u8(self.flags);
        buf.put_u32_le(self.local_time_ms);
        buf.put_u8(self.radio_link_id);
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::ENCODED_LEN {
            return None;
        }
        Some(PingReply {
            ping_id: buf.get_u8(),
            flags: buf.get_u8(),
            local_time_ms: buf.get_u32_le(),
            radio_link_id: buf.get_u8(),
        })
    }
}

/// Prefix of a `COMMAND_RESPONSE` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandResponseHeader {
    pub origin_command_type: u16,
    pub origin_command_counter: u32,
}

impl CommandResponseHeader {
    pub const ENCODED_LEN: usize = 6;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.origin_command_type);
        buf.put_u32_le(self.origin_command_counter);
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::ENCODED_LEN {
            return None;
        }
        Some(CommandResponseHeader {
            origin_command_type: buf.get_u16_le(),
            origin_command_counter: buf.get_u32_le(),
        })
    }
}

/// Body of an `ALARM` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmBody {
    pub alarm_id: u32,
    pub flags1: u32,
    pub flags2: u32,
    /// Occurrences folded into this alarm (1 = just this one).
    pub repeat_count: u32,
}

impl AlarmBody {
    pub const ENCODED_LEN: usize = 16;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.alarm_id);
        buf.put_u32_le(self.flags1);
        buf.put_u32_le(self.flags2);
        buf.put_u32_le(self.repeat_count);
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::ENCODED_LEN {
            return None;
        }
        Some(AlarmBody {
            alarm_id: buf.get_u32_le(),
            flags1: buf.get_u32_le(),
            flags2: buf.get_u32_le(),
            repeat_count: buf.get_u32_le(),
        })
    }
}
