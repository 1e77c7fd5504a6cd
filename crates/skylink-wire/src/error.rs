//! Error types for frame parsing and validation.

use thiserror::Error;

/// Structural failure while parsing a radio buffer.
///
/// Every variant means the bytes cannot be trusted as a packet at all; a
/// packet whose structure is sound but whose CRC does not match is *not* an
/// error here (see [`crate::wire::Validated::crc_ok`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("buffer too short: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("declared total length {total} is below the {min}-byte header")]
    LengthBelowHeader { total: usize, min: usize },

    #[error("declared header length {header} is inconsistent with total length {total}")]
    BadHeaderLength { header: usize, total: usize },

    #[error("declared total length {total} exceeds the {available}-byte buffer")]
    ExceedsBuffer { total: usize, available: usize },

    #[error("packet of {len} bytes exceeds the {max}-byte radio limit")]
    Oversized { len: usize, max: usize },

    #[error("extra data of {len} bytes exceeds the {max}-byte trailer limit")]
    ExtraDataTooLong { len: usize, max: usize },

    #[error("extra-data trailer is malformed")]
    BadTrailer,

    #[error("unknown module tag {0}")]
    UnknownModule(u8),

    #[error("invalid short header")]
    BadShortHeader,

    #[error("packet body too short for packet type {packet_type}")]
    ShortBody { packet_type: u8 },
}
