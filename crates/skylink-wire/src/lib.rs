//! # skylink-wire
//!
//! SkyLink radio packet protocol.
//!
//! Fixed little-endian packet header with a 24-bit CRC, chained packets per
//! radio buffer, short-form framing for narrow-band serial radios, and
//! per-stream sequence numbering. Pure: no threads, no I/O.
//!
//! ## Crate structure
//!
//! - [`wire`]: packet header, validation, build, reconstruction, bodies
//! - [`short`]: short-header framing, serial scanner and accumulator
//! - [`stream`]: stream multiplexer (sequences and chaining)
//! - [`caps`]: radio capability flags
//! - [`ipc`]: local-control messages
//! - [`stats`]: counters and windowed helpers
//! - [`error`]: frame errors

pub mod caps;
pub mod error;
pub mod ipc;
pub mod short;
pub mod stats;
pub mod stream;
pub mod wire;

pub use caps::Capabilities;
pub use error::FrameError;
