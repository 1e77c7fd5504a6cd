//! # skylink-link
//!
//! SkyLink link engine: everything between the local processes and the
//! radios of one node.
//!
//! ## Crate structure
//!
//! - [`radio`]: radio topology, data rates and the [`radio::RadioPort`] seam
//! - [`selector`]: per-frame TX link and interface selection
//! - [`receiver`]: RX validation, pairing filter, dedup, dispatch
//! - [`adaptive`]: video profile shifting, quantization and keyframe control
//! - [`relay`]: relay parameters and all-or-nothing forwarding
//! - [`alarms`]: rate-limited alarm packets
//! - [`config`]: TOML configuration
//! - [`router`]: single-owner router state tying it together
//! - [`runtime`]: worker thread, channels and snapshots
//! - [`error`]: typed errors

pub mod adaptive;
pub mod alarms;
pub mod config;
pub mod error;
pub mod radio;
pub mod receiver;
pub mod relay;
pub mod router;
pub mod runtime;
pub mod selector;

pub use config::RouterConfig;
pub use router::{Delivery, RouterState, RouterStats};
pub use runtime::RouterRuntime;
