//! Typed errors for the link engine.

use thiserror::Error;

/// TX selection failure. The frame is dropped and counted, never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("no radio interface can transmit this frame")]
    NoEligibleInterface,
}

/// Rejected relay configuration. The previous parameters stay active.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayConfigError {
    #[error("relayed vehicle id {0} is not a valid relay target")]
    InvalidVehicle(u32),
    #[error("relay link {link} is out of range ({count} links)")]
    LinkOutOfRange { link: usize, count: usize },
    #[error("relay link {0} is the only link able to transmit")]
    OnlyTxLink(usize),
    #[error("relay link {0} has no radio interfaces")]
    EmptyLink(usize),
    #[error("relay frequency must be set when a relay link is selected")]
    MissingFrequency,
    #[error("relay link {0} does not fit the one-byte link field")]
    LinkNotEncodable(usize),
}

/// Configuration that parsed but does not make sense.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Toml(String),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("unknown capability '{name}' on {owner}")]
    UnknownCapability { owner: String, name: String },
    #[error("interface '{iface}' refers to missing radio link {link}")]
    MissingLink { iface: String, link: usize },
    #[error("invalid socket address '{0}'")]
    BadAddress(String),
    #[error("invalid relay parameters: {0}")]
    Relay(#[from] RelayConfigError),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },
}
