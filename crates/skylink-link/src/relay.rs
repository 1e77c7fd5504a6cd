//! # Relay Forwarder
//!
//! A vehicle can relay a second vehicle's session to the controller over a
//! dedicated radio link. This module owns the relay parameters, validates
//! updates against the radio topology, and decides which buffers cross the
//! relay in either direction.
//!
//! Forwarding from the relayed vehicle is all-or-nothing per radio buffer:
//! one bad sub-packet drops the whole buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use skylink_wire::ipc::{LocalControl, ModelChange};
use skylink_wire::wire::{packet_type, ChainIter, Module, BROADCAST_VEHICLE_ID};

use crate::error::RelayConfigError;
use crate::radio::RadioTopology;

// ─── Flags & Mode ───────────────────────────────────────────────────────────

/// Traffic classes the relay carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RelayFlags(pub u8);

impl RelayFlags {
    pub const VIDEO: RelayFlags = RelayFlags(1);
    pub const TELEMETRY: RelayFlags = RelayFlags(2);
    pub const COMMANDS: RelayFlags = RelayFlags(4);
    pub const OSD_SWITCH: RelayFlags = RelayFlags(8);
    pub const OSD_MERGE: RelayFlags = RelayFlags(16);

    pub fn contains(&self, other: RelayFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RelayFlags {
    type Output = RelayFlags;

    fn bitor(self, rhs: RelayFlags) -> RelayFlags {
        RelayFlags(self.0 | rhs.0)
    }
}

/// Current relay role (bitmask).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RelayMode(pub u8);

impl RelayMode {
    pub const NONE: RelayMode = RelayMode(0);
    /// Controller is viewing the main vehicle.
    pub const MAIN: RelayMode = RelayMode(1);
    /// Controller is viewing the relayed vehicle.
    pub const REMOTE: RelayMode = RelayMode(2);
    /// This vehicle relays for another.
    pub const IS_RELAY_NODE: RelayMode = RelayMode(4);

    pub fn contains(&self, other: RelayMode) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RelayMode {
    type Output = RelayMode;

    fn bitor(self, rhs: RelayMode) -> RelayMode {
        RelayMode(self.0 | rhs.0)
    }
}

// ─── Parameters ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RelayParams {
    pub relayed_vehicle_id: u32,
    pub relay_link: Option<usize>,
    pub frequency_khz: u32,
    pub flags: RelayFlags,
    pub mode: RelayMode,
}

impl RelayParams {
    pub const ENCODED_LEN: usize = 11;

    pub fn is_active(&self) -> bool {
        self.relay_link.is_some() && self.relayed_vehicle_id != 0
    }

    /// Check the parameters against this node's id and radio topology.
    pub fn validate(&self, local_vehicle_id: u32, topology: &RadioTopology) -> Result<(), RelayConfigError> {
        if self.relay_link.is_none() && self.mode == RelayMode::NONE {
            return Ok(());
        }
        let id = self.relayed_vehicle_id;
        if id == 0 || id == BROADCAST_VEHICLE_ID || id == local_vehicle_id {
            return Err(RelayConfigError::InvalidVehicle(id));
        }
        let Some(link_id) = self.relay_link else {
            return Ok(());
        };
        if i8::try_from(link_id).is_err() {
            return Err(RelayConfigError::LinkNotEncodable(link_id));
        }
        let Some(link) = topology.link(link_id) else {
            return Err(RelayConfigError::LinkOutOfRange {
                link: link_id,
                count: topology.links.len(),
            });
        };
        if link.caps.can_transmit() && topology.tx_capable_links() <= 1 {
            return Err(RelayConfigError::OnlyTxLink(link_id));
        }
        if link.interfaces.is_empty() {
            return Err(RelayConfigError::EmptyLink(link_id));
        }
        if self.frequency_khz == 0 {
            return Err(RelayConfigError::MissingFrequency);
        }
        Ok(())
    }

    /// Relay parameter block as carried by the configuration command.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), RelayConfigError> {
        let link = match self.relay_link {
            Some(l) => i8::try_from(l).map_err(|_| RelayConfigError::LinkNotEncodable(l))?,
            None => -1,
        };
        buf.put_u32_le(self.relayed_vehicle_id);
        buf.put_i8(link);
        buf.put_u32_le(self.frequency_khz);
        buf.put_u8(self.flags.0);
        buf.put_u8(self.mode.0);
        Ok(())
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::ENCODED_LEN {
            return None;
        }
        let relayed_vehicle_id = buf.get_u32_le();
        let link = buf.get_i8();
        Some(RelayParams {
            relayed_vehicle_id,
            relay_link: (link >= 0).then_some(link as usize),
            frequency_khz: buf.get_u32_le(),
            flags: RelayFlags(buf.get_u8()),
            mode: RelayMode(buf.get_u8()),
        })
    }
}

// ─── Forwarder ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDrop {
    /// A sub-packet failed the CRC or came from another vehicle.
    Mismatch,
    /// A sub-packet's traffic class is not relayed.
    NotPermitted,
    /// Arrived on a link other than the relay link.
    WrongLink,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    Forward(Bytes),
    Dropped(RelayDrop),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayStats {
    pub forwarded_buffers: u64,
    pub forwarded_bytes: u64,
    pub dropped_buffers: u64,
    pub to_vehicle_buffers: u64,
    pub to_vehicle_bytes: u64,
}

/// What a relay update requires the router to do.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayChange {
    /// Interfaces whose relay role changed and must be reopened.
    pub reopen_interfaces: Vec<usize>,
    /// Previously relayed vehicle whose RX state should be dropped.
    pub previous_vehicle: Option<u32>,
    pub notify: LocalControl,
}

#[derive(Default)]
pub struct RelayForwarder {
    params: RelayParams,
    stats: RelayStats,
}

impl RelayForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params(&self) -> &RelayParams {
        &self.params
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    fn class_permitted(&self, module: Module, ptype: u8) -> bool {
        if packet_type::is_ruby_telemetry(ptype) || self.params.mode != RelayMode::NONE {
            return true;
        }
        let flags = self.params.flags;
        match module {
            Module::Video => flags.contains(RelayFlags::VIDEO),
            Module::Telemetry => flags.contains(RelayFlags::TELEMETRY),
            Module::Commands => flags.contains(RelayFlags::COMMANDS),
            _ => false,
        }
    }

    /// Check a buffer from the relayed vehicle. The returned buffer goes
    /// upstream unchanged.
    pub fn forward_from_relayed_vehicle(&mut self, link: usize, interface: usize, buffer: &Bytes) -> RelayOutcome {
        let outcome = self.check_relayed_buffer(link, buffer);
        match &outcome {
            RelayOutcome::Forward(b) => {
                self.stats.forwarded_buffers += 1;
                self.stats.forwarded_bytes += b.len() as u64;
            }
            RelayOutcome::Dropped(reason) => {
                self.stats.dropped_buffers += 1;
                tracing::warn!(link, interface, ?reason, len = buffer.len(), "relay buffer dropped");
            }
        }
        outcome
    }

    fn check_relayed_buffer(&self, link: usize, buffer: &Bytes) -> RelayOutcome {
        if self.params.relay_link != Some(link) {
            return RelayOutcome::Dropped(RelayDrop::WrongLink);
        }
        let mut permitted = true;
        let mut any = false;
        for item in ChainIter::new(buffer.clone()) {
            let Ok(item) = item else {
                return RelayOutcome::Dropped(RelayDrop::Mismatch);
            };
            let h = &item.packet.header;
            if !item.crc_ok || h.vehicle_id_src != self.params.relayed_vehicle_id {
                return RelayOutcome::Dropped(RelayDrop::Mismatch);
            }
            permitted &= self.class_permitted(h.module, h.packet_type);
            any = true;
        }
        if !any {
            return RelayOutcome::Dropped(RelayDrop::Mismatch);
        }
        if !permitted {
            return RelayOutcome::Dropped(RelayDrop::NotPermitted);
        }
        RelayOutcome::Forward(buffer.clone())
    }

    /// Link to send a controller buffer on toward the relayed vehicle.
    pub fn forward_from_controller_to_relayed_vehicle(&mut self, buffer: &Bytes) -> Option<usize> {
        let link = self.params.relay_link?;
        self.stats.to_vehicle_buffers += 1;
        self.stats.to_vehicle_bytes += buffer.len() as u64;
        Some(link)
    }

    /// Validate and install new parameters, marking the relay link in the
    /// topology. On error nothing changes.
    pub fn apply_params(
        &mut self,
        params: RelayParams,
        local_vehicle_id: u32,
        topology: &mut RadioTopology,
    ) -> Result<RelayChange, RelayConfigError> {
        if let Err(e) = params.validate(local_vehicle_id, topology) {
            tracing::warn!(error = %e, ?params, "relay parameters rejected");
            return Err(e);
        }

        let old = std::mem::replace(&mut self.params, params);
        let mut reopen = topology.mark_relay_link(self.params.relay_link);
        if old.frequency_khz != self.params.frequency_khz {
            if let Some(link) = self.params.relay_link.and_then(|l| topology.link(l)) {
                reopen.extend(link.interfaces.iter().copied());
            }
        }
        reopen.sort_unstable();
        reopen.dedup();

        let previous_vehicle = (old.relayed_vehicle_id != 0
            && old.relayed_vehicle_id != self.params.relayed_vehicle_id)
            .then_some(old.relayed_vehicle_id);

        tracing::info!(
            relayed = self.params.relayed_vehicle_id,
            link = ?self.params.relay_link,
            freq_khz = self.params.frequency_khz,
            mode = self.params.mode.0,
            reopen = reopen.len(),
            "relay parameters applied"
        );

        Ok(RelayChange {
            reopen_interfaces: reopen,
            previous_vehicle,
            notify: LocalControl::ModelChanged {
                change: ModelChange::RelayParams,
                extra: 0,
            },
        })
    }
}
