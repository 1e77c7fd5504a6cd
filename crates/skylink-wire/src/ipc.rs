//! # Local-Control Messages
//!
//! Messages exchanged between the router and local processes on the same
//! node. They travel as ordinary packets tagged [`Module::LocalControl`] with
//! packet types from 100 upward, so the same framer validates them.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::wire::{self, Module, PacketHeader};

pub const MODEL_CHANGED: u8 = 100;
pub const REINIT_RADIO_LINKS: u8 = 101;
pub const REBOOT: u8 = 102;
pub const PAUSE_VIDEO: u8 = 103;
pub const RESUME_VIDEO: u8 = 104;
pub const SET_CAMERA_PARAM: u8 = 105;
pub const BROADCAST_VEHICLE_STATS: u8 = 106;
pub const SET_SIK_SERIAL_SPEED: u8 = 107;
pub const ROUTER_READY: u8 = 108;
pub const FIRST_PAIRING_DONE: u8 = 109;

/// What part of the model changed; carried as the first payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelChange {
    Generic,
    RadioLinkFrameFlags,
    RadioDataRates,
    RadioLinkCapabilities,
    ResetRadioLink,
    VideoBitrate,
    VideoKeyframe,
    UserSelectedVideoProfile,
    AdaptiveVideoFlags,
    RelayParams,
    Other(u8),
}

impl ModelChange {
    pub fn code(&self) -> u8 {
        match self {
            ModelChange::Generic => 0,
            ModelChange::RadioLinkFrameFlags => 1,
            ModelChange::RadioDataRates => 2,
            ModelChange::RadioLinkCapabilities => 3,
            ModelChange::ResetRadioLink => 4,
            ModelChange::VideoBitrate => 5,
            ModelChange::VideoKeyframe => 6,
            ModelChange::UserSelectedVideoProfile => 7,
            ModelChange::AdaptiveVideoFlags => 8,
            ModelChange::RelayParams => 9,
            ModelChange::Other(c) => *c,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ModelChange::Generic,
            1 => ModelChange::RadioLinkFrameFlags,
            2 => ModelChange::RadioDataRates,
            3 => ModelChange::RadioLinkCapabilities,
            4 => ModelChange::ResetRadioLink,
            5 => ModelChange::VideoBitrate,
            6 => ModelChange::VideoKeyframe,
            7 => ModelChange::UserSelectedVideoProfile,
            8 => ModelChange::AdaptiveVideoFlags,
            9 => ModelChange::RelayParams,
            other => ModelChange::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalControl {
    ModelChanged { change: ModelChange, extra: u8 },
    ReinitializeRadioLinks,
    Reboot,
    PauseVideo,
    ResumeVideo,
    SetCameraParam { param: u8, value: u32 },
    BroadcastVehicleStats,
    SetSikSerialSpeed { baud: u32 },
    RouterReady,
    /// The router paired with the first vehicle it heard.
    FirstPairingDone { vehicle_id: u32 },
}

impl LocalControl {
    pub fn packet_type(&self) -> u8 {
        match self {
            LocalControl::ModelChanged { .. } => MODEL_CHANGED,
            LocalControl::ReinitializeRadioLinks => REINIT_RADIO_LINKS,
            LocalControl::Reboot => REBOOT,
            LocalControl::PauseVideo => PAUSE_VIDEO,
            LocalControl::ResumeVideo => RESUME_VIDEO,
            LocalControl::SetCameraParam { .. } => SET_CAMERA_PARAM,
            LocalControl::BroadcastVehicleStats => BROADCAST_VEHICLE_STATS,
            LocalControl::SetSikSerialSpeed { .. } => SET_SIK_SERIAL_SPEED,
            LocalControl::RouterReady => ROUTER_READY,
            LocalControl::FirstPairingDone { .. } => FIRST_PAIRING_DONE,
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            LocalControl::ModelChanged { change, extra } => {
                buf.put_u8(change.code());
                buf.put_u8(*extra);
            }
            LocalControl::SetCameraParam { param, value } => {
                buf.put_u8(*param);
                buf.put_u32_le(*value);
            }
            LocalControl::SetSikSerialSpeed { baud } => buf.put_u32_le(*baud),
            LocalControl::FirstPairingDone { vehicle_id } => buf.put_u32_le(*vehicle_id),
            _ => {}
        }
    }

    /// Build a sealed local-control packet addressed to `vehicle_id`.
    pub fn to_packet(&self, vehicle_id: u32) -> Result<BytesMut, FrameError> {
        let mut body = BytesMut::new();
        self.encode_body(&mut body);
        let header = PacketHeader::new(Module::LocalControl, self.packet_type(), vehicle_id, vehicle_id);
        wire::build(&header, &body, None)
    }

    /// Decode a local-control message from a validated packet.
    /// `Ok(None)` means the packet is not a local-control message.
    pub fn from_packet(header: &PacketHeader, mut body: Bytes) -> Result<Option<Self>, FrameError> {
        if header.module != Module::LocalControl {
            return Ok(None);
        }
        let short = FrameError::ShortBody {
            packet_type: header.packet_type,
        };
        let msg = match header.packet_type {
            MODEL_CHANGED => {
                if body.remaining() < 1 {
                    return Err(short);
                }
                let change = ModelChange::from_code(body.get_u8());
                let extra = if body.has_remaining() { body.get_u8() } else { 0 };
                LocalControl::ModelChanged { change, extra }
            }
            REINIT_RADIO_LINKS => LocalControl::ReinitializeRadioLinks,
            REBOOT => LocalControl::Reboot,
            PAUSE_VIDEO => LocalControl::PauseVideo,
            RESUME_VIDEO => LocalControl::ResumeVideo,
            SET_CAMERA_PARAM => {
                if body.remaining() < 5 {
                    return Err(short);
                }
                LocalControl::SetCameraParam {
                    param: body.get_u8(),
                    value: body.get_u32_le(),
                }
            }
            BROADCAST_VEHICLE_STATS => LocalControl::BroadcastVehicleStats,
            SET_SIK_SERIAL_SPEED => {
                if body.remaining() < 4 {
                    return Err(short);
                }
                LocalControl::SetSikSerialSpeed {
                    baud: body.get_u32_le(),
                }
            }
            ROUTER_READY => LocalControl::RouterReady,
            FIRST_PAIRING_DONE => {
                if body.remaining() < 4 {
                    return Err(short);
                }
                LocalControl::FirstPairingDone {
                    vehicle_id: body.get_u32_le(),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }
}
