//! Structured payloads carried inside [`Packet`] bodies.
//!
//! Each sub-module defines the request/response types for one protocol
//! domain. Payloads are serialized with `serde` + `bincode`.
//!
//! [`Packet`]: crate::packet::Packet

pub mod command;
pub mod hello;
pub mod schedule;
pub mod telemetry;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::KioskError;
use crate::message::Command;
use crate::packet::Packet;

pub use command::{CommandKind, CommandStatus, CommandStatusUpdate, RemoteCommand};
pub use hello::Hello;
pub use schedule::{
    MediaResolveRequest, MediaType, ScheduleEntry, ScheduleRequest, ScheduleSnapshot, SignedUrl,
};
pub use telemetry::{DeviceStatus, DeviceTelemetrySample, PlaybackMetrics, PlaybackState};

/// A bincode-encoded payload bound to the command that carries it.
pub trait Payload: Serialize + DeserializeOwned {
    const COMMAND: Command;

    /// Serialize to bytes for packet payload.
    fn to_bytes(&self) -> Result<Vec<u8>, KioskError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from packet payload bytes.
    fn from_bytes(bytes: &[u8]) -> Result<Self, KioskError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Build a request `Packet` carrying this payload.
    fn into_command(&self, request_id: u64) -> Result<Packet, KioskError> {
        Packet::new_command(request_id, Self::COMMAND, self.to_bytes()?)
    }

    /// Build a response `Packet` carrying this payload.
    fn into_response(&self, request_id: u64) -> Result<Packet, KioskError> {
        Packet::new_response(request_id, Self::COMMAND, self.to_bytes()?)
    }

    /// Decode the payload of `packet`, checking the command matches.
    fn from_packet(packet: &Packet) -> Result<Self, KioskError> {
        if packet.command()? != Self::COMMAND {
            return Err(KioskError::ProtocolViolation("unexpected command for payload"));
        }
        Self::from_bytes(packet.payload())
    }
}
