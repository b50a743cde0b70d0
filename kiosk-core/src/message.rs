//! Protocol message types and command definitions.
//!
//! Uses proper enums with `TryFrom`, so unknown values never panic.

use crate::error::KioskError;
use std::fmt;

// ── MessageType ──────────────────────────────────────────────────

/// Distinguishes requests from replies. Either peer may originate a
/// request: the device asks the hub for schedules, the hub pushes
/// remote commands to the device.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// A request or one-way notification.
    Command = 0x1,
    /// A reply correlated by `request_id`.
    Response = 0x2,
}

impl TryFrom<u32> for MessageType {
    type Error = KioskError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x1 => Ok(MessageType::Command),
            0x2 => Ok(MessageType::Response),
            _ => Err(KioskError::UnknownVariant {
                type_name: "MessageType",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Command => write!(f, "Command"),
            MessageType::Response => write!(f, "Response"),
        }
    }
}

// ── Command ──────────────────────────────────────────────────────

/// All commands understood by the device/hub protocol.
///
/// Organized by category:
/// - `0x0001..0x00FF`: Protocol-level (handshake, keepalive)
/// - `0x0100..0x01FF`: Schedule and media resolution (device → hub)
/// - `0x0200..0x02FF`: Telemetry (device → hub)
/// - `0x0300..0x03FF`: Remote operational commands (hub → device)
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // ── Protocol (0x00xx) ────────────────────────────────────────
    /// Keep-alive ping.
    Ping = 0x0001,
    /// Connection handshake.
    Hello = 0x0002,
    /// Graceful disconnect.
    Goodbye = 0x0003,

    // ── Schedule (0x01xx) ────────────────────────────────────────
    /// Fetch the schedule for a screen.
    ScheduleFetch = 0x0101,
    /// Resolve a content reference into a time-boxed signed URL.
    MediaResolve = 0x0102,

    // ── Telemetry (0x02xx) ───────────────────────────────────────
    /// Periodic heartbeat carrying a `DeviceTelemetrySample`.
    Heartbeat = 0x0201,

    // ── Remote commands (0x03xx) ─────────────────────────────────
    /// Deliver a `RemoteCommand` to the device.
    RemoteCommand = 0x0301,
    /// Report a remote command's status transition back to the hub.
    CommandStatus = 0x0302,
}

impl TryFrom<u64> for Command {
    type Error = KioskError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Command::Ping),
            0x0002 => Ok(Command::Hello),
            0x0003 => Ok(Command::Goodbye),

            0x0101 => Ok(Command::ScheduleFetch),
            0x0102 => Ok(Command::MediaResolve),

            0x0201 => Ok(Command::Heartbeat),

            0x0301 => Ok(Command::RemoteCommand),
            0x0302 => Ok(Command::CommandStatus),

            _ => Err(KioskError::UnknownVariant {
                type_name: "Command",
                value,
            }),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Command {
    /// Returns `true` if this command expects a response from the peer.
    pub fn expects_response(&self) -> bool {
        !matches!(
            self,
            Command::Heartbeat | Command::Goodbye | Command::CommandStatus | Command::RemoteCommand
        )
    }
}
