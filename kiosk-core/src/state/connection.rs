//! Lifecycle of the device ↔ hub link.
//!
//! ```text
//!  Disconnected ─Dial─► Connecting ─TcpUp─► Handshaking ─HelloAccepted─► Connected
//!       ▲                   │                    │                          │
//!       │                 Lost                 Lost                      Goodbye
//!       │                   ▼                    ▼                          ▼
//!       └───────────────────┴────── Lost ◄── Disconnecting ◄────────────────┘
//! ```
//!
//! Invalid transitions are reported as [`KioskError::ProtocolViolation`]
//! and leave the phase untouched.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::KioskError;
use crate::packet::MAX_PAYLOAD_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    /// TCP is up; waiting for the peer's Hello.
    Handshaking,
    Connected {
        since: Instant,
        capabilities: PeerCapabilities,
    },
    /// Goodbye sent; the writer is draining.
    Disconnecting,
}

/// Something that happened to the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Dial,
    TcpUp,
    HelloAccepted(PeerCapabilities),
    Goodbye,
    /// I/O failure, timeout or peer hang-up. Valid from any phase.
    Lost,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Connected { .. } => "connected",
            Self::Disconnecting => "disconnecting",
        })
    }
}

impl ConnectionPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Capabilities agreed during the handshake, while connected.
    pub fn capabilities(&self) -> Option<&PeerCapabilities> {
        match self {
            Self::Connected { capabilities, .. } => Some(capabilities),
            _ => None,
        }
    }

    pub fn uptime(&self) -> Option<std::time::Duration> {
        match self {
            Self::Connected { since, .. } => Some(since.elapsed()),
            _ => None,
        }
    }

    /// Apply `event`, or explain why it does not fit the current phase.
    pub fn advance(&mut self, event: LinkEvent) -> Result<(), KioskError> {
        let next = match (&*self, event) {
            (_, LinkEvent::Lost) => Self::Disconnected,
            (Self::Disconnected, LinkEvent::Dial) => Self::Connecting,
            (Self::Connecting, LinkEvent::TcpUp) => Self::Handshaking,
            (Self::Handshaking, LinkEvent::HelloAccepted(capabilities)) => Self::Connected {
                since: Instant::now(),
                capabilities,
            },
            (Self::Handshaking | Self::Connected { .. }, LinkEvent::Goodbye) => Self::Disconnecting,
            (_, LinkEvent::Dial) => return Err(KioskError::ProtocolViolation("dial while not disconnected")),
            (_, LinkEvent::TcpUp) => return Err(KioskError::ProtocolViolation("tcp up while not connecting")),
            (_, LinkEvent::HelloAccepted(_)) => {
                return Err(KioskError::ProtocolViolation("hello outside handshake"));
            }
            (_, LinkEvent::Goodbye) => return Err(KioskError::ProtocolViolation("goodbye while not connected")),
        };
        *self = next;
        Ok(())
    }
}

/// Features a peer advertises in its Hello.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCapabilities {
    pub telemetry: bool,
    pub remote_commands: bool,
    /// Content refs can be resolved into signed URLs.
    pub media_resolve: bool,
    pub max_payload_size: u64,
}

impl Default for PeerCapabilities {
    fn default() -> Self {
        Self {
            telemetry: true,
            remote_commands: true,
            media_resolve: true,
            max_payload_size: MAX_PAYLOAD_SIZE as u64,
        }
    }
}

impl PeerCapabilities {
    /// What both sides support.
    pub fn negotiate(&self, remote: &Self) -> Self {
        Self {
            telemetry: self.telemetry && remote.telemetry,
            remote_commands: self.remote_commands && remote.remote_commands,
            media_resolve: self.media_resolve && remote.media_resolve,
            max_payload_size: self.max_payload_size.min(remote.max_payload_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> ConnectionPhase {
        let mut phase = ConnectionPhase::default();
        for event in [
            LinkEvent::Dial,
            LinkEvent::TcpUp,
            LinkEvent::HelloAccepted(PeerCapabilities::default()),
        ] {
            phase.advance(event).unwrap();
        }
        phase
    }

    #[test]
    fn dial_handshake_goodbye() {
        let mut phase = connected();
        assert!(phase.is_connected());
        assert!(phase.uptime().is_some());
        assert_eq!(phase.capabilities(), Some(&PeerCapabilities::default()));

        phase.advance(LinkEvent::Goodbye).unwrap();
        assert_eq!(phase, ConnectionPhase::Disconnecting);
        assert_eq!(phase.capabilities(), None);

        phase.advance(LinkEvent::Lost).unwrap();
        assert!(phase.is_disconnected());
    }

    #[test]
    fn out_of_order_events_are_rejected_without_change() {
        let mut phase = ConnectionPhase::Disconnected;
        assert!(phase.advance(LinkEvent::TcpUp).is_err());
        assert!(phase.advance(LinkEvent::Goodbye).is_err());
        assert!(phase.is_disconnected());

        let mut phase = connected();
        assert!(phase.advance(LinkEvent::Dial).is_err());
        assert!(phase.is_connected());
    }

    #[test]
    fn loss_resets_from_any_phase() {
        for mut phase in [ConnectionPhase::Connecting, ConnectionPhase::Handshaking, connected()] {
            phase.advance(LinkEvent::Lost).unwrap();
            assert!(phase.is_disconnected());
        }
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(connected().to_string(), "connected");
        assert_eq!(ConnectionPhase::Handshaking.to_string(), "handshaking");
    }

    #[test]
    fn negotiation_takes_the_intersection() {
        let local = PeerCapabilities {
            media_resolve: false,
            ..Default::default()
        };
        let remote = PeerCapabilities {
            remote_commands: false,
            max_payload_size: 1024,
            ..Default::default()
        };
        let agreed = local.negotiate(&remote);
        assert!(!agreed.media_resolve);
        assert!(!agreed.remote_commands);
        assert!(agreed.telemetry);
        assert_eq!(agreed.max_payload_size, 1024);
    }
}
