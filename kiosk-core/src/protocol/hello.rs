//! Handshake payload exchanged right after the TCP connect.

use serde::{Deserialize, Serialize};

use crate::message::Command;
use crate::protocol::Payload;
use crate::state::PeerCapabilities;

/// Sent by the device as a `Hello` command and echoed back by the hub
/// (with its own identity and capabilities) as the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub device_id: String,
    pub screen_id: String,
    pub version: String,
    pub capabilities: PeerCapabilities,
}

impl Hello {
    pub fn new(device_id: impl Into<String>, screen_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            screen_id: screen_id.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: PeerCapabilities::default(),
        }
    }
}

impl Payload for Hello {
    const COMMAND: Command = Command::Hello;
}
