//! A single protocol frame: header plus opaque payload.

use std::fmt::Debug;

use crate::error::KioskError;
use crate::flags::ProtocolFlags;
use crate::header::{HEADER_SIZE, PacketHeader};
use crate::message::{Command, MessageType};

/// Largest payload a single packet may carry.
pub const MAX_PAYLOAD_SIZE: usize = 256 * 1024;

/// Largest buffered frame the codec accepts before erroring.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    header: PacketHeader,
    payload: Vec<u8>,
}

impl Packet {
    /// Connection-level keepalive. Always carries request id 0.
    pub fn keepalive() -> Self {
        Self {
            header: PacketHeader::new(
                0,
                MessageType::Command as u32,
                ProtocolFlags::empty().bits(),
                Command::Ping as u64,
                0,
                0,
            ),
            payload: Vec::new(),
        }
    }

    pub fn new_command(
        request_id: u64,
        command: Command,
        payload: Vec<u8>,
    ) -> Result<Self, KioskError> {
        Self::build(MessageType::Command, request_id, command, payload)
    }

    pub fn new_response(
        request_id: u64,
        command: Command,
        payload: Vec<u8>,
    ) -> Result<Self, KioskError> {
        Self::build(MessageType::Response, request_id, command, payload)
    }

    /// A response that carries a human-readable failure reason.
    pub fn new_error_response(
        request_id: u64,
        command: Command,
        reason: &str,
    ) -> Result<Self, KioskError> {
        Ok(Self::new_response(request_id, command, reason.as_bytes().to_vec())?
            .with_flags(ProtocolFlags::ERROR))
    }

    fn build(
        kind: MessageType,
        request_id: u64,
        command: Command,
        payload: Vec<u8>,
    ) -> Result<Self, KioskError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(KioskError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let header = PacketHeader::new(
            checksum_of(&payload),
            kind as u32,
            ProtocolFlags::empty().bits(),
            command as u64,
            request_id,
            payload.len() as u64,
        );
        Ok(Self { header, payload })
    }

    /// Replace the header flags.
    pub fn with_flags(mut self, flags: ProtocolFlags) -> Self {
        self.header.set_flags(flags.bits());
        self
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn checksum(&self) -> u32 {
        self.header.checksum()
    }

    pub fn message_type(&self) -> Result<MessageType, KioskError> {
        MessageType::try_from(self.header.message_type())
    }

    pub fn command(&self) -> Result<Command, KioskError> {
        Command::try_from(self.header.command_id())
    }

    pub fn flags(&self) -> ProtocolFlags {
        ProtocolFlags::from_wire(self.header.flags())
    }

    pub fn request_id(&self) -> u64 {
        self.header.request_id()
    }

    pub fn payload_length(&self) -> u64 {
        self.header.payload_length()
    }

    pub fn is_response(&self) -> bool {
        matches!(self.message_type(), Ok(MessageType::Response))
    }

    pub fn is_error(&self) -> bool {
        self.flags().contains(ProtocolFlags::ERROR)
    }

    /// `true` for connection-level keepalives that carry no request.
    pub fn is_keepalive(&self) -> bool {
        self.request_id() == 0 && matches!(self.command(), Ok(Command::Ping))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, KioskError> {
        // In case it got tampered with
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(KioskError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KioskError> {
        let header = PacketHeader::from_bytes(bytes)?;

        if header.payload_length() > MAX_PAYLOAD_SIZE as u64 {
            return Err(KioskError::PayloadTooLarge {
                size: header.payload_length() as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let expected = HEADER_SIZE + header.payload_length() as usize;
        if bytes.len() != expected {
            return Err(KioskError::InvalidPacketLength {
                expected,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            header,
            payload: bytes[HEADER_SIZE..].to_vec(),
        })
    }

    /// Verify the payload checksum against the header.
    pub fn validate(&self) -> bool {
        self.header.checksum() == checksum_of(&self.payload)
    }
}

/// First four bytes of the blake3 digest, or 0 for an empty payload.
fn checksum_of(payload: &[u8]) -> u32 {
    if payload.is_empty() {
        return 0;
    }
    let digest = blake3::hash(payload);
    let bytes = digest.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

impl Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("header", &self.header)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
