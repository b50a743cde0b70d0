//! Fixed-size packet header.
//!
//! Layout (little-endian, 44 bytes):
//!
//! ```text
//! 0..4    magic           "KSK1"
//! 4..8    checksum        first 4 bytes of blake3(payload), 0 if empty
//! 8..12   message_type    MessageType discriminant
//! 12..20  flags           ProtocolFlags bits
//! 20..28  command_id      Command discriminant
//! 28..36  request_id      correlation id, 0 for keepalives
//! 36..44  payload_length  bytes following the header
//! ```

use crate::error::KioskError;

/// Magic prefix of every frame.
pub const MAGIC: [u8; 4] = *b"KSK1";

/// Encoded header size in bytes.
pub const HEADER_SIZE: usize = 44;

pub type HeaderBytes = [u8; HEADER_SIZE];

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    checksum: u32,
    message_type: u32,
    flags: u64,
    command_id: u64,
    request_id: u64,
    payload_length: u64,
}

impl PacketHeader {
    pub fn new(
        checksum: u32,
        message_type: u32,
        flags: u64,
        command_id: u64,
        request_id: u64,
        payload_length: u64,
    ) -> Self {
        Self {
            checksum,
            message_type,
            flags,
            command_id,
            request_id,
            payload_length,
        }
    }

    pub fn to_bytes(&self) -> HeaderBytes {
        let mut out: HeaderBytes = [0; HEADER_SIZE];
        out[0..4].copy_from_slice(&MAGIC);
        out[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        out[8..12].copy_from_slice(&self.message_type.to_le_bytes());
        out[12..20].copy_from_slice(&self.flags.to_le_bytes());
        out[20..28].copy_from_slice(&self.command_id.to_le_bytes());
        out[28..36].copy_from_slice(&self.request_id.to_le_bytes());
        out[36..44].copy_from_slice(&self.payload_length.to_le_bytes());
        out
    }

    /// Parse a header from the first [`HEADER_SIZE`] bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KioskError> {
        if bytes.len() < HEADER_SIZE {
            return Err(KioskError::InvalidPacketLength {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes[0..4] != MAGIC {
            return Err(KioskError::InvalidMagic);
        }
        Ok(Self {
            checksum: read_u32(bytes, 4)?,
            message_type: read_u32(bytes, 8)?,
            flags: read_u64(bytes, 12)?,
            command_id: read_u64(bytes, 20)?,
            request_id: read_u64(bytes, 28)?,
            payload_length: read_u64(bytes, 36)?,
        })
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn set_checksum(&mut self, checksum: u32) {
        self.checksum = checksum;
    }

    pub fn message_type(&self) -> u32 {
        self.message_type
    }

    pub fn flags(&self) -> u64 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u64) {
        self.flags = flags;
    }

    pub fn command_id(&self) -> u64 {
        self.command_id
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn payload_length(&self) -> u64 {
        self.payload_length
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, KioskError> {
    bytes[at..at + 4]
        .try_into()
        .map(u32::from_le_bytes)
        .map_err(|_| KioskError::InvalidHeader("truncated u32 field"))
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64, KioskError> {
    bytes[at..at + 8]
        .try_into()
        .map(u64::from_le_bytes)
        .map_err(|_| KioskError::InvalidHeader("truncated u64 field"))
}

impl std::fmt::Debug for PacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketHeader")
            .field("message_type", &self.message_type)
            .field("flags", &self.flags)
            .field("command_id", &self.command_id)
            .field("request_id", &self.request_id)
            .field("payload_length", &self.payload_length)
            .field("checksum", &self.checksum)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_44_bytes_with_magic() {
        let header = PacketHeader::new(7, 1, 0, 0x0101, 9, 12);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..4], b"KSK1");
        assert_eq!(PacketHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn rejects_foreign_magic() {
        let mut bytes = PacketHeader::new(0, 1, 0, 1, 0, 0).to_bytes();
        bytes[0..4].copy_from_slice(b"XXXX");
        assert!(matches!(
            PacketHeader::from_bytes(&bytes),
            Err(KioskError::InvalidMagic)
        ));
    }

    #[test]
    fn rejects_short_input() {
        assert!(PacketHeader::from_bytes(&[0u8; 10]).is_err());
    }
}
