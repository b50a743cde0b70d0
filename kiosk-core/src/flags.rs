//! Per-packet protocol flags carried in the header.

use bitflags::bitflags;

bitflags! {
    /// Bit set stored in the 64-bit `flags` header field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ProtocolFlags: u64 {
        /// The response carries a failure reason instead of a result body.
        const ERROR = 1 << 0;
        /// The sender expects a `CommandStatus` acknowledgement.
        const ACK_REQUIRED = 1 << 1;
        /// The payload reflects cached data served while the origin
        /// was unavailable.
        const STALE = 1 << 2;
    }
}

impl ProtocolFlags {
    /// Decode a raw header value, dropping bits this build does not know.
    pub fn from_wire(raw: u64) -> Self {
        Self::from_bits_truncate(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bits_are_ignored() {
        let flags = ProtocolFlags::from_wire(0xFF00 | 0b101);
        assert!(flags.contains(ProtocolFlags::ERROR));
        assert!(flags.contains(ProtocolFlags::STALE));
        assert!(!flags.contains(ProtocolFlags::ACK_REQUIRED));
    }

    #[test]
    fn default_is_empty() {
        assert!(ProtocolFlags::default().is_empty());
    }
}
