//! `tokio_util` framing for [`Packet`]s.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::KioskError;
use crate::header::{HEADER_SIZE, PacketHeader};
use crate::packet::{MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, Packet};

#[derive(Debug, Default, Clone, Copy)]
pub struct KioskCodec;

impl Decoder for KioskCodec {
    type Item = Packet;
    type Error = KioskError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = PacketHeader::from_bytes(&src[..HEADER_SIZE])?;
        let payload_len = header.payload_length() as usize;

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(KioskError::FrameTooLarge {
                size: HEADER_SIZE + payload_len,
                max: MAX_FRAME_SIZE,
            });
        }
        if payload_len > 0 && header.checksum() == 0 {
            return Err(KioskError::InvalidHeader("checksum must be non-zero"));
        }

        let frame_len = HEADER_SIZE + payload_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        let packet = Packet::from_bytes(&frame)?;

        // only if there's a payload
        if packet.payload_length() > 0 && !packet.validate() {
            return Err(KioskError::ChecksumMismatch);
        }

        Ok(Some(packet))
    }
}

impl Encoder<Packet> for KioskCodec {
    type Error = KioskError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = item.to_bytes()?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Command;

    #[test]
    fn decode_waits_for_full_frame() {
        let pkt = Packet::new_command(1, Command::ScheduleFetch, vec![9; 32]).unwrap();
        let bytes = pkt.to_bytes().unwrap();

        let mut codec = KioskCodec;
        let mut buf = BytesMut::from(&bytes[..HEADER_SIZE + 10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[HEADER_SIZE + 10..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, pkt);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_two_frames_back_to_back() {
        let a = Packet::keepalive();
        let b = Packet::new_response(2, Command::ScheduleFetch, vec![1, 2]).unwrap();

        let mut codec = KioskCodec;
        let mut buf = BytesMut::new();
        codec.encode(a.clone(), &mut buf).unwrap();
        codec.encode(b.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), a);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), b);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[tokio::test]
    async fn framed_read_reassembles_split_socket_reads() {
        use futures::StreamExt;
        use tokio_util::codec::FramedRead;

        let pkt = Packet::new_command(7, Command::MediaResolve, vec![3; 100]).unwrap();
        let bytes = pkt.to_bytes().unwrap();
        let io = tokio_test::io::Builder::new()
            .read(&bytes[..5])
            .read(&bytes[5..HEADER_SIZE + 40])
            .read(&bytes[HEADER_SIZE + 40..])
            .build();

        let mut frames = FramedRead::new(io, KioskCodec);
        assert_eq!(frames.next().await.unwrap().unwrap(), pkt);
        assert!(frames.next().await.is_none());
    }

    #[test]
    fn corrupted_payload_is_rejected() {
        let pkt = Packet::new_command(1, Command::Heartbeat, vec![5; 8]).unwrap();
        let mut bytes = pkt.to_bytes().unwrap();
        bytes[HEADER_SIZE] ^= 0x01;

        let mut buf = BytesMut::from(&bytes[..]);
        assert!(matches!(
            KioskCodec.decode(&mut buf),
            Err(KioskError::ChecksumMismatch)
        ));
    }

    #[test]
    fn oversized_declared_length_is_rejected() {
        let header = PacketHeader::new(1, 1, 0, 1, 1, (MAX_PAYLOAD_SIZE + 1) as u64);
        let mut buf = BytesMut::from(&header.to_bytes()[..]);
        assert!(matches!(
            KioskCodec.decode(&mut buf),
            Err(KioskError::FrameTooLarge { .. })
        ));
    }
}
