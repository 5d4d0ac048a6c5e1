//! tokio-util codec for the packet stream.
//!
//! Frames carry no length prefix. The header is a u16 packet type and a u16
//! flags word; the body is schema-delimited, so the decoder speculatively
//! parses from the front of the read buffer and treats a short read as
//! "wait for more bytes" rather than an error.

use std::io;
use std::io::{Read, Write};

use bytes::{Buf, Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::common::error::{WireError, WireResult};
use crate::protocol::packets::messages::Message;
use crate::protocol::packets::types::{packet_name, FLAG_COMPRESSED, MAX_VALID_PACKET};
use crate::protocol::wire::{self, MAX_COMPRESSED_SIZE};

/// Bodies shorter than this are never worth deflating.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 128;

/// Encoder/decoder for framed packet transport.
///
/// A compressed body (flag bit 0 set) is a zlib stream of the plain body,
/// wrapped in a u32-length-prefixed block capped at [`MAX_COMPRESSED_SIZE`].
#[derive(Debug, Clone)]
pub struct MessageCodec {
    compression_threshold: usize,
}

impl MessageCodec {
    pub fn new() -> Self {
        MessageCodec {
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }

    pub fn with_compression_threshold(compression_threshold: usize) -> Self {
        MessageCodec {
            compression_threshold,
        }
    }

    fn try_decode(&self, buf: &mut impl Buf) -> WireResult<Message> {
        let packet_type = wire::get_u16(buf)?;
        if packet_type > MAX_VALID_PACKET {
            return Err(WireError::UnknownPacketType(packet_type));
        }
        let flags = wire::get_u16(buf)?;
        if flags & FLAG_COMPRESSED != 0 {
            let compressed = wire::get_blob(buf, MAX_COMPRESSED_SIZE)?;
            let plain = inflate(&compressed)?;
            let mut body = Bytes::from(plain);
            let message = Message::decode_body(packet_type, &mut body)?;
            if body.has_remaining() {
                return Err(WireError::corrupt(format!(
                    "{} body has {} trailing bytes after decompression",
                    packet_name(packet_type),
                    body.remaining()
                )));
            }
            Ok(message)
        } else {
            Message::decode_body(packet_type, buf)
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        MessageCodec::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, io::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        // Parse against a cursor so an incomplete packet leaves src intact.
        let mut cursor = &src[..];
        match self.try_decode(&mut cursor) {
            Ok(message) => {
                let consumed = src.len() - cursor.len();
                src.advance(consumed);
                trace!(packet = message.name(), bytes = consumed, "decoded packet");
                Ok(Some(message))
            }
            Err(WireError::Truncated) => Ok(None),
            Err(error) => Err(io::Error::new(io::ErrorKind::InvalidData, error)),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), io::Error> {
        let mut body = BytesMut::new();
        message.encode_body(&mut body);

        let mut flags = 0u16;
        let mut payload = body.freeze();
        if payload.len() >= self.compression_threshold {
            if let Some(compressed) = deflate(&payload) {
                // Only worth it when the prefixed block is strictly smaller.
                if compressed.len() + 4 < payload.len() {
                    flags |= FLAG_COMPRESSED;
                    let mut block = BytesMut::with_capacity(compressed.len() + 4);
                    wire::put_blob(&mut block, &compressed);
                    payload = block.freeze();
                }
            }
        }

        dst.reserve(4 + payload.len());
        wire::put_u16(dst, message.packet_type());
        wire::put_u16(dst, flags);
        dst.extend_from_slice(&payload);
        trace!(
            packet = message.name(),
            compressed = flags & FLAG_COMPRESSED != 0,
            bytes = 4 + payload.len(),
            "encoded packet"
        );
        Ok(())
    }
}

fn deflate(plain: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(plain).ok()?;
    let compressed = encoder.finish().ok()?;
    if compressed.len() > MAX_COMPRESSED_SIZE {
        return None;
    }
    Some(compressed)
}

fn inflate(compressed: &[u8]) -> WireResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut plain = Vec::new();
    decoder
        .read_to_end(&mut plain)
        .map_err(|error| WireError::Decompression {
            message: error.to_string(),
        })?;
    Ok(plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::types;

    fn code_then_decode(codec: &mut MessageCodec, message: Message) -> Message {
        let mut buf = BytesMut::new();
        codec.encode(message, &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty(), "decode must consume the whole frame");
        decoded
    }

    #[test]
    fn small_packet_stays_plain() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Message::KeepAlive, &mut buf).unwrap();
        assert_eq!(&buf[..], &[types::KEEP_ALIVE as u8, 0, 0, 0][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::KeepAlive));
    }

    #[test]
    fn large_repetitive_body_is_compressed() {
        let mut codec = MessageCodec::new();
        let message = Message::SendMessage {
            text: "ha".repeat(200),
        };
        let mut buf = BytesMut::new();
        codec.encode(message.clone(), &mut buf).unwrap();
        let flags = u16::from_le_bytes([buf[2], buf[3]]);
        assert_eq!(flags & FLAG_COMPRESSED, FLAG_COMPRESSED);
        assert!(buf.len() < 200);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(message));
    }

    #[test]
    fn empty_body_round_trips_even_below_threshold() {
        let mut codec = MessageCodec::with_compression_threshold(0);
        let decoded = code_then_decode(&mut codec, Message::Disconnect);
        assert_eq!(decoded, Message::Disconnect);
    }

    #[test]
    fn compressed_empty_body_decodes() {
        // The encoder never deflates an empty body, but a peer may.
        let mut codec = MessageCodec::new();
        let compressed = deflate(&[]).unwrap();
        let mut buf = BytesMut::new();
        wire::put_u16(&mut buf, types::KEEP_ALIVE);
        wire::put_u16(&mut buf, FLAG_COMPRESSED);
        wire::put_blob(&mut buf, &compressed);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::KeepAlive));
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                Message::StartLogin {
                    username: "ambrosia".into(),
                },
                &mut buf,
            )
            .unwrap();
        let full = buf.clone();
        let mut partial = BytesMut::from(&full[..5]);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
        assert_eq!(partial.len(), 5, "partial frame must stay buffered");
        partial.extend_from_slice(&full[5..]);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn two_pipelined_frames_decode_in_order() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Message::KeepAlive, &mut buf).unwrap();
        codec
            .encode(Message::ConnectionRejected { code: 3 }, &mut buf)
            .unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::KeepAlive));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Message::ConnectionRejected { code: 3 })
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn unknown_packet_type_is_a_hard_error() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0x00, 0x00][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn corrupt_zlib_block_is_a_hard_error() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        wire::put_u16(&mut buf, types::SEND_MESSAGE);
        wire::put_u16(&mut buf, FLAG_COMPRESSED);
        wire::put_blob(&mut buf, &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn trailing_bytes_after_body_are_corrupt_when_compressed() {
        let mut codec = MessageCodec::new();
        let mut plain = BytesMut::new();
        Message::ConnectionRejected { code: 1 }.encode_body(&mut plain);
        plain.extend_from_slice(&[0u8; 8]);
        let compressed = deflate(&plain).unwrap();
        let mut buf = BytesMut::new();
        wire::put_u16(&mut buf, types::CONNECTION_REJECTED);
        wire::put_u16(&mut buf, FLAG_COMPRESSED);
        wire::put_blob(&mut buf, &compressed);
        assert!(codec.decode(&mut buf).is_err());
    }
}
