//! Packet encoding and decoding.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{Packet, MAX_PACKET_SIZE};
use crate::error::{ProtocolError, Result};

/// Encode a packet to bytes.
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>> {
    packet.encode()
}

/// Decode a packet from bytes.
pub fn decode_packet(data: &[u8]) -> Result<Packet> {
    Packet::decode(data)
}

/// Size of the packet at the start of `prefix`, or `None` if more bytes are
/// needed to tell.
///
/// Fails when the first byte is not a known packet type. Nothing after the
/// bad byte can be framed, so the stream is unusable.
pub fn packet_size(prefix: &[u8]) -> Result<Option<usize>> {
    Packet::size_from_prefix(prefix)
}

/// Tokio codec for packet framing.
///
/// Packets carry no common length field; the size is derived per packet type
/// from the first few bytes (see [`packet_size`]).
pub struct PacketCodec {
    max_packet_size: usize,
}

impl PacketCodec {
    /// Create a new codec with default settings.
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
        }
    }

    /// Create a codec with a custom max packet size.
    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = crate::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        let Some(total_len) = packet_size(src)? else {
            return Ok(None);
        };

        if total_len > self.max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                size: total_len,
                max: self.max_packet_size,
            }
            .into());
        }

        // Wait for complete packet
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        let packet_data = src.split_to(total_len);
        let packet = Packet::decode(&packet_data)?;

        Ok(Some(packet))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = crate::Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let encoded = item.encode()?;
        if encoded.len() > self.max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                size: encoded.len(),
                max: self.max_packet_size,
            }
            .into());
        }

        dst.reserve(encoded.len());
        dst.put_slice(&encoded);

        Ok(())
    }
}
