//! Wire protocol.
//!
//! Defines the packet and record layouts and the stream framing.
//!
//! ## Packet Format
//!
//! ```text
//! ┌─────────────────┬──────────────┬──────────────────────────────┐
//! │ Packet Type (1) │ Reserved (1) │ Payload (type specific) ...  │
//! └─────────────────┴──────────────┴──────────────────────────────┘
//! ```
//!
//! ## Weather Records
//!
//! ```text
//! Live:   │ 0x01 │ Station (1) │ Sequence (2) │ Field mask (4) │ Fields ...
//! Sample: │ 0x02 │ Station (1) │ Timestamp (4) │ Download time (4) │ Field mask (4) │ Fields ...
//! ```
//!
//! Records carry no length; the decoder derives each record's size from its
//! field mask and the station's hardware type (see
//! [`WeatherRecord::calculated_record_size`]).

mod codec;
mod packet;
mod records;

pub use codec::{decode_packet, encode_packet, packet_size, PacketCodec};
pub use packet::{
    AuthenticatePacket, Packet, PacketHeader, PacketType, SampleAcknowledgementPacket,
    StationInfoPacket, WeatherDataPacket,
};
pub use records::{LiveDataRecord, RecordType, SampleDataRecord, WeatherRecord};

use chrono::{DateTime, Utc};

use crate::error::{CodecError, Result};

/// Packet header size in bytes.
pub const HEADER_SIZE: usize = 2;

/// Largest packet the 16 bit length field of a WeatherData packet can describe.
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// Maximum acknowledgements in one SampleAcknowledgement packet.
pub const MAX_ACKNOWLEDGEMENTS: usize = 255;

/// Separator between records in a WeatherData packet (ASCII RS).
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Station code length on the wire.
pub const STATION_CODE_LEN: usize = 5;

/// Encode a timestamp as whole seconds since the Unix epoch.
pub fn timestamp_to_wire(ts: DateTime<Utc>) -> Result<u32> {
    u32::try_from(ts.timestamp()).map_err(|_| CodecError::TimestampOutOfRange.into())
}

/// Decode a wire timestamp.
pub fn timestamp_from_wire(secs: u32) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(i64::from(secs), 0).unwrap_or_default()
}
