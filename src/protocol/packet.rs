//! Packet structure and handling.

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Utc};

use crate::error::{ProtocolError, Result};
use crate::types::{HardwareType, Station, StationId};

use super::records::WeatherRecord;
use super::{
    timestamp_from_wire, timestamp_to_wire, HEADER_SIZE, MAX_ACKNOWLEDGEMENTS, MAX_PACKET_SIZE,
    RECORD_SEPARATOR, STATION_CODE_LEN,
};

/// Packet type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Client authentication request.
    Authenticate = 0x05,
    /// Stations the client may submit data for.
    StationInfo = 0x06,
    /// Live and sample records.
    WeatherData = 0x07,
    /// Samples the server has stored.
    SampleAcknowledgement = 0x08,
    /// Authentication rejected.
    AuthenticateFailed = 0x09,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x05 => Some(Self::Authenticate),
            0x06 => Some(Self::StationInfo),
            0x07 => Some(Self::WeatherData),
            0x08 => Some(Self::SampleAcknowledgement),
            0x09 => Some(Self::AuthenticateFailed),
            _ => None,
        }
    }

    /// Name used in statistics and logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Authenticate => "Authenticate",
            Self::StationInfo => "StationInfo",
            Self::WeatherData => "WeatherData",
            Self::SampleAcknowledgement => "SampleAcknowledgement",
            Self::AuthenticateFailed => "AuthenticateFailed",
        }
    }

    /// Check if this packet type is sent by clients.
    pub fn is_client_packet(self) -> bool {
        matches!(self, Self::Authenticate | Self::WeatherData)
    }
}

/// Packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet type.
    pub packet_type: PacketType,
    /// Reserved for future use. Always written as zero, ignored on read.
    pub reserved: u8,
}

impl PacketHeader {
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            packet_type,
            reserved: 0,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        [self.packet_type as u8, 0]
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedHeader.into());
        }

        let packet_type =
            PacketType::from_u8(data[0]).ok_or(ProtocolError::InvalidPacketType(data[0]))?;

        Ok(Self {
            packet_type,
            reserved: data[1],
        })
    }
}

/// Authenticate packet: header + u32 authorisation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatePacket {
    pub authorisation_code: u32,
}

impl AuthenticatePacket {
    pub const SIZE: usize = HEADER_SIZE + 4;

    pub fn new(authorisation_code: u32) -> Self {
        Self { authorisation_code }
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, self.authorisation_code);
        out.extend_from_slice(&buf);
    }

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < 4 {
            return Err(ProtocolError::MalformedPacket("authenticate packet too short".into()).into());
        }
        Ok(Self::new(BigEndian::read_u32(payload)))
    }
}

/// Station list sent in reply to a successful authentication.
///
/// ```text
/// │ Station count │ Image type count │ Image source count │ Stations ... │
/// Station: │ Code (5, NUL padded) │ Hardware type │ Station id │
/// ```
///
/// The image counts are always written as zero; image maps sent by other
/// servers are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationInfoPacket {
    stations: Vec<Station>,
}

impl StationInfoPacket {
    /// Bytes after the header needed to compute the packet size.
    pub const COUNTS_SIZE: usize = 3;
    /// Encoded station record size.
    pub const STATION_SIZE: usize = STATION_CODE_LEN + 2;
    /// Encoded image code-map entry size.
    pub const CODE_MAP_SIZE: usize = STATION_CODE_LEN + 1;

    pub fn new() -> Self {
        Self::default()
    }

    /// Add a station. Codes longer than 5 bytes are rejected.
    pub fn add_station(&mut self, station: Station) -> Result<()> {
        if station.code.len() > STATION_CODE_LEN || station.code.is_empty() {
            return Err(ProtocolError::InvalidStationCode(station.code).into());
        }
        if self.stations.len() >= usize::from(u8::MAX) {
            return Err(ProtocolError::MalformedPacket("too many stations".into()).into());
        }
        self.stations.push(station);
        Ok(())
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[self.stations.len() as u8, 0, 0]);
        for station in &self.stations {
            let mut code = [0u8; STATION_CODE_LEN];
            code[..station.code.len()].copy_from_slice(station.code.as_bytes());
            out.extend_from_slice(&code);
            out.push(station.hardware_type.code());
            out.push(station.id.0);
        }
    }

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::COUNTS_SIZE {
            return Err(ProtocolError::MalformedPacket("station info packet too short".into()).into());
        }

        let count = usize::from(payload[0]);
        let needed = Self::COUNTS_SIZE + count * Self::STATION_SIZE;
        if payload.len() < needed {
            return Err(ProtocolError::Truncated {
                needed: HEADER_SIZE + needed,
                available: HEADER_SIZE + payload.len(),
            }
            .into());
        }

        let mut stations = Vec::with_capacity(count);
        for chunk in payload[Self::COUNTS_SIZE..needed].chunks_exact(Self::STATION_SIZE) {
            let code_len = chunk[..STATION_CODE_LEN]
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(STATION_CODE_LEN);
            let code = String::from_utf8_lossy(&chunk[..code_len]).into_owned();
            let hw_code = chunk[STATION_CODE_LEN];
            let hardware_type = HardwareType::from_u8(hw_code)
                .ok_or_else(|| ProtocolError::UnknownHardwareType(format!("{hw_code:#04x}")))?;
            stations.push(Station::new(code, hardware_type, StationId(chunk[STATION_CODE_LEN + 1])));
        }

        Ok(Self { stations })
    }

    fn size_from_counts(counts: &[u8]) -> usize {
        HEADER_SIZE
            + Self::COUNTS_SIZE
            + usize::from(counts[0]) * Self::STATION_SIZE
            + (usize::from(counts[1]) + usize::from(counts[2])) * Self::CODE_MAP_SIZE
    }
}

/// Weather records, client to server.
///
/// ```text
/// │ Header (2) │ Total length (2) │ Record │ 0x1E │ Record │ 0x1E │ ... │ Record │
/// ```
///
/// A received packet holds its records undecoded until
/// [`WeatherDataPacket::decode_records`] is given the hardware type of each
/// station.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeatherDataPacket {
    records: Vec<WeatherRecord>,
    undecoded: Vec<u8>,
}

impl WeatherDataPacket {
    /// Header plus length field.
    pub const PREFIX_SIZE: usize = HEADER_SIZE + 2;

    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record. A record that depends on another must come after it, or
    /// the server must already have the base.
    pub fn add_record(&mut self, record: impl Into<WeatherRecord>) {
        self.records.push(record.into());
    }

    pub fn records(&self) -> &[WeatherRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<WeatherRecord> {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.undecoded.is_empty()
    }

    /// Encoded packet size.
    pub fn encoded_size(&self) -> usize {
        let records: usize = self.records.iter().map(WeatherRecord::encoded_size).sum();
        Self::PREFIX_SIZE + records + self.records.len().saturating_sub(1)
    }

    /// Decode the received record data using each station's hardware type.
    pub fn decode_records(&mut self, hardware_types: &HashMap<StationId, HardwareType>) -> Result<()> {
        let data = std::mem::take(&mut self.undecoded);
        let mut offset = 0;

        while offset < data.len() {
            let (record, used) =
                WeatherRecord::decode(&data[offset..], |id| hardware_types.get(&id).copied())?;
            offset += used;
            self.records.push(record);

            if data.get(offset) == Some(&RECORD_SEPARATOR) {
                offset += 1;
            }
        }

        Ok(())
    }

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<()> {
        let size = self.encoded_size();
        if size > MAX_PACKET_SIZE {
            return Err(ProtocolError::PacketTooLarge {
                size,
                max: MAX_PACKET_SIZE,
            }
            .into());
        }

        let mut len = [0u8; 2];
        BigEndian::write_u16(&mut len, size as u16);
        out.extend_from_slice(&len);

        for (i, record) in self.records.iter().enumerate() {
            if i > 0 {
                out.push(RECORD_SEPARATOR);
            }
            record.encode_into(out)?;
        }

        Ok(())
    }

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < 2 {
            return Err(ProtocolError::MalformedPacket("weather data packet too short".into()).into());
        }

        let total = usize::from(BigEndian::read_u16(payload));
        let body_len = total.saturating_sub(Self::PREFIX_SIZE).min(payload.len() - 2);

        Ok(Self {
            records: Vec::new(),
            undecoded: payload[2..2 + body_len].to_vec(),
        })
    }
}

/// Samples the server has stored, server to client.
///
/// ```text
/// │ Count (1) │ Station id (1) │ Timestamp (4) │ ... │
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleAcknowledgementPacket {
    acknowledgements: Vec<(StationId, DateTime<Utc>)>,
}

impl SampleAcknowledgementPacket {
    /// Encoded acknowledgement size.
    pub const ENTRY_SIZE: usize = 5;

    pub fn new() -> Self {
        Self::default()
    }

    /// Add an acknowledgement.
    ///
    /// Returns `false`, adding nothing, once the packet holds 255 entries.
    pub fn add_sample_acknowledgement(&mut self, station_id: StationId, timestamp: DateTime<Utc>) -> bool {
        if self.acknowledgements.len() >= MAX_ACKNOWLEDGEMENTS {
            return false;
        }
        self.acknowledgements.push((station_id, timestamp));
        true
    }

    pub fn sample_acknowledgements(&self) -> &[(StationId, DateTime<Utc>)] {
        &self.acknowledgements
    }

    pub fn len(&self) -> usize {
        self.acknowledgements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acknowledgements.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.acknowledgements.len() >= MAX_ACKNOWLEDGEMENTS
    }

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<()> {
        out.push(self.acknowledgements.len() as u8);
        for (station_id, timestamp) in &self.acknowledgements {
            let mut entry = [0u8; Self::ENTRY_SIZE];
            entry[0] = station_id.0;
            BigEndian::write_u32(&mut entry[1..], timestamp_to_wire(*timestamp)?);
            out.extend_from_slice(&entry);
        }
        Ok(())
    }

    fn decode_payload(payload: &[u8]) -> Result<Self> {
        let Some(&count) = payload.first() else {
            return Err(ProtocolError::MalformedPacket("acknowledgement packet too short".into()).into());
        };

        let needed = 1 + usize::from(count) * Self::ENTRY_SIZE;
        if payload.len() < needed {
            return Err(ProtocolError::Truncated {
                needed: HEADER_SIZE + needed,
                available: HEADER_SIZE + payload.len(),
            }
            .into());
        }

        let acknowledgements = payload[1..needed]
            .chunks_exact(Self::ENTRY_SIZE)
            .map(|entry| (StationId(entry[0]), timestamp_from_wire(BigEndian::read_u32(&entry[1..]))))
            .collect();

        Ok(Self { acknowledgements })
    }
}

/// A complete packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Authenticate(AuthenticatePacket),
    StationInfo(StationInfoPacket),
    WeatherData(WeatherDataPacket),
    SampleAcknowledgement(SampleAcknowledgementPacket),
    AuthenticateFailed,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Authenticate(_) => PacketType::Authenticate,
            Self::StationInfo(_) => PacketType::StationInfo,
            Self::WeatherData(_) => PacketType::WeatherData,
            Self::SampleAcknowledgement(_) => PacketType::SampleAcknowledgement,
            Self::AuthenticateFailed => PacketType::AuthenticateFailed,
        }
    }

    /// Size of the encoded packet.
    pub fn encoded_size(&self) -> usize {
        match self {
            Self::Authenticate(_) => AuthenticatePacket::SIZE,
            Self::StationInfo(p) => {
                HEADER_SIZE + StationInfoPacket::COUNTS_SIZE + p.stations.len() * StationInfoPacket::STATION_SIZE
            }
            Self::WeatherData(p) => p.encoded_size(),
            Self::SampleAcknowledgement(p) => {
                HEADER_SIZE + 1 + p.acknowledgements.len() * SampleAcknowledgementPacket::ENTRY_SIZE
            }
            Self::AuthenticateFailed => HEADER_SIZE,
        }
    }

    /// Encode packet to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_size());
        out.extend_from_slice(&PacketHeader::new(self.packet_type()).encode());

        match self {
            Self::Authenticate(p) => p.encode_payload(&mut out),
            Self::StationInfo(p) => p.encode_payload(&mut out),
            Self::WeatherData(p) => p.encode_payload(&mut out)?,
            Self::SampleAcknowledgement(p) => p.encode_payload(&mut out)?,
            Self::AuthenticateFailed => {}
        }

        Ok(out)
    }

    /// Decode one complete packet.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PacketHeader::decode(data)?;
        let payload = &data[HEADER_SIZE..];

        Ok(match header.packet_type {
            PacketType::Authenticate => Self::Authenticate(AuthenticatePacket::decode_payload(payload)?),
            PacketType::StationInfo => Self::StationInfo(StationInfoPacket::decode_payload(payload)?),
            PacketType::WeatherData => Self::WeatherData(WeatherDataPacket::decode_payload(payload)?),
            PacketType::SampleAcknowledgement => {
                Self::SampleAcknowledgement(SampleAcknowledgementPacket::decode_payload(payload)?)
            }
            PacketType::AuthenticateFailed => Self::AuthenticateFailed,
        })
    }

    /// Total size of the packet starting at `prefix`.
    ///
    /// Returns `Ok(None)` if more bytes are needed to tell.
    pub fn size_from_prefix(prefix: &[u8]) -> Result<Option<usize>> {
        let Some(&type_byte) = prefix.first() else {
            return Ok(None);
        };
        let packet_type = PacketType::from_u8(type_byte).ok_or(ProtocolError::InvalidPacketType(type_byte))?;

        let size = match packet_type {
            PacketType::Authenticate => Some(AuthenticatePacket::SIZE),
            PacketType::AuthenticateFailed => Some(HEADER_SIZE),
            PacketType::StationInfo => prefix
                .get(HEADER_SIZE..HEADER_SIZE + StationInfoPacket::COUNTS_SIZE)
                .map(StationInfoPacket::size_from_counts),
            PacketType::WeatherData => prefix
                .get(HEADER_SIZE..WeatherDataPacket::PREFIX_SIZE)
                .map(|len| usize::from(BigEndian::read_u16(len))),
            PacketType::SampleAcknowledgement => prefix
                .get(HEADER_SIZE)
                .map(|&count| HEADER_SIZE + 1 + usize::from(count) * SampleAcknowledgementPacket::ENTRY_SIZE),
        };

        match size {
            Some(size) if packet_type == PacketType::WeatherData && size < WeatherDataPacket::PREFIX_SIZE => {
                Err(ProtocolError::MalformedPacket(format!("weather data length {size} too short")).into())
            }
            other => Ok(other),
        }
    }
}

impl From<AuthenticatePacket> for Packet {
    fn from(p: AuthenticatePacket) -> Self {
        Self::Authenticate(p)
    }
}

impl From<StationInfoPacket> for Packet {
    fn from(p: StationInfoPacket) -> Self {
        Self::StationInfo(p)
    }
}

impl From<WeatherDataPacket> for Packet {
    fn from(p: WeatherDataPacket) -> Self {
        Self::WeatherData(p)
    }
}

impl From<SampleAcknowledgementPacket> for Packet {
    fn from(p: SampleAcknowledgementPacket) -> Self {
        Self::SampleAcknowledgement(p)
    }
}
