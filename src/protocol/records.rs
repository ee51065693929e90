//! Weather data records.

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Utc};

use super::{timestamp_from_wire, timestamp_to_wire};
use crate::error::{ProtocolError, Result};
use crate::fields::{calculate_encoded_size, FieldSet, FieldTable};
use crate::types::{HardwareType, RecordKind, SequenceId, StationId};

/// Record type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    /// Live data record.
    Live = 0x01,
    /// Sample data record.
    Sample = 0x02,
}

impl RecordType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Live),
            0x02 => Some(Self::Sample),
            _ => None,
        }
    }
}

/// A live data record as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveDataRecord {
    pub station_id: StationId,
    pub sequence_id: SequenceId,
    /// Fields present in `field_data`, diff reference included.
    pub field_ids: FieldSet,
    /// Encoded field values.
    pub field_data: Vec<u8>,
}

impl LiveDataRecord {
    /// Record type + station + sequence + field mask.
    pub const HEADER_SIZE: usize = 8;

    /// Exact encoded size for a station of the given hardware type.
    pub fn calculated_record_size(&self, hardware_type: HardwareType) -> usize {
        Self::HEADER_SIZE + calculate_encoded_size(FieldTable::live(hardware_type), self.field_ids)
    }

    /// Encoded size of this record as built.
    pub fn encoded_size(&self) -> usize {
        Self::HEADER_SIZE + self.field_data.len()
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        let mut header = [0u8; Self::HEADER_SIZE];
        header[0] = RecordType::Live as u8;
        header[1] = self.station_id.0;
        BigEndian::write_u16(&mut header[2..4], self.sequence_id.0);
        BigEndian::write_u32(&mut header[4..8], self.field_ids.bits());
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.field_data);
    }

    /// Parse the header. `field_data` is left empty.
    fn decode_header(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: Self::HEADER_SIZE,
                available: data.len(),
            }
            .into());
        }

        Ok(Self {
            station_id: StationId(data[1]),
            sequence_id: SequenceId(BigEndian::read_u16(&data[2..4])),
            field_ids: FieldSet::from_bits(BigEndian::read_u32(&data[4..8])),
            field_data: Vec::new(),
        })
    }
}

/// A sample data record as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleDataRecord {
    pub station_id: StationId,
    /// When the sample was recorded (UTC).
    pub timestamp: DateTime<Utc>,
    /// When the sample was downloaded from the station (UTC).
    pub download_timestamp: DateTime<Utc>,
    /// Fields present in `field_data`, diff reference included.
    pub field_ids: FieldSet,
    /// Encoded field values.
    pub field_data: Vec<u8>,
}

impl SampleDataRecord {
    /// Record type + station + two timestamps + field mask.
    pub const HEADER_SIZE: usize = 14;

    /// Exact encoded size for a station of the given hardware type.
    pub fn calculated_record_size(&self, hardware_type: HardwareType) -> usize {
        Self::HEADER_SIZE + calculate_encoded_size(FieldTable::sample(hardware_type), self.field_ids)
    }

    /// Encoded size of this record as built.
    pub fn encoded_size(&self) -> usize {
        Self::HEADER_SIZE + self.field_data.len()
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut header = [0u8; Self::HEADER_SIZE];
        header[0] = RecordType::Sample as u8;
        header[1] = self.station_id.0;
        BigEndian::write_u32(&mut header[2..6], timestamp_to_wire(self.timestamp)?);
        BigEndian::write_u32(&mut header[6..10], timestamp_to_wire(self.download_timestamp)?);
        BigEndian::write_u32(&mut header[10..14], self.field_ids.bits());
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.field_data);
        Ok(())
    }

    fn decode_header(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: Self::HEADER_SIZE,
                available: data.len(),
            }
            .into());
        }

        Ok(Self {
            station_id: StationId(data[1]),
            timestamp: timestamp_from_wire(BigEndian::read_u32(&data[2..6])),
            download_timestamp: timestamp_from_wire(BigEndian::read_u32(&data[6..10])),
            field_ids: FieldSet::from_bits(BigEndian::read_u32(&data[10..14])),
            field_data: Vec::new(),
        })
    }
}

/// Either kind of weather record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeatherRecord {
    Live(LiveDataRecord),
    Sample(SampleDataRecord),
}

impl WeatherRecord {
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Live(_) => RecordType::Live,
            Self::Sample(_) => RecordType::Sample,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Live(_) => RecordKind::Live,
            Self::Sample(_) => RecordKind::Sample,
        }
    }

    pub fn station_id(&self) -> StationId {
        match self {
            Self::Live(r) => r.station_id,
            Self::Sample(r) => r.station_id,
        }
    }

    pub fn field_ids(&self) -> FieldSet {
        match self {
            Self::Live(r) => r.field_ids,
            Self::Sample(r) => r.field_ids,
        }
    }

    /// Exact encoded size derived from the field mask.
    pub fn calculated_record_size(&self, hardware_type: HardwareType) -> usize {
        match self {
            Self::Live(r) => r.calculated_record_size(hardware_type),
            Self::Sample(r) => r.calculated_record_size(hardware_type),
        }
    }

    pub fn encoded_size(&self) -> usize {
        match self {
            Self::Live(r) => r.encoded_size(),
            Self::Sample(r) => r.encoded_size(),
        }
    }

    /// Append the encoded record to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::Live(r) => {
                r.encode_into(out);
                Ok(())
            }
            Self::Sample(r) => r.encode_into(out),
        }
    }

    /// Decode one record from the front of `data`.
    ///
    /// `hardware_type` resolves the station id found in the record header; the
    /// record's size is then derived from its field mask. Returns the record
    /// and the number of bytes consumed.
    pub fn decode<F>(data: &[u8], hardware_type: F) -> Result<(Self, usize)>
    where
        F: Fn(StationId) -> Option<HardwareType>,
    {
        let Some(&type_byte) = data.first() else {
            return Err(ProtocolError::Truncated {
                needed: 1,
                available: 0,
            }
            .into());
        };

        let mut record = match RecordType::from_u8(type_byte) {
            Some(RecordType::Live) => Self::Live(LiveDataRecord::decode_header(data)?),
            Some(RecordType::Sample) => Self::Sample(SampleDataRecord::decode_header(data)?),
            None => return Err(ProtocolError::InvalidRecordType(type_byte).into()),
        };

        let station_id = record.station_id();
        let hw = hardware_type(station_id).ok_or(ProtocolError::UnknownStation(station_id))?;

        let size = record.calculated_record_size(hw);
        if data.len() < size {
            return Err(ProtocolError::Truncated {
                needed: size,
                available: data.len(),
            }
            .into());
        }

        match &mut record {
            Self::Live(r) => r.field_data = data[LiveDataRecord::HEADER_SIZE..size].to_vec(),
            Self::Sample(r) => r.field_data = data[SampleDataRecord::HEADER_SIZE..size].to_vec(),
        }

        Ok((record, size))
    }
}

impl From<LiveDataRecord> for WeatherRecord {
    fn from(r: LiveDataRecord) -> Self {
        Self::Live(r)
    }
}

impl From<SampleDataRecord> for WeatherRecord {
    fn from(r: SampleDataRecord) -> Self {
        Self::Sample(r)
    }
}
