//! Core types used throughout the protocol engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ProtocolError};
use crate::fields::FieldValues;

/// Server-assigned identifier for a station, valid for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StationId(pub u8);

impl StationId {
    pub fn new(id: u8) -> Self {
        Self(id)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for StationId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

/// Live record sequence number. Wraps from 65535 back to 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceId(pub u16);

impl SequenceId {
    pub const ZERO: Self = Self(0);

    pub fn new(n: u16) -> Self {
        Self(n)
    }

    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    pub fn previous(self) -> Self {
        Self(self.0.wrapping_sub(1))
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Weather station hardware family.
///
/// Selects the field table used to encode and decode a station's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum HardwareType {
    /// Generic station with the basic field set.
    Generic = 0x01,
    /// Fine Offset WH1080 and compatibles.
    Fowh1080 = 0x02,
    /// Davis Vantage Pro2 / Vue.
    Davis = 0x03,
}

impl HardwareType {
    pub const ALL: [Self; 3] = [Self::Generic, Self::Fowh1080, Self::Davis];

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Generic),
            0x02 => Some(Self::Fowh1080),
            0x03 => Some(Self::Davis),
            _ => None,
        }
    }

    /// Wire code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Canonical upper-case name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Generic => "GENERIC",
            Self::Fowh1080 => "FOWH1080",
            Self::Davis => "DAVIS",
        }
    }
}

impl fmt::Display for HardwareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HardwareType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GENERIC" => Ok(Self::Generic),
            "FOWH1080" => Ok(Self::Fowh1080),
            "DAVIS" => Ok(Self::Davis),
            other => Err(ProtocolError::UnknownHardwareType(other.to_string()).into()),
        }
    }
}

/// Kind of weather record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Instantaneous readings, identified by sequence id.
    Live,
    /// Archived observation, identified by timestamp.
    Sample,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => f.write_str("live"),
            Self::Sample => f.write_str("sample"),
        }
    }
}

/// A station the server accepts data for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    /// Short station code (at most 5 bytes).
    pub code: String,
    /// Hardware family.
    pub hardware_type: HardwareType,
    /// Id assigned by the server for this connection.
    pub id: StationId,
}

impl Station {
    pub fn new(code: impl Into<String>, hardware_type: HardwareType, id: StationId) -> Self {
        Self {
            code: code.into(),
            hardware_type,
            id,
        }
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, id {})", self.code, self.hardware_type, self.id)
    }
}

/// A complete live record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveData {
    pub sequence_id: SequenceId,
    pub values: FieldValues,
}

impl LiveData {
    pub fn new(sequence_id: SequenceId, values: FieldValues) -> Self {
        Self { sequence_id, values }
    }
}

/// A complete sample record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleData {
    /// When the observation period ended.
    pub timestamp: DateTime<Utc>,
    /// When the sample was read from the station.
    pub download_timestamp: DateTime<Utc>,
    pub values: FieldValues,
}

impl SampleData {
    pub fn new(timestamp: DateTime<Utc>, download_timestamp: DateTime<Utc>, values: FieldValues) -> Self {
        Self {
            timestamp,
            download_timestamp,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_wraps() {
        assert_eq!(SequenceId(65535).next(), SequenceId(0));
        assert_eq!(SequenceId(0).previous(), SequenceId(65535));
        assert_eq!(SequenceId(41).next().get(), 42);
    }

    #[test]
    fn test_hardware_type_codes() {
        for hw in HardwareType::ALL {
            assert_eq!(HardwareType::from_u8(hw.code()), Some(hw));
            assert_eq!(hw.name().parse::<HardwareType>().unwrap(), hw);
        }
        assert_eq!(HardwareType::from_u8(0x04), None);
        assert!("vantage".parse::<HardwareType>().is_err());
        assert_eq!("davis".parse::<HardwareType>().unwrap(), HardwareType::Davis);
    }
}
