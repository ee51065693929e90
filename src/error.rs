//! Error types for the weather push engine.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::types::{HardwareType, RecordKind, SequenceId, StationId};

/// Result type alias for weather push operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // Field encoding errors
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    // Session errors
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("connection closed")]
    ConnectionClosed,

    // Collaborator errors
    #[error("database error: {0}")]
    Database(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Packet and record framing errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid packet type: {0:#04x}")]
    InvalidPacketType(u8),

    #[error("invalid record type: {0:#04x}")]
    InvalidRecordType(u8),

    #[error("unknown hardware type: {0}")]
    UnknownHardwareType(String),

    #[error("malformed header")]
    MalformedHeader,

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("truncated data: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("unknown station id {0}")]
    UnknownStation(StationId),

    #[error("invalid station code {0:?}")]
    InvalidStationCode(String),

    #[error("field {field_id} is not defined for {hardware_type} {kind} records")]
    UndefinedField {
        field_id: u8,
        hardware_type: HardwareType,
        kind: RecordKind,
    },
}

/// Field value errors.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("no field named {name:?} in the {hardware_type} {kind} table")]
    UnknownField {
        name: String,
        hardware_type: HardwareType,
        kind: RecordKind,
    },

    #[error("field {field} expects {expected} value")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
    },

    #[error("value for field {field} out of range: {value}")]
    OutOfRange { field: &'static str, value: String },

    #[error("field {0} does not accept null values")]
    NotNullable(&'static str),

    #[error("timestamp out of range for wire encoding")]
    TimestampOutOfRange,
}

/// Session state errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("authentication rejected")]
    AuthenticationFailed,

    #[error("station {0:?} is not accepted by the server")]
    UnknownStation(String),

    #[error("live record {sequence} for station {station} could not be reconstructed")]
    MissingLiveBase {
        station: StationId,
        sequence: SequenceId,
    },

    #[error("station {station:?} is {expected} hardware, got {actual} values")]
    HardwareMismatch {
        station: String,
        expected: HardwareType,
        actual: HardwareType,
    },

    #[error("expected {expected} values, got {actual} values")]
    WrongRecordKind { expected: RecordKind, actual: RecordKind },

    #[error("outgoing channel closed")]
    ChannelClosed,
}

impl Error {
    /// Check if error is recoverable (the connection may carry on).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Database(_)
                | Error::Codec(_)
                | Error::Session(SessionError::UnknownStation(_) | SessionError::MissingLiveBase { .. })
                | Error::Protocol(ProtocolError::UnknownStation(_) | ProtocolError::UndefinedField { .. })
        )
    }

    /// Check if error indicates the connection should be re-established.
    pub fn should_reconnect(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed
                | Error::Io(_)
                | Error::Session(SessionError::ChannelClosed)
                | Error::Protocol(
                    ProtocolError::InvalidPacketType(_)
                        | ProtocolError::MalformedHeader
                        | ProtocolError::PacketTooLarge { .. }
                )
        )
    }
}

/// Error context for log lines.
#[derive(Debug)]
pub struct ErrorContext {
    pub station: Option<StationId>,
    pub sequence: Option<SequenceId>,
    pub operation: String,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation={}", self.operation)?;
        if let Some(station) = self.station {
            write!(f, ", station={station}")?;
        }
        if let Some(sequence) = self.sequence {
            write!(f, ", sequence={sequence}")?;
        }
        Ok(())
    }
}
