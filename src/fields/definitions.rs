//! Field tables.
//!
//! Every hardware type has one table for live records and one for sample
//! records. A field id is a bit position in the record's field bit-mask and
//! means different things (or nothing) depending on the table.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc};

use super::values::FieldValue;
use super::FieldSet;
use crate::error::{CodecError, Result};
use crate::types::{HardwareType, RecordKind};

/// Live-diff reference: sequence id of the base live record.
pub const LIVE_DIFF_SEQUENCE: u8 = 0;

/// Sample-diff reference: timestamp of the base sample record.
pub const SAMPLE_DIFF_TIMESTAMP: u8 = 1;

/// Storage type of a field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    I8,
    U8,
    I16,
    U16,
    U32,
    Bool,
    /// Three byte, NUL padded text.
    Text3,
}

impl FieldType {
    /// Encoded width in bytes.
    pub const fn width(self) -> usize {
        match self {
            Self::I8 | Self::U8 | Self::Bool => 1,
            Self::I16 | Self::U16 => 2,
            Self::Text3 => 3,
            Self::U32 => 4,
        }
    }

    /// Sentinel used for null by nullable fields of this type.
    pub const fn null_sentinel(self) -> Option<i64> {
        match self {
            Self::I8 => Some(i8::MIN as i64),
            Self::U8 => Some(u8::MAX as i64),
            Self::I16 => Some(i16::MIN as i64),
            Self::U16 => Some(u16::MAX as i64),
            Self::U32 => Some(u32::MAX as i64),
            Self::Text3 => Some(0x00FF_FFFF),
            Self::Bool => None,
        }
    }

    /// Inclusive raw value range.
    pub const fn range(self) -> (i64, i64) {
        match self {
            Self::I8 => (i8::MIN as i64, i8::MAX as i64),
            Self::U8 => (0, u8::MAX as i64),
            Self::I16 => (i16::MIN as i64, i16::MAX as i64),
            Self::U16 => (0, u16::MAX as i64),
            Self::U32 => (0, u32::MAX as i64),
            Self::Bool => (0, 1),
            Self::Text3 => (0, 0x00FF_FFFF),
        }
    }
}

/// Conversion between a field's logical value and its raw wire integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Integers, flags and text stored as-is.
    Identity,
    /// Decimal value stored as `round(value * 10^places)`.
    Decimal(u8),
    /// UTC timestamp stored as seconds since the Unix epoch.
    Timestamp,
    /// Calendar date packed as `(year - 2000) << 9 | month << 5 | day`.
    Date,
    /// Time of day packed as `hour * 100 + minute`. Raw 0 decodes to null.
    Time,
    /// Evapotranspiration in millimetres stored as thousandths of an inch.
    Evapotranspiration,
}

impl Transform {
    fn scale(places: u8) -> f64 {
        10f64.powi(i32::from(places))
    }

    /// Name of the value shape this transform accepts, for error messages.
    pub fn expects(self, field_type: FieldType) -> &'static str {
        match (self, field_type) {
            (Self::Identity, FieldType::Bool) => "a boolean",
            (Self::Identity, FieldType::Text3) => "a text",
            (Self::Identity, _) => "an integer",
            (Self::Decimal(_) | Self::Evapotranspiration, _) => "a decimal",
            (Self::Timestamp, _) => "a timestamp",
            (Self::Date, _) => "a date",
            (Self::Time, _) => "a time",
        }
    }

    /// Coerce a value into the shape this transform stores, if compatible.
    pub fn accept(self, field_type: FieldType, value: FieldValue) -> Option<FieldValue> {
        match (self, field_type, value) {
            (Self::Identity, FieldType::Bool, v @ FieldValue::Flag(_)) => Some(v),
            (Self::Identity, FieldType::Text3, FieldValue::Text(s)) if s.len() <= 3 => {
                Some(FieldValue::Text(s))
            }
            (Self::Identity, FieldType::Bool | FieldType::Text3, _) => None,
            (Self::Identity, _, v @ FieldValue::Integer(_)) => Some(v),
            (Self::Decimal(_) | Self::Evapotranspiration, _, v @ FieldValue::Decimal(_)) => Some(v),
            (Self::Decimal(_) | Self::Evapotranspiration, _, FieldValue::Integer(i)) => {
                Some(FieldValue::Decimal(i as f64))
            }
            (Self::Timestamp, _, v @ FieldValue::Timestamp(_)) => Some(v),
            (Self::Date, _, v @ FieldValue::Date(_)) => Some(v),
            (Self::Time, _, v @ FieldValue::Time(_)) => Some(v),
            _ => None,
        }
    }

    /// Convert a logical value to its raw wire integer.
    pub fn to_raw(self, def: &FieldDefinition, value: &FieldValue) -> Result<i64> {
        let mismatch = || CodecError::TypeMismatch {
            field: def.display_name(),
            expected: self.expects(def.field_type),
        };

        let raw = match (self, value) {
            (Self::Identity, FieldValue::Integer(i)) => *i,
            (Self::Identity, FieldValue::Flag(b)) => i64::from(*b),
            (Self::Identity, FieldValue::Text(s)) => {
                let bytes = s.as_bytes();
                if bytes.len() > 3 {
                    return Err(CodecError::OutOfRange {
                        field: def.display_name(),
                        value: s.clone(),
                    }
                    .into());
                }
                let mut raw = 0i64;
                for i in 0..3 {
                    raw = (raw << 8) | i64::from(bytes.get(i).copied().unwrap_or(0));
                }
                raw
            }
            (Self::Decimal(places), FieldValue::Decimal(v)) => {
                (v * Self::scale(places)).round() as i64
            }
            (Self::Evapotranspiration, FieldValue::Decimal(v)) => {
                (v / 25.4 * 1000.0).round() as i64
            }
            (Self::Timestamp, FieldValue::Timestamp(ts)) => {
                let secs = ts.timestamp();
                if !(0..=i64::from(u32::MAX)).contains(&secs) {
                    return Err(CodecError::TimestampOutOfRange.into());
                }
                secs
            }
            (Self::Date, FieldValue::Date(date)) => {
                let year = i64::from(date.year()) - 2000;
                if !(0..=127).contains(&year) {
                    return Err(CodecError::OutOfRange {
                        field: def.display_name(),
                        value: date.to_string(),
                    }
                    .into());
                }
                (year << 9) + (i64::from(date.month()) << 5) + i64::from(date.day())
            }
            (Self::Time, FieldValue::Time(time)) => {
                i64::from(time.hour()) * 100 + i64::from(time.minute())
            }
            _ => return Err(mismatch().into()),
        };

        Ok(raw)
    }

    /// Convert a raw wire integer back to a logical value.
    ///
    /// Returns `None` for raw values with no meaningful decoding (for example
    /// a packed date with month 13).
    pub fn from_raw(self, field_type: FieldType, raw: i64) -> Option<FieldValue> {
        match self {
            Self::Identity => match field_type {
                FieldType::Bool => Some(FieldValue::Flag(raw != 0)),
                FieldType::Text3 => {
                    let bytes = [(raw >> 16) as u8, (raw >> 8) as u8, raw as u8];
                    let len = bytes.iter().position(|&b| b == 0).unwrap_or(3);
                    Some(FieldValue::Text(
                        String::from_utf8_lossy(&bytes[..len]).into_owned(),
                    ))
                }
                _ => Some(FieldValue::Integer(raw)),
            },
            Self::Decimal(places) => Some(FieldValue::Decimal(raw as f64 / Self::scale(places))),
            Self::Evapotranspiration => Some(FieldValue::Decimal(raw as f64 / 1000.0 * 25.4)),
            Self::Timestamp => DateTime::<Utc>::from_timestamp(raw, 0).map(FieldValue::Timestamp),
            Self::Date => {
                if raw <= 0 || raw >= 0xFFFF {
                    return None;
                }
                let year = 2000 + ((raw & 0xFE00) >> 9) as i32;
                let month = ((raw & 0x01E0) >> 5) as u32;
                let day = (raw & 0x001F) as u32;
                NaiveDate::from_ymd_opt(year, month, day).map(FieldValue::Date)
            }
            Self::Time => {
                if raw <= 0 || raw >= 0xFFFF {
                    return None;
                }
                NaiveTime::from_hms_opt((raw / 100) as u32, (raw % 100) as u32, 0)
                    .map(FieldValue::Time)
            }
        }
    }
}

/// One entry in a field table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDefinition {
    /// Bit position in the field bit-mask (0-31).
    pub id: u8,
    /// Field name. `None` marks a reserved id that is never encoded.
    pub name: Option<&'static str>,
    /// Storage type.
    pub field_type: FieldType,
    /// Value conversion.
    pub transform: Transform,
    /// Raw value meaning "no value", if the field is nullable.
    pub null: Option<i64>,
}

impl FieldDefinition {
    const fn nullable(id: u8, name: &'static str, field_type: FieldType, transform: Transform) -> Self {
        Self {
            id,
            name: Some(name),
            field_type,
            transform,
            null: field_type.null_sentinel(),
        }
    }

    const fn not_null(id: u8, name: &'static str, field_type: FieldType, transform: Transform) -> Self {
        Self {
            id,
            name: Some(name),
            field_type,
            transform,
            null: None,
        }
    }

    const fn unused(id: u8) -> Self {
        Self {
            id,
            name: None,
            field_type: FieldType::U8,
            transform: Transform::Identity,
            null: None,
        }
    }

    /// Encoded width in bytes.
    pub const fn width(&self) -> usize {
        self.field_type.width()
    }

    pub const fn is_named(&self) -> bool {
        self.name.is_some()
    }

    pub fn display_name(&self) -> &'static str {
        self.name.unwrap_or("<unused>")
    }
}

use FieldType::{Bool, Text3, I16, I8, U16, U32, U8};
use Transform::{Date, Decimal, Evapotranspiration, Identity, Time, Timestamp};

const D1: Transform = Decimal(1);
const D2: Transform = Decimal(2);

static GENERIC_LIVE: [FieldDefinition; 11] = [
    FieldDefinition::not_null(0, "live_diff_sequence", U16, Identity),
    FieldDefinition::not_null(1, "sample_diff_timestamp", U32, Timestamp),
    FieldDefinition::nullable(2, "indoor_humidity", U8, Identity),
    FieldDefinition::nullable(3, "indoor_temperature", I16, D2),
    FieldDefinition::nullable(4, "temperature", I16, D2),
    FieldDefinition::nullable(5, "humidity", U8, Identity),
    FieldDefinition::nullable(6, "pressure", U16, D1),
    FieldDefinition::nullable(7, "msl_pressure", U16, D1),
    FieldDefinition::nullable(8, "average_wind_speed", U16, D1),
    FieldDefinition::nullable(9, "gust_wind_speed", U16, D1),
    FieldDefinition::nullable(10, "wind_direction", U16, Identity),
];

static DAVIS_LIVE: [FieldDefinition; 32] = [
    FieldDefinition::not_null(0, "live_diff_sequence", U16, Identity),
    FieldDefinition::not_null(1, "sample_diff_timestamp", U32, Timestamp),
    FieldDefinition::nullable(2, "indoor_humidity", U8, Identity),
    FieldDefinition::nullable(3, "indoor_temperature", I16, D2),
    FieldDefinition::nullable(4, "temperature", I16, D2),
    FieldDefinition::nullable(5, "humidity", U8, Identity),
    FieldDefinition::nullable(6, "pressure", U16, D1),
    FieldDefinition::nullable(7, "msl_pressure", U16, D1),
    FieldDefinition::nullable(8, "average_wind_speed", U16, D1),
    FieldDefinition::nullable(9, "gust_wind_speed", U16, D1),
    FieldDefinition::nullable(10, "wind_direction", U16, Identity),
    FieldDefinition::unused(11),
    FieldDefinition::nullable(12, "bar_trend", I8, Identity),
    FieldDefinition::nullable(13, "rain_rate", U16, D1),
    FieldDefinition::nullable(14, "storm_rain", U16, D1),
    FieldDefinition::nullable(15, "current_storm_start_date", U16, Date),
    FieldDefinition::nullable(16, "transmitter_battery", U8, Identity),
    FieldDefinition::nullable(17, "console_battery_voltage", U16, D1),
    FieldDefinition::nullable(18, "forecast_icon", U8, Identity),
    FieldDefinition::nullable(19, "forecast_rule_id", U8, Identity),
    FieldDefinition::nullable(20, "uv_index", U8, D1),
    FieldDefinition::nullable(21, "solar_radiation", U16, Identity),
    FieldDefinition::nullable(22, "average_wind_speed_2m", U16, D1),
    FieldDefinition::nullable(23, "average_wind_speed_10m", U16, D1),
    FieldDefinition::nullable(24, "gust_wind_speed_10m", U16, D1),
    FieldDefinition::nullable(25, "gust_wind_direction_10m", U16, Identity),
    FieldDefinition::nullable(26, "heat_index", I16, D2),
    FieldDefinition::nullable(27, "thsw_index", I16, D2),
    FieldDefinition::nullable(28, "altimeter_setting", U16, D1),
    FieldDefinition::unused(29),
    FieldDefinition::unused(30),
    // Extra sensor sub-field set; not carried.
    FieldDefinition::unused(31),
];

static GENERIC_SAMPLE: [FieldDefinition; 12] = [
    FieldDefinition::unused(0),
    FieldDefinition::not_null(1, "sample_diff_timestamp", U32, Timestamp),
    FieldDefinition::nullable(2, "indoor_humidity", U8, Identity),
    FieldDefinition::nullable(3, "indoor_temperature", I16, D2),
    FieldDefinition::nullable(4, "temperature", I16, D2),
    FieldDefinition::nullable(5, "humidity", U8, Identity),
    FieldDefinition::nullable(6, "pressure", U16, D1),
    FieldDefinition::nullable(7, "msl_pressure", U16, D1),
    FieldDefinition::nullable(8, "average_wind_speed", U16, D1),
    FieldDefinition::nullable(9, "gust_wind_speed", U16, D1),
    FieldDefinition::nullable(10, "wind_direction", U16, Identity),
    FieldDefinition::nullable(11, "rainfall", U16, D1),
];

static FOWH1080_SAMPLE: [FieldDefinition; 19] = [
    FieldDefinition::unused(0),
    FieldDefinition::not_null(1, "sample_diff_timestamp", U32, Timestamp),
    FieldDefinition::nullable(2, "indoor_humidity", U8, Identity),
    FieldDefinition::nullable(3, "indoor_temperature", I16, D2),
    FieldDefinition::nullable(4, "temperature", I16, D2),
    FieldDefinition::nullable(5, "humidity", U8, Identity),
    FieldDefinition::nullable(6, "pressure", U16, D1),
    FieldDefinition::nullable(7, "msl_pressure", U16, D1),
    FieldDefinition::nullable(8, "average_wind_speed", U16, D1),
    FieldDefinition::nullable(9, "gust_wind_speed", U16, D1),
    FieldDefinition::nullable(10, "wind_direction", U16, Identity),
    FieldDefinition::nullable(11, "rainfall", U16, D1),
    FieldDefinition::nullable(12, "sample_interval", U8, Identity),
    FieldDefinition::nullable(13, "record_number", U16, Identity),
    FieldDefinition::not_null(14, "last_in_batch", Bool, Identity),
    FieldDefinition::not_null(15, "invalid_data", Bool, Identity),
    FieldDefinition::nullable(16, "wh1080_wind_direction", Text3, Identity),
    FieldDefinition::nullable(17, "total_rain", U32, D1),
    FieldDefinition::not_null(18, "rain_overflow", Bool, Identity),
];

static DAVIS_SAMPLE: [FieldDefinition; 32] = [
    FieldDefinition::unused(0),
    FieldDefinition::not_null(1, "sample_diff_timestamp", U32, Timestamp),
    FieldDefinition::nullable(2, "indoor_humidity", U8, Identity),
    FieldDefinition::nullable(3, "indoor_temperature", I16, D2),
    FieldDefinition::nullable(4, "temperature", I16, D2),
    FieldDefinition::nullable(5, "humidity", U8, Identity),
    FieldDefinition::nullable(6, "pressure", U16, D1),
    FieldDefinition::nullable(7, "msl_pressure", U16, D1),
    FieldDefinition::nullable(8, "average_wind_speed", U16, D1),
    FieldDefinition::nullable(9, "gust_wind_speed", U16, D1),
    FieldDefinition::nullable(10, "wind_direction", U16, Identity),
    FieldDefinition::nullable(11, "rainfall", U16, D1),
    FieldDefinition::not_null(12, "record_time", U16, Time),
    FieldDefinition::not_null(13, "record_date", U16, Date),
    FieldDefinition::nullable(14, "high_temperature", I16, D2),
    FieldDefinition::nullable(15, "low_temperature", I16, D2),
    FieldDefinition::nullable(16, "high_rain_rate", I16, D1),
    FieldDefinition::nullable(17, "solar_radiation", U16, Identity),
    FieldDefinition::nullable(18, "wind_sample_count", U8, Identity),
    FieldDefinition::nullable(19, "gust_wind_direction", U16, D1),
    FieldDefinition::nullable(20, "average_uv_index", U8, D1),
    FieldDefinition::not_null(21, "evapotranspiration", U8, Evapotranspiration),
    FieldDefinition::nullable(22, "high_solar_radiation", U16, Identity),
    FieldDefinition::nullable(23, "high_uv_index", U8, D1),
    FieldDefinition::nullable(24, "forecast_rule_id", U8, Identity),
    FieldDefinition::unused(25),
    FieldDefinition::unused(26),
    FieldDefinition::unused(27),
    FieldDefinition::unused(28),
    FieldDefinition::unused(29),
    FieldDefinition::unused(30),
    // Extra sensor sub-field set; not carried.
    FieldDefinition::unused(31),
];

/// Field ids shared by live and sample records with the same meaning.
pub const COMMON_LIVE_SAMPLE_IDS: FieldSet = FieldSet::range(1, 10);

/// The field table for one hardware type and record kind.
#[derive(Debug)]
pub struct FieldTable {
    pub hardware_type: HardwareType,
    pub kind: RecordKind,
    fields: &'static [FieldDefinition],
    data_ids: FieldSet,
}

static TABLES: [FieldTable; 6] = [
    FieldTable {
        hardware_type: HardwareType::Generic,
        kind: RecordKind::Live,
        fields: &GENERIC_LIVE,
        data_ids: FieldSet::range(2, 10),
    },
    FieldTable {
        hardware_type: HardwareType::Fowh1080,
        kind: RecordKind::Live,
        fields: &GENERIC_LIVE,
        data_ids: FieldSet::range(2, 10),
    },
    FieldTable {
        hardware_type: HardwareType::Davis,
        kind: RecordKind::Live,
        fields: &DAVIS_LIVE,
        data_ids: FieldSet::range(2, 10).union(FieldSet::range(12, 28)),
    },
    FieldTable {
        hardware_type: HardwareType::Generic,
        kind: RecordKind::Sample,
        fields: &GENERIC_SAMPLE,
        data_ids: FieldSet::range(2, 11),
    },
    FieldTable {
        hardware_type: HardwareType::Fowh1080,
        kind: RecordKind::Sample,
        fields: &FOWH1080_SAMPLE,
        data_ids: FieldSet::range(2, 18),
    },
    FieldTable {
        hardware_type: HardwareType::Davis,
        kind: RecordKind::Sample,
        fields: &DAVIS_SAMPLE,
        data_ids: FieldSet::range(2, 24),
    },
];

impl FieldTable {
    /// Table for the given hardware type and record kind.
    pub fn get(hardware_type: HardwareType, kind: RecordKind) -> &'static Self {
        let index = match (kind, hardware_type) {
            (RecordKind::Live, HardwareType::Generic) => 0,
            (RecordKind::Live, HardwareType::Fowh1080) => 1,
            (RecordKind::Live, HardwareType::Davis) => 2,
            (RecordKind::Sample, HardwareType::Generic) => 3,
            (RecordKind::Sample, HardwareType::Fowh1080) => 4,
            (RecordKind::Sample, HardwareType::Davis) => 5,
        };
        &TABLES[index]
    }

    pub fn live(hardware_type: HardwareType) -> &'static Self {
        Self::get(hardware_type, RecordKind::Live)
    }

    pub fn sample(hardware_type: HardwareType) -> &'static Self {
        Self::get(hardware_type, RecordKind::Sample)
    }

    /// Definition for a field id, named or reserved. `None` if the id is
    /// outside the table.
    pub fn definition(&self, id: u8) -> Option<&'static FieldDefinition> {
        self.fields.iter().find(|def| def.id == id)
    }

    /// Definition for a named field.
    pub fn by_name(&self, name: &str) -> Option<&'static FieldDefinition> {
        self.fields.iter().find(|def| def.name == Some(name))
    }

    /// Whether `id` maps to a named field.
    pub fn is_named(&self, id: u8) -> bool {
        self.definition(id).is_some_and(FieldDefinition::is_named)
    }

    /// All definitions in id order.
    pub fn definitions(&self) -> impl Iterator<Item = &'static FieldDefinition> {
        self.fields.iter()
    }

    /// Every data field a full record of this kind carries.
    pub fn data_ids(&self) -> FieldSet {
        self.data_ids
    }

    /// Id of the diff reference field for this kind.
    pub fn reference_id(&self) -> u8 {
        match self.kind {
            RecordKind::Live => LIVE_DIFF_SEQUENCE,
            RecordKind::Sample => SAMPLE_DIFF_TIMESTAMP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_ids_match_positions() {
        for hw in HardwareType::ALL {
            for kind in [RecordKind::Live, RecordKind::Sample] {
                let table = FieldTable::get(hw, kind);
                for (pos, def) in table.definitions().enumerate() {
                    assert_eq!(def.id as usize, pos, "{hw} {kind} table out of order");
                }
                for id in table.data_ids().iter() {
                    assert!(table.is_named(id), "{hw} {kind} data id {id} unnamed");
                }
            }
        }
    }

    #[test]
    fn test_common_ids_share_names() {
        for hw in HardwareType::ALL {
            let live = FieldTable::live(hw);
            let sample = FieldTable::sample(hw);
            for id in COMMON_LIVE_SAMPLE_IDS.iter() {
                assert_eq!(
                    live.definition(id).and_then(|d| d.name),
                    sample.definition(id).and_then(|d| d.name)
                );
            }
        }
    }

    #[test]
    fn test_davis_live_lookup() {
        let table = FieldTable::live(HardwareType::Davis);
        let def = table.by_name("uv_index").unwrap();
        assert_eq!(def.id, 20);
        assert_eq!(def.null, Some(255));
        assert!(!table.is_named(11));
        assert!(!table.is_named(31));
        assert!(table.definition(40).is_none());
    }

    #[test]
    fn test_date_transform() {
        let date = NaiveDate::from_ymd_opt(2015, 9, 13).unwrap();
        let def = FieldTable::live(HardwareType::Davis)
            .by_name("current_storm_start_date")
            .unwrap();
        assert_eq!(Date.to_raw(def, &FieldValue::Date(date)).unwrap(), 7981);
        assert_eq!(Date.from_raw(U16, 7981), Some(FieldValue::Date(date)));
        assert_eq!(Date.from_raw(U16, 0), None);
        assert_eq!(Date.from_raw(U16, 0xFFFF), None);
    }

    #[test]
    fn test_time_and_et_transforms() {
        let def = FieldTable::sample(HardwareType::Davis).by_name("record_time").unwrap();
        let time = NaiveTime::from_hms_opt(9, 50, 0).unwrap();
        assert_eq!(Time.to_raw(def, &FieldValue::Time(time)).unwrap(), 950);
        assert_eq!(Time.from_raw(U16, 950), Some(FieldValue::Time(time)));
        assert_eq!(Time.from_raw(U16, 0), None);
        assert_eq!(Time.from_raw(U16, 0xFFFF), None);

        let def = FieldTable::sample(HardwareType::Davis)
            .by_name("evapotranspiration")
            .unwrap();
        assert_eq!(
            Evapotranspiration.to_raw(def, &FieldValue::Decimal(5.4102)).unwrap(),
            213
        );
        match Evapotranspiration.from_raw(U8, 213) {
            Some(FieldValue::Decimal(v)) => assert!((v - 5.4102).abs() < 1e-9),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decimal_rounding() {
        let def = FieldTable::live(HardwareType::Generic).by_name("pressure").unwrap();
        assert_eq!(D1.to_raw(def, &FieldValue::Decimal(15.389)).unwrap(), 154);
        let def = FieldTable::live(HardwareType::Generic).by_name("temperature").unwrap();
        assert_eq!(D2.to_raw(def, &FieldValue::Decimal(15.388)).unwrap(), 1539);
        assert_eq!(D2.to_raw(def, &FieldValue::Decimal(-4.5)).unwrap(), -450);
    }

    #[test]
    fn test_text_transform() {
        let def = FieldTable::sample(HardwareType::Fowh1080)
            .by_name("wh1080_wind_direction")
            .unwrap();
        let raw = Identity.to_raw(def, &FieldValue::Text("NE".into())).unwrap();
        assert_eq!(raw, 0x4E_45_00);
        assert_eq!(
            Identity.from_raw(Text3, raw),
            Some(FieldValue::Text("NE".into()))
        );
    }
}
