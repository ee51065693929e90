//! Field encoding and decoding.

use byteorder::{BigEndian, ByteOrder};

use super::definitions::{FieldDefinition, FieldTable, FieldType};
use super::values::FieldValues;
use super::FieldSet;
use crate::error::{CodecError, ProtocolError, Result};

/// Encode the fields in `field_ids` from `values`.
///
/// Ids that do not map to a named field in `table` are skipped. Fields with no
/// value are written as the field's null sentinel.
///
/// # Panics
///
/// Panics if a field has no value but is not nullable, or if a value encodes
/// to the field's null sentinel. Both are caller bugs: the record would
/// decode to something different from what was sent.
pub fn encode(table: &FieldTable, values: &FieldValues, field_ids: FieldSet) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(calculate_encoded_size(table, field_ids));

    for id in field_ids.iter() {
        let Some(def) = table.definition(id).filter(|def| def.is_named()) else {
            continue;
        };

        let raw = match values.get(id) {
            Some(value) => {
                let raw = def.transform.to_raw(def, value)?;
                assert!(
                    def.null != Some(raw),
                    "value {value} for field {} collides with its null sentinel",
                    def.display_name()
                );
                raw
            }
            None => {
                assert!(
                    def.null.is_some(),
                    "attempted to encode null for not-null field {}",
                    def.display_name()
                );
                def.null.unwrap_or_default()
            }
        };

        write_raw(&mut out, def, raw)?;
    }

    Ok(out)
}

/// Decode the fields in `field_ids` from `data`.
///
/// Every id must map to a named field in `table`; received field lists
/// naming a reserved id are rejected.
pub fn decode(table: &FieldTable, data: &[u8], field_ids: FieldSet) -> Result<FieldValues> {
    let mut values = FieldValues::new(table.hardware_type, table.kind);
    let mut offset = 0;

    for id in field_ids.iter() {
        let def = table
            .definition(id)
            .filter(|def| def.is_named())
            .ok_or(ProtocolError::UndefinedField {
                field_id: id,
                hardware_type: table.hardware_type,
                kind: table.kind,
            })?;

        let width = def.width();
        let Some(bytes) = data.get(offset..offset + width) else {
            return Err(ProtocolError::Truncated {
                needed: offset + width,
                available: data.len(),
            }
            .into());
        };
        offset += width;

        let raw = read_raw(def.field_type, bytes);
        if def.null == Some(raw) {
            continue;
        }

        values.put(id, def.transform.from_raw(def.field_type, raw));
    }

    Ok(values)
}

/// Encoded size of `field_ids` in bytes, skipping unnamed ids.
pub fn calculate_encoded_size(table: &FieldTable, field_ids: FieldSet) -> usize {
    field_ids
        .iter()
        .filter_map(|id| table.definition(id))
        .filter(|def| def.is_named())
        .map(FieldDefinition::width)
        .sum()
}

fn write_raw(out: &mut Vec<u8>, def: &FieldDefinition, raw: i64) -> Result<()> {
    let (min, max) = def.field_type.range();
    if raw < min || raw > max {
        return Err(CodecError::OutOfRange {
            field: def.display_name(),
            value: raw.to_string(),
        }
        .into());
    }

    match def.field_type {
        FieldType::I8 => out.push(raw as i8 as u8),
        FieldType::U8 | FieldType::Bool => out.push(raw as u8),
        FieldType::I16 => {
            let mut buf = [0u8; 2];
            BigEndian::write_i16(&mut buf, raw as i16);
            out.extend_from_slice(&buf);
        }
        FieldType::U16 => {
            let mut buf = [0u8; 2];
            BigEndian::write_u16(&mut buf, raw as u16);
            out.extend_from_slice(&buf);
        }
        FieldType::Text3 => {
            let mut buf = [0u8; 3];
            BigEndian::write_u24(&mut buf, raw as u32);
            out.extend_from_slice(&buf);
        }
        FieldType::U32 => {
            let mut buf = [0u8; 4];
            BigEndian::write_u32(&mut buf, raw as u32);
            out.extend_from_slice(&buf);
        }
    }

    Ok(())
}

fn read_raw(field_type: FieldType, bytes: &[u8]) -> i64 {
    match field_type {
        FieldType::I8 => i64::from(bytes[0] as i8),
        FieldType::U8 | FieldType::Bool => i64::from(bytes[0]),
        FieldType::I16 => i64::from(BigEndian::read_i16(bytes)),
        FieldType::U16 => i64::from(BigEndian::read_u16(bytes)),
        FieldType::Text3 => i64::from(BigEndian::read_u24(bytes)),
        FieldType::U32 => i64::from(BigEndian::read_u32(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

    use super::*;
    use crate::error::Error;
    use crate::fields::FieldValue;
    use crate::types::{HardwareType, RecordKind};

    fn davis_live() -> FieldValues {
        FieldValues::live(HardwareType::Davis)
            .value("temperature", 20.5)
            .value("humidity", 55)
            .value("bar_trend", -20)
            .value("uv_index", 3.4)
            .value("current_storm_start_date", NaiveDate::from_ymd_opt(2016, 2, 29).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let table = FieldTable::live(HardwareType::Generic);
        let values = FieldValues::live(HardwareType::Generic)
            .value("temperature", 20.5)
            .value("humidity", 55)
            .build()
            .unwrap();

        let ids: FieldSet = [4u8, 5].into_iter().collect();
        let encoded = encode(table, &values, ids).unwrap();

        // temperature i16 2dp, humidity u8
        assert_eq!(encoded, vec![0x08, 0x02, 55]);
        assert_eq!(calculate_encoded_size(table, ids), 3);
    }

    #[test]
    fn test_decode_reverses_encode() {
        let table = FieldTable::live(HardwareType::Davis);
        let values = davis_live();
        let ids = table.data_ids();

        let encoded = encode(table, &values, ids).unwrap();
        assert_eq!(encoded.len(), calculate_encoded_size(table, ids));

        let decoded = decode(table, &encoded, ids).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_null_sentinel() {
        let table = FieldTable::live(HardwareType::Generic);
        let values = FieldValues::live(HardwareType::Generic).build().unwrap();
        let ids: FieldSet = [5u8, 6].into_iter().collect();

        let encoded = encode(table, &values, ids).unwrap();
        assert_eq!(encoded, vec![0xFF, 0xFF, 0xFF]);

        let decoded = decode(table, &encoded, ids).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_unused_and_excluded_fields_not_encoded() {
        let table = FieldTable::live(HardwareType::Davis);
        let values = davis_live();

        // 11 and 31 are reserved; 5 (humidity) is not in the list.
        let ids: FieldSet = [4u8, 11, 31].into_iter().collect();
        let encoded = encode(table, &values, ids).unwrap();
        assert_eq!(encoded.len(), 2);
        assert_eq!(calculate_encoded_size(table, ids), 2);
    }

    #[test]
    fn test_decode_rejects_unused_field() {
        let table = FieldTable::live(HardwareType::Davis);
        let ids: FieldSet = [11u8].into_iter().collect();
        let err = decode(table, &[0], ids).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UndefinedField { field_id: 11, .. })
        ));
    }

    #[test]
    fn test_decode_truncated() {
        let table = FieldTable::live(HardwareType::Generic);
        let ids: FieldSet = [4u8, 6].into_iter().collect();
        let err = decode(table, &[0x08, 0x02, 0x01], ids).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::Truncated { needed: 4, .. })));
    }

    #[test]
    #[should_panic(expected = "not-null field")]
    fn test_null_for_not_null_field_panics() {
        let table = FieldTable::sample(HardwareType::Generic);
        let values = FieldValues::new(HardwareType::Generic, RecordKind::Sample);
        let ids: FieldSet = [1u8].into_iter().collect();
        let _ = encode(table, &values, ids);
    }

    #[test]
    #[should_panic(expected = "collides with its null sentinel")]
    fn test_sentinel_collision_panics() {
        let table = FieldTable::live(HardwareType::Generic);
        let values = FieldValues::live(HardwareType::Generic)
            .value("humidity", 255)
            .build()
            .unwrap();
        let ids: FieldSet = [5u8].into_iter().collect();
        let _ = encode(table, &values, ids);
    }

    #[test]
    fn test_out_of_range_value() {
        let table = FieldTable::live(HardwareType::Generic);
        let values = FieldValues::live(HardwareType::Generic)
            .value("humidity", 300)
            .build()
            .unwrap();
        let ids: FieldSet = [5u8].into_iter().collect();
        let err = encode(table, &values, ids).unwrap_err();
        assert!(matches!(err, Error::Codec(CodecError::OutOfRange { field: "humidity", .. })));
    }

    #[test]
    fn test_sample_fields_decode() {
        let table = FieldTable::sample(HardwareType::Davis);
        let values = FieldValues::sample(HardwareType::Davis)
            .value("record_time", NaiveTime::from_hms_opt(14, 5, 0).unwrap())
            .value("record_date", NaiveDate::from_ymd_opt(2019, 7, 1).unwrap())
            .value("evapotranspiration", 0.254)
            .value("rainfall", 0.2)
            .build()
            .unwrap();

        let encoded = encode(table, &values, table.data_ids()).unwrap();
        let decoded = decode(table, &encoded, table.data_ids()).unwrap();
        assert_eq!(decoded.get_f64("rainfall"), Some(0.2));
        assert_eq!(
            decoded.get_by_name("record_time"),
            Some(&FieldValue::Time(NaiveTime::from_hms_opt(14, 5, 0).unwrap()))
        );
        assert!((decoded.get_f64("evapotranspiration").unwrap() - 0.254).abs() < 1e-9);
    }

    #[test]
    fn test_reference_timestamp_field() {
        let table = FieldTable::live(HardwareType::Generic);
        let ts = Utc.with_ymd_and_hms(2015, 9, 13, 9, 31, 11).unwrap();
        let mut values = FieldValues::new(HardwareType::Generic, RecordKind::Live);
        values.put(1, Some(FieldValue::Timestamp(ts)));

        let ids: FieldSet = [1u8].into_iter().collect();
        let encoded = encode(table, &values, ids).unwrap();
        assert_eq!(BigEndian::read_u32(&encoded), 1_442_136_671);
        assert_eq!(
            decode(table, &encoded, ids).unwrap().get(1),
            Some(&FieldValue::Timestamp(ts))
        );
    }
}
