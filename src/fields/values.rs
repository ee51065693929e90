//! Typed field values and the builder that checks them against a field table.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::definitions::FieldTable;
use super::FieldSet;
use crate::error::{CodecError, Error, Result};
use crate::types::{HardwareType, RecordKind};

/// A single decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Integer(i64),
    Decimal(f64),
    Flag(bool),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Decimal(v) => Some(*v),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Decimal(v) => write!(f, "{v}"),
            Self::Flag(b) => write!(f, "{b}"),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Self::Date(d) => write!(f, "{d}"),
            Self::Time(t) => write!(f, "{t}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

macro_rules! impl_from_integer {
    ($($t:ty),*) => {
        $(impl From<$t> for FieldValue {
            fn from(v: $t) -> Self {
                Self::Integer(i64::from(v))
            }
        })*
    };
}

impl_from_integer!(i8, u8, i16, u16, i32, u32, i64);

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Decimal(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        Self::Decimal(f64::from(v))
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for FieldValue {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Field values of one record, keyed by field id.
///
/// A field with no entry is null. Values are only ever set through the
/// [`FieldValuesBuilder`] or by the decoder, so every entry matches the
/// table for `hardware_type` and `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValues {
    hardware_type: HardwareType,
    kind: RecordKind,
    values: BTreeMap<u8, FieldValue>,
}

impl FieldValues {
    /// Empty (all null) values.
    pub fn new(hardware_type: HardwareType, kind: RecordKind) -> Self {
        Self {
            hardware_type,
            kind,
            values: BTreeMap::new(),
        }
    }

    pub fn builder(hardware_type: HardwareType, kind: RecordKind) -> FieldValuesBuilder {
        FieldValuesBuilder::new(hardware_type, kind)
    }

    pub fn live(hardware_type: HardwareType) -> FieldValuesBuilder {
        FieldValuesBuilder::new(hardware_type, RecordKind::Live)
    }

    pub fn sample(hardware_type: HardwareType) -> FieldValuesBuilder {
        FieldValuesBuilder::new(hardware_type, RecordKind::Sample)
    }

    pub fn hardware_type(&self) -> HardwareType {
        self.hardware_type
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn table(&self) -> &'static FieldTable {
        FieldTable::get(self.hardware_type, self.kind)
    }

    /// Value for a field id, `None` when null.
    pub fn get(&self, id: u8) -> Option<&FieldValue> {
        self.values.get(&id)
    }

    /// Value for a named field, `None` when null or unknown.
    pub fn get_by_name(&self, name: &str) -> Option<&FieldValue> {
        self.table().by_name(name).and_then(|def| self.get(def.id))
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get_by_name(name).and_then(FieldValue::as_f64)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get_by_name(name).and_then(FieldValue::as_i64)
    }

    /// Ids with a non-null value.
    pub fn present_ids(&self) -> FieldSet {
        self.values.keys().copied().collect()
    }

    /// Number of non-null fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate `(field name, value)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> + '_ {
        let table = self.table();
        self.values.iter().filter_map(move |(id, value)| {
            table
                .definition(*id)
                .and_then(|def| def.name)
                .map(|name| (name, value))
        })
    }

    /// Set or clear a field without validation. Used by the decoder and the
    /// diff engine, which work from the table directly.
    pub(crate) fn put(&mut self, id: u8, value: Option<FieldValue>) {
        match value {
            Some(v) => {
                self.values.insert(id, v);
            }
            None => {
                self.values.remove(&id);
            }
        }
    }

    pub(crate) fn take(&mut self, id: u8) -> Option<FieldValue> {
        self.values.remove(&id)
    }

    /// Copy every field in `ids` from `base`, null included.
    pub(crate) fn copy_from(&mut self, base: &FieldValues, ids: FieldSet) {
        for id in ids.iter() {
            self.put(id, base.get(id).cloned());
        }
    }
}

/// Builds [`FieldValues`] checked against the field table.
///
/// ```
/// use weatherpush::fields::FieldValues;
/// use weatherpush::types::HardwareType;
///
/// let live = FieldValues::live(HardwareType::Davis)
///     .value("temperature", 20.5)
///     .value("humidity", 55)
///     .build()
///     .unwrap();
/// assert_eq!(live.get_f64("temperature"), Some(20.5));
/// ```
#[derive(Debug)]
pub struct FieldValuesBuilder {
    values: FieldValues,
    error: Option<Error>,
}

impl FieldValuesBuilder {
    fn new(hardware_type: HardwareType, kind: RecordKind) -> Self {
        Self {
            values: FieldValues::new(hardware_type, kind),
            error: None,
        }
    }

    /// Set a named field.
    pub fn value(self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.set(name, Some(value.into()))
    }

    /// Set a named field to null.
    pub fn null(self, name: &str) -> Self {
        self.set(name, None)
    }

    /// Set a named field from an optional value.
    pub fn optional<V: Into<FieldValue>>(self, name: &str, value: Option<V>) -> Self {
        self.set(name, value.map(Into::into))
    }

    fn set(mut self, name: &str, value: Option<FieldValue>) -> Self {
        if self.error.is_some() {
            return self;
        }

        let table = self.values.table();
        let def = match table.by_name(name) {
            Some(def) if table.data_ids().contains(def.id) => def,
            _ => {
                self.error = Some(
                    CodecError::UnknownField {
                        name: name.to_string(),
                        hardware_type: table.hardware_type,
                        kind: table.kind,
                    }
                    .into(),
                );
                return self;
            }
        };

        let accepted = match value {
            Some(v) => match def.transform.accept(def.field_type, v) {
                Some(v) => Some(v),
                None => {
                    self.error = Some(
                        CodecError::TypeMismatch {
                            field: def.display_name(),
                            expected: def.transform.expects(def.field_type),
                        }
                        .into(),
                    );
                    return self;
                }
            },
            None => None,
        };

        self.values.put(def.id, accepted);
        self
    }

    /// Finish, checking that every non-nullable data field has a value.
    pub fn build(self) -> Result<FieldValues> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let table = self.values.table();
        for id in table.data_ids().iter() {
            if let Some(def) = table.definition(id) {
                if def.null.is_none() && self.values.get(id).is_none() {
                    return Err(CodecError::NotNullable(def.display_name()).into());
                }
            }
        }

        Ok(self.values)
    }
}
