//! Per-field binary encoding of weather records.
//!
//! A record's payload is a bit-mask of the field ids present followed by the
//! encoded value of each present field in ascending id order:
//!
//! ```text
//! ┌──────────────────────┬──────────┬──────────┬─────┬──────────┐
//! │ Field bit-mask (u32) │ field a  │ field b  │ ... │ field n  │
//! └──────────────────────┴──────────┴──────────┴─────┴──────────┘
//!        bit n set => field id n present, a < b < ... < n
//! ```
//!
//! Values are big-endian at the width declared in the [`FieldTable`] for the
//! station's hardware type. Nullable fields carry a sentinel raw value for
//! "no value".

mod codec;
mod definitions;
mod values;

pub use codec::{calculate_encoded_size, decode, encode};
pub use definitions::{
    FieldDefinition, FieldTable, FieldType, Transform, COMMON_LIVE_SAMPLE_IDS, LIVE_DIFF_SEQUENCE,
    SAMPLE_DIFF_TIMESTAMP,
};
pub use values::{FieldValue, FieldValues, FieldValuesBuilder};

use std::fmt;

/// Set of field ids, stored as the on-wire bit-mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FieldSet(u32);

impl FieldSet {
    /// No fields.
    pub const EMPTY: Self = Self(0);

    /// Create from a raw bit-mask.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Ids `first..=last`.
    pub const fn range(first: u8, last: u8) -> Self {
        let mut bits = 0u32;
        let mut id = first;
        while id <= last {
            bits |= 1 << id;
            id += 1;
        }
        Self(bits)
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Raw bit-mask.
    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, id: u8) -> bool {
        id < 32 && self.0 & (1 << id) != 0
    }

    /// Add a field id.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a valid bit position (0-31).
    pub fn insert(&mut self, id: u8) {
        assert!(id < 32, "field id {id} out of range");
        self.0 |= 1 << id;
    }

    pub fn remove(&mut self, id: u8) {
        if id < 32 {
            self.0 &= !(1 << id);
        }
    }

    pub fn with(mut self, id: u8) -> Self {
        self.insert(id);
        self
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Ids in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0u8..32).filter(move |id| self.contains(*id))
    }
}

impl FromIterator<u8> for FieldSet {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, id) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{id}")?;
        }
        f.write_str("]")
    }
}
