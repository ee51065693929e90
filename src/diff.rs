//! Diff-based record compression.
//!
//! A record can be sent in full or as a diff carrying only the fields that
//! changed relative to a base record the receiver already has:
//!
//! | Strategy | Base | Reference field |
//! |----------|------|-----------------|
//! | Full | none | none |
//! | Live diff | previous live record | `live_diff_sequence` (id 0) |
//! | Sample diff | confirmed sample record | `sample_diff_timestamp` (id 1) |
//!
//! Live records may also be skipped entirely when nothing changed since the
//! previous live record. Live diffs are only as good as the receiver's copy of
//! the base, so the client forces a full record periodically (see
//! [`ClientSession`](crate::client::ClientSession)). Sample diffs always
//! reference a sample the server has acknowledged.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::fields::{
    self, calculate_encoded_size, FieldSet, FieldTable, FieldValue, FieldValues,
    COMMON_LIVE_SAMPLE_IDS, LIVE_DIFF_SEQUENCE, SAMPLE_DIFF_TIMESTAMP,
};
use crate::types::{HardwareType, SequenceId};

/// How a record's fields relate to what the receiver already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffStrategy {
    /// Every data field is present.
    Full,
    /// Missing fields come from the live record with this sequence id.
    LiveDiff { base_sequence: SequenceId },
    /// Missing fields come from the sample record with this timestamp.
    SampleDiff { base_timestamp: DateTime<Utc> },
}

impl fmt::Display for DiffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::LiveDiff { base_sequence } => write!(f, "live-diff(seq={base_sequence})"),
            Self::SampleDiff { base_timestamp } => {
                write!(f, "sample-diff(ts={})", base_timestamp.to_rfc3339())
            }
        }
    }
}

/// Compression applied to an outgoing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionAlgorithm {
    None,
    LiveDiff,
    SampleDiff,
    Skip,
}

impl CompressionAlgorithm {
    pub const ALL: [Self; 4] = [Self::None, Self::LiveDiff, Self::SampleDiff, Self::Skip];

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::LiveDiff => "live-diff",
            Self::SampleDiff => "sample-diff",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Size accounting for one encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionStats {
    /// Size of the record's field data if sent in full.
    pub uncompressed_size: usize,
    /// Bytes saved against the full encoding.
    pub saving: usize,
    pub algorithm: CompressionAlgorithm,
}

impl CompressionStats {
    pub fn encoded_size(&self) -> usize {
        self.uncompressed_size - self.saving
    }
}

/// Field data ready to be placed in a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFields {
    pub strategy: DiffStrategy,
    /// Ids present in `data`, reference field included.
    pub field_ids: FieldSet,
    pub data: Vec<u8>,
}

/// Result of [`encode_live`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveEncoding {
    /// `None` when the record should be skipped.
    pub encoded: Option<EncodedFields>,
    pub stats: CompressionStats,
}

/// Result of [`encode_sample`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleEncoding {
    pub encoded: EncodedFields,
    pub stats: CompressionStats,
}

/// A record to diff against, with the identifier the receiver knows it by.
#[derive(Debug, Clone, Copy)]
pub struct DiffBase<'a, K> {
    pub values: &'a FieldValues,
    pub key: K,
}

impl<'a, K> DiffBase<'a, K> {
    pub fn new(values: &'a FieldValues, key: K) -> Self {
        Self { values, key }
    }
}

/// Previous live record and its sequence id.
pub type LiveBase<'a> = DiffBase<'a, SequenceId>;

/// Confirmed sample record and its timestamp.
pub type SampleBase<'a> = DiffBase<'a, DateTime<Utc>>;

struct DiffOption {
    algorithm: CompressionAlgorithm,
    strategy: DiffStrategy,
    field_ids: FieldSet,
    saving: isize,
}

/// Data ids of `target` whose value differs from `base`.
fn changed_ids(table: &FieldTable, base: &FieldValues, target: &FieldValues) -> FieldSet {
    table
        .data_ids()
        .iter()
        .filter(|&id| base.get(id) != target.get(id))
        .collect()
}

/// Live ids that must be sent when diffing against a sample record.
///
/// Live-only fields are always sent; shared fields only when they differ.
fn changed_ids_against_sample(table: &FieldTable, sample: &FieldValues, live: &FieldValues) -> FieldSet {
    table
        .data_ids()
        .iter()
        .filter(|&id| !COMMON_LIVE_SAMPLE_IDS.contains(id) || sample.get(id) != live.get(id))
        .collect()
}

fn encode_with_reference(
    table: &FieldTable,
    values: &FieldValues,
    strategy: DiffStrategy,
    field_ids: FieldSet,
) -> Result<Vec<u8>> {
    let reference = match strategy {
        DiffStrategy::Full => return fields::encode(table, values, field_ids),
        DiffStrategy::LiveDiff { base_sequence } => {
            (LIVE_DIFF_SEQUENCE, FieldValue::Integer(i64::from(base_sequence.get())))
        }
        DiffStrategy::SampleDiff { base_timestamp } => {
            (SAMPLE_DIFF_TIMESTAMP, FieldValue::Timestamp(base_timestamp))
        }
    };

    let mut values = values.clone();
    values.put(reference.0, Some(reference.1));
    fields::encode(table, &values, field_ids)
}

/// Encode a live record, choosing the cheapest representation.
///
/// Unless `force_full` is set, the options are: the full record, a diff
/// against `previous_live`, a diff against `previous_sample`, and skipping
/// the record when nothing changed since `previous_live`. The largest saving
/// wins; ties go to the full record, then the live diff, then the sample diff.
///
/// # Panics
///
/// Panics if `values` holds a value equal to its field's null sentinel (see
/// [`fields::encode`]).
pub fn encode_live(
    values: &FieldValues,
    previous_live: Option<LiveBase<'_>>,
    previous_sample: Option<SampleBase<'_>>,
    force_full: bool,
) -> Result<LiveEncoding> {
    let table = FieldTable::live(values.hardware_type());
    let all_ids = table.data_ids();
    let full_size = calculate_encoded_size(table, all_ids) as isize;

    let mut options = vec![DiffOption {
        algorithm: CompressionAlgorithm::None,
        strategy: DiffStrategy::Full,
        field_ids: all_ids,
        saving: 0,
    }];

    if !force_full {
        let mut skip_available = false;

        if let Some(base) = previous_live {
            let changed = changed_ids(table, base.values, values);
            skip_available = changed.is_empty();

            let field_ids = changed.with(LIVE_DIFF_SEQUENCE);
            options.push(DiffOption {
                algorithm: CompressionAlgorithm::LiveDiff,
                strategy: DiffStrategy::LiveDiff {
                    base_sequence: base.key,
                },
                field_ids,
                saving: full_size - calculate_encoded_size(table, field_ids) as isize,
            });
        }

        if let Some(base) = previous_sample {
            let field_ids = changed_ids_against_sample(table, base.values, values).with(SAMPLE_DIFF_TIMESTAMP);
            options.push(DiffOption {
                algorithm: CompressionAlgorithm::SampleDiff,
                strategy: DiffStrategy::SampleDiff {
                    base_timestamp: base.key,
                },
                field_ids,
                saving: full_size - calculate_encoded_size(table, field_ids) as isize,
            });
        }

        if skip_available {
            options.push(DiffOption {
                algorithm: CompressionAlgorithm::Skip,
                strategy: DiffStrategy::Full,
                field_ids: FieldSet::EMPTY,
                saving: full_size,
            });
        }
    }

    // First option with the largest saving
    let best = options
        .into_iter()
        .reduce(|best, option| if option.saving > best.saving { option } else { best })
        .ok_or_else(|| crate::Error::Internal("no live encoding options".into()))?;

    let stats = CompressionStats {
        uncompressed_size: full_size as usize,
        saving: best.saving.max(0) as usize,
        algorithm: best.algorithm,
    };

    if best.algorithm == CompressionAlgorithm::Skip {
        return Ok(LiveEncoding { encoded: None, stats });
    }

    let data = encode_with_reference(table, values, best.strategy, best.field_ids)?;
    Ok(LiveEncoding {
        encoded: Some(EncodedFields {
            strategy: best.strategy,
            field_ids: best.field_ids,
            data,
        }),
        stats,
    })
}

/// Encode a sample record, diffing against `previous_sample` only when that
/// is strictly smaller than the full record.
pub fn encode_sample(values: &FieldValues, previous_sample: Option<SampleBase<'_>>) -> Result<SampleEncoding> {
    let table = FieldTable::sample(values.hardware_type());
    let all_ids = table.data_ids();
    let full_size = calculate_encoded_size(table, all_ids);

    let mut strategy = DiffStrategy::Full;
    let mut field_ids = all_ids;
    let mut saving = 0;
    let mut algorithm = CompressionAlgorithm::None;

    if let Some(base) = previous_sample {
        let diff_ids = changed_ids(table, base.values, values).with(SAMPLE_DIFF_TIMESTAMP);
        let diff_size = calculate_encoded_size(table, diff_ids);
        if diff_size < full_size {
            strategy = DiffStrategy::SampleDiff {
                base_timestamp: base.key,
            };
            field_ids = diff_ids;
            saving = full_size - diff_size;
            algorithm = CompressionAlgorithm::SampleDiff;
        }
    }

    let data = encode_with_reference(table, values, strategy, field_ids)?;
    Ok(SampleEncoding {
        encoded: EncodedFields {
            strategy,
            field_ids,
            data,
        },
        stats: CompressionStats {
            uncompressed_size: full_size,
            saving,
            algorithm,
        },
    })
}

/// Decode live field data and split off the diff reference.
///
/// The returned values hold only the fields present on the wire; diffs still
/// need patching against their base.
pub fn decode_live_fields(
    hardware_type: HardwareType,
    field_ids: FieldSet,
    data: &[u8],
) -> Result<(DiffStrategy, FieldValues)> {
    let table = FieldTable::live(hardware_type);
    let mut values = fields::decode(table, data, field_ids)?;

    let live_ref = values.take(LIVE_DIFF_SEQUENCE);
    let sample_ref = values.take(SAMPLE_DIFF_TIMESTAMP);

    let strategy = match (live_ref, sample_ref) {
        (None, None) => DiffStrategy::Full,
        (Some(FieldValue::Integer(seq)), None) => DiffStrategy::LiveDiff {
            base_sequence: SequenceId(seq as u16),
        },
        (None, Some(FieldValue::Timestamp(ts))) => DiffStrategy::SampleDiff { base_timestamp: ts },
        _ => {
            return Err(ProtocolError::MalformedPacket(
                "live record references both a live and a sample base".into(),
            )
            .into())
        }
    };

    Ok((strategy, values))
}

/// Decode sample field data and split off the diff reference.
pub fn decode_sample_fields(
    hardware_type: HardwareType,
    field_ids: FieldSet,
    data: &[u8],
) -> Result<(DiffStrategy, FieldValues)> {
    let table = FieldTable::sample(hardware_type);
    let mut values = fields::decode(table, data, field_ids)?;

    let strategy = match values.take(SAMPLE_DIFF_TIMESTAMP) {
        Some(FieldValue::Timestamp(ts)) => DiffStrategy::SampleDiff { base_timestamp: ts },
        _ => DiffStrategy::Full,
    };

    Ok((strategy, values))
}

/// Fill the data fields missing from a live diff from its base live record.
pub fn patch_live_from_live(mut live: FieldValues, present: FieldSet, base: &FieldValues) -> FieldValues {
    let missing = live.table().data_ids().difference(present);
    live.copy_from(base, missing);
    live
}

/// Fill the shared fields missing from a live diff from its base sample.
pub fn patch_live_from_sample(mut live: FieldValues, present: FieldSet, base: &FieldValues) -> FieldValues {
    let missing = COMMON_LIVE_SAMPLE_IDS
        .intersection(live.table().data_ids())
        .difference(present);
    live.copy_from(base, missing);
    live
}

/// Fill the data fields missing from a sample diff from its base sample.
pub fn patch_sample(mut sample: FieldValues, present: FieldSet, base: &FieldValues) -> FieldValues {
    let missing = sample.table().data_ids().difference(present);
    sample.copy_from(base, missing);
    sample
}
