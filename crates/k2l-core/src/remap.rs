//! Offset remapping from source offset space into lake offset space.
//!
//! The record at position `i` of a batch lands on `destination_start + i`,
//! and the original offset is preserved as `kafka.input_offset`. For a
//! batch without source gaps this is the rigid shift described by
//! [`OffsetShift`]. Gaps left by compaction or transaction markers are
//! closed up, since lake offsets are contiguous; `input_offset` remains the
//! exact way back to the source.

use crate::error::{RemapError, Result};
use crate::record::{render_value, Batch, Record, INPUT_OFFSET_FIELD, OFFSET_FIELD};
use serde_json::Value;

/// Translation of a gap-free run of source offsets.
///
/// `destination = source - first_source_offset + destination_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetShift {
    /// `kafka.offset` of the batch's first record before remapping
    pub first_source_offset: i64,
    /// Lake offset assigned to the first record
    pub destination_start: i64,
}

impl OffsetShift {
    pub fn new(first_source_offset: i64, destination_start: i64) -> Self {
        Self {
            first_source_offset,
            destination_start,
        }
    }

    /// Map a source offset into the lake's offset space.
    pub fn to_destination(&self, source_offset: i64) -> Result<i64> {
        checked_add(source_offset, self.delta()?)
    }

    /// Map a lake offset back into source offset space.
    pub fn to_source(&self, destination_offset: i64) -> Result<i64> {
        let delta = self.delta()?;
        destination_offset.checked_sub(delta).ok_or_else(|| {
            RemapError::Overflow {
                left: destination_offset,
                op: "-",
                right: delta,
            }
            .into()
        })
    }

    /// `destination_start - first_source_offset`
    fn delta(&self) -> Result<i64> {
        self.destination_start
            .checked_sub(self.first_source_offset)
            .ok_or_else(|| {
                RemapError::Overflow {
                    left: self.destination_start,
                    op: "-",
                    right: self.first_source_offset,
                }
                .into()
            })
    }
}

fn checked_add(left: i64, right: i64) -> Result<i64> {
    left.checked_add(right).ok_or_else(|| {
        RemapError::Overflow {
            left,
            op: "+",
            right,
        }
        .into()
    })
}

/// Source offset carried by a record, or the contract violation it commits.
fn source_offset(record: &Record) -> std::result::Result<i64, RemapError> {
    let metadata = record.metadata().ok_or_else(|| RemapError::MissingMetadata {
        record: record.render(),
    })?;
    metadata
        .get(OFFSET_FIELD)
        .and_then(Value::as_i64)
        .ok_or_else(|| RemapError::MissingOffset {
            metadata: render_value(&Value::Object(metadata.clone())),
        })
}

/// Compute the shift for a batch without rewriting it.
///
/// Returns `None` for an empty batch.
pub fn shift_for(batch: &Batch, destination_start: i64) -> Result<Option<OffsetShift>> {
    match batch.first() {
        Some(first) => Ok(Some(OffsetShift::new(
            source_offset(first)?,
            destination_start,
        ))),
        None => Ok(None),
    }
}

/// Rewrite every record's `kafka.offset` into lake offset space.
///
/// Each output record carries `input_offset` (the original offset) and
/// `offset = destination_start + i` for its position `i` in the batch. Other
/// fields are untouched and the input batch is not modified. Every record is
/// validated, source offsets must strictly increase, and the first violation
/// aborts the whole batch.
pub fn adjust_offsets(batch: &Batch, destination_start: i64) -> Result<Batch> {
    let mut remapped = Batch::with_capacity(batch.len());
    let mut previous: Option<i64> = None;

    for (position, record) in batch.iter().enumerate() {
        let original = source_offset(record)?;
        if let Some(previous) = previous.filter(|p| original <= *p) {
            return Err(RemapError::OutOfOrder {
                previous,
                offset: original,
            }
            .into());
        }
        previous = Some(original);
        let offset = checked_add(destination_start, position as i64)?;

        let mut rewritten = record.clone();
        if let Some(metadata) = rewritten.metadata_mut() {
            metadata.insert(INPUT_OFFSET_FIELD.to_string(), Value::from(original));
            metadata.insert(OFFSET_FIELD.to_string(), Value::from(offset));
        }
        remapped.push(rewritten);
    }

    Ok(remapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::record::KafkaMeta;
    use serde_json::json;

    fn batch(offsets: impl IntoIterator<Item = i64>) -> Batch {
        offsets
            .into_iter()
            .map(|o| Record::from_payload(json!({"seq": o}), &KafkaMeta::new("events", 0, o)))
            .collect()
    }

    #[test]
    fn test_rigid_shift_without_gaps() {
        let input = batch(600..1000);
        let out = adjust_offsets(&input, 400).unwrap();
        let shift = shift_for(&input, 400).unwrap().unwrap();

        for record in &out {
            let source = record.input_offset().unwrap();
            assert_eq!(record.offset(), Some(shift.to_destination(source).unwrap()));
        }
        assert_eq!(out.first_offset(), Some(400));
        assert_eq!(out.last_offset(), Some(799));
    }

    #[test]
    fn test_source_gaps_are_closed() {
        // compaction or transaction markers leave holes in the partition
        let input = batch([600, 601, 605]);
        let out = adjust_offsets(&input, 400).unwrap();

        let offsets: Vec<_> = out.iter().map(|r| r.offset().unwrap()).collect();
        let inputs: Vec<_> = out.iter().map(|r| r.input_offset().unwrap()).collect();
        assert_eq!(offsets, vec![400, 401, 402]);
        assert_eq!(inputs, vec![600, 601, 605]);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let err = adjust_offsets(&batch([5, 7, 7]), 0).unwrap_err();
        assert!(matches!(
            err,
            Error::Remap(RemapError::OutOfOrder {
                previous: 7,
                offset: 7
            })
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_other_fields_untouched() {
        let input = batch([10, 11]);
        let out = adjust_offsets(&input, 0).unwrap();

        for (before, after) in input.iter().zip(out.iter()) {
            assert_eq!(before.get("seq"), after.get("seq"));
            let meta = after.metadata().unwrap();
            assert_eq!(meta.get("topic"), Some(&json!("events")));
            assert_eq!(meta.get("partition"), Some(&json!(0)));
        }
        // input is not modified
        assert_eq!(input.first_offset(), Some(10));
        assert_eq!(input.first().unwrap().input_offset(), None);
    }

    #[test]
    fn test_identity_when_aligned() {
        let out = adjust_offsets(&batch([5, 6, 7]), 5).unwrap();
        let offsets: Vec<_> = out.iter().map(|r| r.offset().unwrap()).collect();
        assert_eq!(offsets, vec![5, 6, 7]);
    }

    #[test]
    fn test_empty_batch() {
        let out = adjust_offsets(&Batch::new(), 100).unwrap();
        assert!(out.is_empty());
        assert_eq!(shift_for(&Batch::new(), 100).unwrap(), None);
    }

    #[test]
    fn test_missing_metadata() {
        let input = Batch::from_records(vec![Record::new(json!({"id": 1}))]);
        let err = adjust_offsets(&input, 0).unwrap_err();

        match err {
            Error::Remap(RemapError::MissingMetadata { record }) => {
                assert_eq!(record, r#"{"id":1}"#);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_offset() {
        let input = Batch::from_records(vec![Record::new(json!({"kafka": {"partition": 0}}))]);
        let err = adjust_offsets(&input, 0).unwrap_err();

        assert!(matches!(
            err,
            Error::Remap(RemapError::MissingOffset { ref metadata }) if metadata == r#"{"partition":0}"#
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_later_record_validated() {
        let mut input = batch([0, 1]);
        input.push(Record::new(json!({"kafka": {"offset": "2"}})));

        let err = adjust_offsets(&input, 0).unwrap_err();
        assert!(matches!(err, Error::Remap(RemapError::MissingOffset { .. })));
    }

    #[test]
    fn test_overflow_is_an_error() {
        let input = batch([0, 1]);
        let err = adjust_offsets(&input, i64::MAX).unwrap_err();
        assert!(matches!(
            err,
            Error::Remap(RemapError::Overflow {
                left: i64::MAX,
                op: "+",
                right: 1
            })
        ));
    }

    #[test]
    fn test_overflow_reports_operands() {
        let shift = OffsetShift::new(-5, i64::MAX);
        let err = shift.to_destination(0).unwrap_err();

        assert_eq!(
            err.to_string(),
            format!(
                "Remap error: offset arithmetic overflows: {} - -5",
                i64::MAX
            )
        );
    }

    #[test]
    fn test_shift_round_trip() {
        let shift = OffsetShift::new(600, 400);
        assert_eq!(shift.to_destination(999).unwrap(), 799);
        assert_eq!(shift.to_source(799).unwrap(), 999);
    }
}
