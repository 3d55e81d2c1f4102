//! Destination side of a sync: an append-only log with contiguous offsets.
//!
//! The lake owns the resume point. `next_offset` is the offset the next
//! appended record must carry, and an append either lands completely and
//! advances it or leaves it untouched.

mod file;
mod journal;
mod memory;

pub use file::{FileLake, LakeSummary, RecoveryReport};
pub use journal::{CommitEntry, JournalEntry};
pub use memory::MemoryLake;

use crate::error::LakeError;
use crate::record::Batch;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of one committed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(Uuid);

impl CommitId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CommitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Append-only record store.
#[async_trait]
pub trait LakeStore: Send + Sync {
    /// Offset the next appended record must carry.
    async fn next_offset(&self) -> Result<i64>;

    /// Atomically append a remapped batch.
    ///
    /// Record `i` must carry `kafka.offset == next_offset + i`. Either every
    /// record becomes visible and `next_offset` advances by `batch.len()`, or
    /// nothing changes.
    async fn load_batch(&self, batch: &Batch) -> Result<CommitId>;

    /// Highest `kafka.input_offset` committed so far.
    async fn last_input_offset(&self) -> Result<Option<i64>>;
}

#[async_trait]
impl<L: LakeStore + ?Sized> LakeStore for Arc<L> {
    async fn next_offset(&self) -> Result<i64> {
        (**self).next_offset().await
    }

    async fn load_batch(&self, batch: &Batch) -> Result<CommitId> {
        (**self).load_batch(batch).await
    }

    async fn last_input_offset(&self) -> Result<Option<i64>> {
        (**self).last_input_offset().await
    }
}

#[async_trait]
impl<L: LakeStore + ?Sized> LakeStore for Box<L> {
    async fn next_offset(&self) -> Result<i64> {
        (**self).next_offset().await
    }

    async fn load_batch(&self, batch: &Batch) -> Result<CommitId> {
        (**self).load_batch(batch).await
    }

    async fn last_input_offset(&self) -> Result<Option<i64>> {
        (**self).last_input_offset().await
    }
}

/// Reject batches that are empty or do not start exactly at `next_offset`
/// with consecutive offsets.
pub(crate) fn check_contiguous(batch: &Batch, next_offset: i64) -> Result<()> {
    if batch.is_empty() {
        return Err(LakeError::Rejected("empty batch".into()).into());
    }

    for (index, record) in batch.iter().enumerate() {
        let expected = next_offset + index as i64;
        let found = record.offset();
        if found != Some(expected) {
            return Err(LakeError::OffsetMismatch {
                index,
                expected,
                found,
            }
            .into());
        }
    }

    Ok(())
}
