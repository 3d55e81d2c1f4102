//! In-process lake.

use super::{check_contiguous, CommitId, LakeStore};
use crate::record::{Batch, Record};
use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MemoryLakeState {
    base_offset: i64,
    records: Vec<Record>,
    commits: Vec<(CommitId, usize)>,
}

/// Lake held in memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryLake {
    state: Arc<RwLock<MemoryLakeState>>,
}

impl MemoryLake {
    /// Empty lake whose first offset is 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty lake whose first offset is `next_offset`, as when earlier
    /// offsets are held by data from elsewhere.
    pub fn with_next_offset(next_offset: i64) -> Self {
        let lake = Self::default();
        lake.state.write().base_offset = next_offset;
        lake
    }

    /// All committed records in offset order.
    pub fn records(&self) -> Vec<Record> {
        self.state.read().records.clone()
    }

    /// Number of committed batches.
    pub fn commit_count(&self) -> usize {
        self.state.read().commits.len()
    }

    /// Record count of each committed batch, in commit order.
    pub fn commit_sizes(&self) -> Vec<usize> {
        self.state.read().commits.iter().map(|(_, n)| *n).collect()
    }
}

#[async_trait]
impl LakeStore for MemoryLake {
    async fn next_offset(&self) -> Result<i64> {
        let state = self.state.read();
        Ok(state.base_offset + state.records.len() as i64)
    }

    async fn load_batch(&self, batch: &Batch) -> Result<CommitId> {
        let mut state = self.state.write();
        let next_offset = state.base_offset + state.records.len() as i64;
        check_contiguous(batch, next_offset)?;

        let commit_id = CommitId::new();
        state.records.extend(batch.iter().cloned());
        state.commits.push((commit_id, batch.len()));
        Ok(commit_id)
    }

    async fn last_input_offset(&self) -> Result<Option<i64>> {
        Ok(self
            .state
            .read()
            .records
            .iter()
            .filter_map(Record::input_offset)
            .max())
    }
}
