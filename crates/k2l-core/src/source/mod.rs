//! Source side of a sync: an offset-ordered stream of records.

mod memory;

pub use memory::{MemorySource, MemoryTopic};

use crate::record::Batch;
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Reads bounded batches from one offset-ordered stream.
///
/// Every record returned by `read` carries a `kafka` metadata object with an
/// integer `offset`. Reads never return records past the high-water mark most
/// recently returned by `high_water`.
#[async_trait]
pub trait SourceReader: Send {
    /// Latest existing offset in the stream (`-1` when empty).
    ///
    /// Also becomes the upper bound for subsequent reads.
    async fn high_water(&mut self) -> Result<i64>;

    /// Read the next batch.
    ///
    /// Returns once the batch reaches `max_bytes`, the high-water bound is
    /// reached, or `timeout` elapses, whichever comes first. An empty batch
    /// means nothing is left below the bound.
    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Batch>;

    /// Position the reader so the next record returned has offset
    /// `source_offset` (or the first existing offset after it).
    async fn seek(&mut self, source_offset: i64) -> Result<()>;
}

#[async_trait]
impl<S: SourceReader + ?Sized> SourceReader for Box<S> {
    async fn high_water(&mut self) -> Result<i64> {
        (**self).high_water().await
    }

    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Batch> {
        (**self).read(max_bytes, timeout).await
    }

    async fn seek(&mut self, source_offset: i64) -> Result<()> {
        (**self).seek(source_offset).await
    }
}
