//! In-process topic and reader.

use super::SourceReader;
use crate::record::{Batch, KafkaMeta, Record};
use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct TopicLog {
    base_offset: i64,
    records: Vec<Record>,
}

/// A single-partition, append-only topic held in memory.
///
/// Clones share the same log, so a test can keep producing while a
/// [`MemorySource`] reads.
#[derive(Debug, Clone)]
pub struct MemoryTopic {
    name: String,
    partition: i32,
    log: Arc<RwLock<TopicLog>>,
}

impl MemoryTopic {
    /// Create an empty topic whose first offset is 0.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_base_offset(name, 0)
    }

    /// Create an empty topic whose first offset is `base_offset`,
    /// as after retention has removed older messages.
    pub fn with_base_offset(name: impl Into<String>, base_offset: i64) -> Self {
        Self {
            name: name.into(),
            partition: 0,
            log: Arc::new(RwLock::new(TopicLog {
                base_offset,
                records: Vec::new(),
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Produce a payload, returning its offset.
    pub fn produce(&self, payload: Value) -> i64 {
        let mut log = self.log.write();
        let offset = log.base_offset + log.records.len() as i64;
        let meta = KafkaMeta::new(self.name.clone(), self.partition, offset);
        log.records.push(Record::from_payload(payload, &meta));
        offset
    }

    /// Produce `count` payloads built by `make`, returning the last offset.
    pub fn produce_many(&self, count: usize, mut make: impl FnMut(usize) -> Value) -> i64 {
        let mut last = self.high_water();
        for i in 0..count {
            last = self.produce(make(i));
        }
        last
    }

    /// Store a record verbatim at the next offset, without attaching metadata.
    pub fn produce_raw(&self, record: Record) -> i64 {
        let mut log = self.log.write();
        let offset = log.base_offset + log.records.len() as i64;
        log.records.push(record);
        offset
    }

    /// First offset held by the topic.
    pub fn earliest(&self) -> i64 {
        self.log.read().base_offset
    }

    /// Latest existing offset, `earliest - 1` when empty.
    pub fn high_water(&self) -> i64 {
        let log = self.log.read();
        log.base_offset + log.records.len() as i64 - 1
    }

    pub fn len(&self) -> usize {
        self.log.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record stored at `offset`, if any.
    pub fn get(&self, offset: i64) -> Option<Record> {
        let log = self.log.read();
        let index = usize::try_from(offset - log.base_offset).ok()?;
        log.records.get(index).cloned()
    }
}

/// Reader over a [`MemoryTopic`].
#[derive(Debug)]
pub struct MemorySource {
    topic: MemoryTopic,
    position: i64,
    bound: Option<i64>,
    max_records: Option<usize>,
}

impl MemorySource {
    /// Reader positioned at the topic's earliest offset.
    pub fn new(topic: MemoryTopic) -> Self {
        let position = topic.earliest();
        Self {
            topic,
            position,
            bound: None,
            max_records: None,
        }
    }

    /// Cap the number of records per read, in addition to the byte threshold.
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = Some(max_records.max(1));
        self
    }

    /// Offset of the next record to be read.
    pub fn position(&self) -> i64 {
        self.position
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn high_water(&mut self) -> Result<i64> {
        let hw = self.topic.high_water();
        self.bound = Some(hw);
        Ok(hw)
    }

    async fn read(&mut self, max_bytes: usize, _timeout: Duration) -> Result<Batch> {
        let bound = match self.bound {
            Some(bound) => bound,
            None => self.high_water().await?,
        };
        let max_records = self.max_records.unwrap_or(usize::MAX);

        let mut batch = Batch::new();
        while self.position <= bound && batch.len() < max_records {
            let Some(record) = self.topic.get(self.position) else {
                break;
            };
            batch.push(record);
            self.position += 1;

            if batch.size_bytes() >= max_bytes {
                break;
            }
        }

        Ok(batch)
    }

    async fn seek(&mut self, source_offset: i64) -> Result<()> {
        self.position = source_offset.max(self.topic.earliest());
        Ok(())
    }
}
