//! Records and batches moved from a topic into the lake.
//!
//! A record is an opaque JSON object. The only structure k2l relies on is the
//! `kafka` metadata object, which must carry an integer `offset`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io;

/// Name of the metadata object attached to every record.
pub const META_FIELD: &str = "kafka";

/// Offset field inside the metadata object.
pub const OFFSET_FIELD: &str = "offset";

/// Pre-remap source offset, added by the remapper.
pub const INPUT_OFFSET_FIELD: &str = "input_offset";

/// Longest rendering embedded in error messages.
const MAX_RENDER_BYTES: usize = 512;

/// Kafka provenance metadata stored under the `kafka` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaMeta {
    /// Topic name
    pub topic: String,

    /// Partition number
    pub partition: i32,

    /// Offset (source offset before remapping, lake offset after)
    pub offset: i64,

    /// Original source offset, present once remapped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_offset: Option<i64>,

    /// Message timestamp (milliseconds since epoch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    /// Message key, when it is valid UTF-8
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl KafkaMeta {
    /// Create metadata for a freshly consumed message.
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            input_offset: None,
            timestamp: None,
            key: None,
        }
    }

    /// Set the message timestamp.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the message key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Build the JSON object stored in a record.
    pub fn to_value(&self) -> Value {
        let mut meta = Map::new();
        meta.insert("topic".into(), Value::from(self.topic.clone()));
        meta.insert("partition".into(), Value::from(self.partition));
        meta.insert(OFFSET_FIELD.into(), Value::from(self.offset));
        if let Some(input_offset) = self.input_offset {
            meta.insert(INPUT_OFFSET_FIELD.into(), Value::from(input_offset));
        }
        if let Some(timestamp) = self.timestamp {
            meta.insert("timestamp".into(), Value::from(timestamp));
        }
        if let Some(ref key) = self.key {
            meta.insert("key".into(), Value::from(key.clone()));
        }
        Value::Object(meta)
    }
}

/// A single record: application fields plus `kafka` metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Value);

impl Record {
    /// Wrap an arbitrary JSON value without validating it.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Build a record from a decoded payload and its metadata.
    ///
    /// Object payloads keep their fields; any other payload is stored under
    /// `value`. An existing `kafka` field in the payload is replaced.
    pub fn from_payload(payload: Value, meta: &KafkaMeta) -> Self {
        let mut fields = match payload {
            Value::Object(fields) => fields,
            other => {
                let mut fields = Map::new();
                fields.insert("value".into(), other);
                fields
            }
        };
        fields.insert(META_FIELD.into(), meta.to_value());
        Self(Value::Object(fields))
    }

    /// The underlying JSON value.
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Consume the record, returning the JSON value.
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Look up a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// The `kafka` metadata object, if present and an object.
    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.0.get(META_FIELD).and_then(Value::as_object)
    }

    pub(crate) fn metadata_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.0.get_mut(META_FIELD).and_then(Value::as_object_mut)
    }

    /// `kafka.offset` as an integer.
    pub fn offset(&self) -> Option<i64> {
        self.metadata()
            .and_then(|m| m.get(OFFSET_FIELD))
            .and_then(Value::as_i64)
    }

    /// `kafka.input_offset` as an integer.
    pub fn input_offset(&self) -> Option<i64> {
        self.metadata()
            .and_then(|m| m.get(INPUT_OFFSET_FIELD))
            .and_then(Value::as_i64)
    }

    /// Typed view of the metadata object.
    pub fn kafka_meta(&self) -> Option<KafkaMeta> {
        self.0
            .get(META_FIELD)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Serialized size in bytes (compact JSON).
    pub fn size_bytes(&self) -> usize {
        let mut counter = ByteCounter(0);
        // Writing into a counter cannot fail for a Value.
        let _ = serde_json::to_writer(&mut counter, &self.0);
        counter.0
    }

    /// Human-readable rendering for diagnostics.
    pub fn render(&self) -> String {
        render_value(&self.0)
    }
}

impl From<Value> for Record {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Render a value as compact JSON, truncated for error messages.
pub fn render_value(value: &Value) -> String {
    let mut rendered = value.to_string();
    if rendered.len() > MAX_RENDER_BYTES {
        let mut cut = MAX_RENDER_BYTES;
        while !rendered.is_char_boundary(cut) {
            cut -= 1;
        }
        rendered.truncate(cut);
        rendered.push_str("...");
    }
    rendered
}

struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An ordered batch of records in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    records: Vec<Record>,
    size_bytes: usize,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty batch with room for `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            size_bytes: 0,
        }
    }

    /// Build a batch from records, preserving their order.
    pub fn from_records(records: Vec<Record>) -> Self {
        let size_bytes = records.iter().map(Record::size_bytes).sum();
        Self {
            records,
            size_bytes,
        }
    }

    /// Append a record.
    pub fn push(&mut self, record: Record) {
        self.size_bytes += record.size_bytes();
        self.records.push(record);
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total serialized size of all records.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Records in order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// First record, if any.
    pub fn first(&self) -> Option<&Record> {
        self.records.first()
    }

    /// Iterate over the records.
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Consume the batch, returning its records.
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// `kafka.offset` of the first record.
    pub fn first_offset(&self) -> Option<i64> {
        self.records.first().and_then(Record::offset)
    }

    /// `kafka.offset` of the last record.
    pub fn last_offset(&self) -> Option<i64> {
        self.records.last().and_then(Record::offset)
    }

    /// Highest `kafka.input_offset` in the batch.
    pub fn max_input_offset(&self) -> Option<i64> {
        self.records.iter().filter_map(Record::input_offset).max()
    }
}

impl FromIterator<Record> for Batch {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        let mut batch = Batch::new();
        for record in iter {
            batch.push(record);
        }
        batch
    }
}

impl IntoIterator for Batch {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
