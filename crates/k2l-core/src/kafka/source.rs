//! Kafka partition reader.
//!
//! The consumer is assigned a single topic partition directly instead of
//! subscribing through a group, so no rebalances happen and no offsets are
//! ever committed to the broker. The resume position always comes from the
//! lake through [`SourceReader::seek`].

use crate::config::{KafkaConfig, StartOffset};
use crate::record::{Batch, KafkaMeta, Record};
use crate::source::SourceReader;
use crate::{Error, KafkaError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Builder for a [`KafkaSource`].
pub struct KafkaSourceBuilder {
    config: KafkaConfig,
}

impl KafkaSourceBuilder {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }

    /// Create the consumer and assign it the configured partition.
    pub fn build(self) -> Result<KafkaSource> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", self.config.bootstrap_servers.join(","))
            .set("group.id", &self.config.group_id)
            // Position is owned by the lake, never by the broker.
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set(
                "auto.offset.reset",
                match self.config.start_offset {
                    StartOffset::Earliest => "earliest",
                    StartOffset::Latest => "latest",
                },
            );

        if let Some(ref protocol) = self.config.security.protocol {
            client_config.set("security.protocol", protocol);
        }
        if let Some(ref mechanism) = self.config.security.sasl_mechanism {
            client_config.set("sasl.mechanism", mechanism);
        }
        if let Some(ref username) = self.config.security.sasl_username {
            client_config.set("sasl.username", username);
        }
        if let Some(ref password) = self.config.security.sasl_password {
            client_config.set("sasl.password", password);
        }
        if let Some(ref path) = self.config.security.ssl_ca_location {
            client_config.set("ssl.ca.location", path.to_string_lossy().as_ref());
        }

        let consumer: StreamConsumer = client_config.create().map_err(|e| {
            Error::Kafka(KafkaError::ConnectionFailed {
                broker: self.config.bootstrap_servers.join(","),
                message: e.to_string(),
            })
        })?;

        let start = match self.config.start_offset {
            StartOffset::Earliest => Offset::Beginning,
            StartOffset::Latest => Offset::End,
        };

        let source = KafkaSource {
            consumer: Arc::new(consumer),
            topic: self.config.topic.clone(),
            partition: self.config.partition,
            metadata_timeout: self.config.metadata_timeout(),
            bound: None,
            position: None,
            pending: None,
        };
        source.assign(start)?;

        info!(
            topic = %source.topic,
            partition = source.partition,
            servers = %self.config.bootstrap_servers.join(","),
            "Kafka source assigned"
        );

        Ok(source)
    }
}

/// Reads one topic partition in offset order.
pub struct KafkaSource {
    consumer: Arc<StreamConsumer>,
    topic: String,
    partition: i32,
    metadata_timeout: Duration,
    /// Last high-water mark handed out; reads stop there
    bound: Option<i64>,
    /// Offset of the next record to return, once known
    position: Option<i64>,
    /// Message fetched past the bound, kept for the next read
    pending: Option<(i64, Record)>,
}

impl KafkaSource {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    fn assign(&self, offset: Offset) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, self.partition, offset)
            .map_err(|e| Error::Kafka(KafkaError::PartitionAssignment(e.to_string())))?;
        self.consumer
            .assign(&tpl)
            .map_err(|e| Error::Kafka(KafkaError::PartitionAssignment(e.to_string())))
    }

    /// Low and high watermarks (`high` is one past the last offset).
    pub async fn watermarks(&self) -> Result<(i64, i64)> {
        let consumer = Arc::clone(&self.consumer);
        let topic = self.topic.clone();
        let partition = self.partition;
        let timeout = self.metadata_timeout;

        let result = tokio::task::spawn_blocking(move || {
            consumer.fetch_watermarks(&topic, partition, timeout)
        })
        .await
        .map_err(|e| Error::Kafka(KafkaError::Consume(format!("watermark task failed: {}", e))))?;

        result.map_err(|e| {
            Error::Kafka(KafkaError::Watermarks {
                topic: self.topic.clone(),
                partition: self.partition,
                message: e.to_string(),
            })
        })
    }

    fn rewind(&mut self, offset: i64) -> Result<()> {
        self.assign(Offset::Offset(offset))?;
        self.position = Some(offset);
        self.pending = None;
        Ok(())
    }

    /// Pull messages into `batch` until the byte threshold, the bound or the
    /// deadline is reached.
    async fn fill(
        &mut self,
        batch: &mut Batch,
        bound: i64,
        max_bytes: usize,
        timeout: Duration,
    ) -> Result<()> {
        match self.pending.take() {
            Some((offset, record)) if offset <= bound => {
                batch.push(record);
                self.position = Some(offset + 1);
            }
            Some(pending) => {
                self.pending = Some(pending);
                return Ok(());
            }
            None => {}
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let stream = self.consumer.stream();
        tokio::pin!(stream);

        while batch.size_bytes() < max_bytes && !self.exhausted(bound) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, stream.next()).await {
                Ok(Some(Ok(msg))) => {
                    let offset = msg.offset();
                    if self.position.is_some_and(|p| offset < p) {
                        // redelivery from before a seek
                        continue;
                    }

                    let record = convert_message(&msg)?;
                    if offset > bound {
                        self.pending = Some((offset, record));
                        break;
                    }
                    batch.push(record);
                    self.position = Some(offset + 1);
                }
                Ok(Some(Err(e))) => {
                    return Err(Error::Kafka(KafkaError::Consume(e.to_string())));
                }
                Ok(None) => return Err(Error::Kafka(KafkaError::ConsumerClosed)),
                Err(_) => break, // Timeout
            }
        }
        Ok(())
    }

    fn exhausted(&self, bound: i64) -> bool {
        match self.position {
            Some(position) => position > bound,
            None => bound < 0,
        }
    }
}

#[async_trait]
impl SourceReader for KafkaSource {
    async fn high_water(&mut self) -> Result<i64> {
        let (low, high) = self.watermarks().await?;
        let hw = high - 1;
        self.bound = Some(hw);
        debug!(
            topic = %self.topic,
            partition = self.partition,
            low = low,
            high_water = hw,
            "Fetched watermarks"
        );
        Ok(hw)
    }

    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Batch> {
        let bound = match self.bound {
            Some(bound) => bound,
            None => self.high_water().await?,
        };

        let mut batch = Batch::new();
        if self.exhausted(bound) {
            return Ok(batch);
        }

        if let Err(e) = self.fill(&mut batch, bound, max_bytes, timeout).await {
            // records already taken from the stream must be delivered again
            if let Some(first) = batch.first_offset() {
                self.rewind(first)?;
            }
            return Err(e);
        }

        debug!(
            topic = %self.topic,
            records = batch.len(),
            bytes = batch.size_bytes(),
            position = ?self.position,
            "Read batch"
        );

        Ok(batch)
    }

    async fn seek(&mut self, source_offset: i64) -> Result<()> {
        self.rewind(source_offset)?;
        info!(
            topic = %self.topic,
            partition = self.partition,
            offset = source_offset,
            "Kafka source repositioned"
        );
        Ok(())
    }
}

fn convert_message(msg: &BorrowedMessage<'_>) -> Result<Record> {
    decode_record(
        msg.topic(),
        msg.partition(),
        msg.offset(),
        msg.key(),
        msg.payload(),
        msg.timestamp().to_millis(),
    )
}

/// Build a record from the raw parts of a message.
///
/// The payload must be JSON; an absent payload (tombstone) becomes `null`.
pub(crate) fn decode_record(
    topic: &str,
    partition: i32,
    offset: i64,
    key: Option<&[u8]>,
    payload: Option<&[u8]>,
    timestamp: Option<i64>,
) -> Result<Record> {
    let value = match payload {
        Some(bytes) => serde_json::from_slice::<Value>(bytes).map_err(|e| {
            Error::Kafka(KafkaError::MessageParse {
                offset,
                message: e.to_string(),
            })
        })?,
        None => Value::Null,
    };

    let mut meta = KafkaMeta::new(topic, partition, offset);
    if let Some(ts) = timestamp {
        meta = meta.with_timestamp(ts);
    }
    if let Some(key) = key.and_then(|k| std::str::from_utf8(k).ok()) {
        meta = meta.with_key(key);
    }

    Ok(Record::from_payload(value, &meta))
}
