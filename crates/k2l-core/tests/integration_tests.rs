//! Integration tests for k2l-core.
//!
//! The Kafka tests require Docker to be running and are marked with #[ignore]
//! to avoid running them in normal test runs.
//!
//! Run with: cargo test --test integration_tests -- --ignored

use async_trait::async_trait;
use k2l_core::config::HighWaterPolicy;
use k2l_core::lake::{FileLake, LakeStore};
use k2l_core::source::{MemorySource, MemoryTopic, SourceReader};
use k2l_core::{
    Batch, CommitId, Error, KafkaMeta, LakeError, Record, Result, SyncEngine, SyncOptions,
    SyncSummary,
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Lake wrapper that lets `allowed` appends through, then fails the next
/// `failures` appends.
struct FailingLake<L> {
    inner: L,
    allowed: u64,
    failures: u64,
    appends: AtomicU64,
}

impl<L> FailingLake<L> {
    fn new(inner: L, allowed: u64) -> Self {
        Self {
            inner,
            allowed,
            failures: u64::MAX,
            appends: AtomicU64::new(0),
        }
    }

    fn recovering_after(mut self, failures: u64) -> Self {
        self.failures = failures;
        self
    }
}

#[async_trait]
impl<L: LakeStore> LakeStore for FailingLake<L> {
    async fn next_offset(&self) -> Result<i64> {
        self.inner.next_offset().await
    }

    async fn load_batch(&self, batch: &Batch) -> Result<CommitId> {
        let n = self.appends.fetch_add(1, Ordering::SeqCst);
        if n >= self.allowed && n - self.allowed < self.failures {
            return Err(LakeError::WriteFailed("injected failure".into()).into());
        }
        self.inner.load_batch(batch).await
    }

    async fn last_input_offset(&self) -> Result<Option<i64>> {
        self.inner.last_input_offset().await
    }
}

/// Source wrapper that produces more records into the topic after its
/// first read, standing in for data arriving while a sync runs.
struct ProducingSource {
    inner: MemorySource,
    topic: MemoryTopic,
    late_records: usize,
    produced: bool,
}

#[async_trait]
impl SourceReader for ProducingSource {
    async fn high_water(&mut self) -> Result<i64> {
        self.inner.high_water().await
    }

    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Batch> {
        let batch = self.inner.read(max_bytes, timeout).await?;
        if !self.produced {
            self.produced = true;
            self.topic
                .produce_many(self.late_records, |i| json!({"late": i}));
        }
        Ok(batch)
    }

    async fn seek(&mut self, source_offset: i64) -> Result<()> {
        self.inner.seek(source_offset).await
    }
}

/// Partition whose offsets have holes, as left by compaction or
/// transaction markers.
struct GappedSource {
    records: Vec<Record>,
    next: usize,
    max_records: usize,
}

impl GappedSource {
    fn new(offsets: &[i64], max_records: usize) -> Self {
        let records = offsets
            .iter()
            .map(|&offset| {
                Record::from_payload(json!({"at": offset}), &KafkaMeta::new("events", 0, offset))
            })
            .collect();
        Self {
            records,
            next: 0,
            max_records,
        }
    }
}

#[async_trait]
impl SourceReader for GappedSource {
    async fn high_water(&mut self) -> Result<i64> {
        Ok(self.records.last().and_then(Record::offset).unwrap_or(-1))
    }

    async fn read(&mut self, _max_bytes: usize, _timeout: Duration) -> Result<Batch> {
        let mut batch = Batch::new();
        for record in self.records.iter().skip(self.next).take(self.max_records) {
            batch.push(record.clone());
        }
        self.next += batch.len();
        Ok(batch)
    }

    async fn seek(&mut self, source_offset: i64) -> Result<()> {
        self.next = self
            .records
            .iter()
            .position(|r| r.offset().is_some_and(|o| o >= source_offset))
            .unwrap_or(self.records.len());
        Ok(())
    }
}

fn topic_with(count: usize) -> MemoryTopic {
    let topic = MemoryTopic::new("events");
    topic.produce_many(count, |i| json!({"id": i, "payload": format!("event-{}", i)}));
    topic
}

/// Fresh source, as a restarted process would build it.
fn source(topic: &MemoryTopic, max_records: usize) -> MemorySource {
    MemorySource::new(topic.clone()).with_max_records(max_records)
}

fn assert_contiguous(lake: &FileLake, expected_len: usize) {
    let records = lake.scan(0, usize::MAX).unwrap();
    assert_eq!(records.len(), expected_len);
    for (position, record) in records.iter().enumerate() {
        assert_eq!(record.offset(), Some(position as i64));
        assert_eq!(record.input_offset(), Some(position as i64));
        assert_eq!(record.get("id"), Some(&json!(position)));
    }
}

mod engine_integration {
    use super::*;

    #[tokio::test]
    async fn test_two_batches_into_file_lake() {
        let dir = TempDir::new().unwrap();
        let topic = topic_with(1000);
        let lake = Arc::new(FileLake::open_path(dir.path()).unwrap());

        let mut engine = SyncEngine::new(source(&topic, 600), lake.clone(), SyncOptions::default());
        let summary = engine.sync().await.unwrap();

        assert_eq!(
            summary,
            SyncSummary {
                batches_committed: 2,
                records_committed: 1000
            }
        );
        let sizes: Vec<_> = lake.commits().iter().map(|c| c.record_count).collect();
        assert_eq!(sizes, vec![600, 400]);
        assert_contiguous(&lake, 1000);
    }

    #[tokio::test]
    async fn test_idempotent_resume() {
        let dir = TempDir::new().unwrap();
        let topic = topic_with(25);

        {
            let lake = FileLake::open_path(dir.path()).unwrap();
            let mut engine = SyncEngine::new(source(&topic, 10), lake, SyncOptions::default());
            assert_eq!(engine.sync().await.unwrap().records_committed, 25);
        }

        // new process, nothing new in the topic
        let lake = FileLake::open_path(dir.path()).unwrap();
        let mut engine = SyncEngine::new(source(&topic, 10), lake, SyncOptions::default());
        let summary = engine.sync().await.unwrap();

        assert_eq!(summary, SyncSummary::default());
        assert_eq!(engine.lake().next_offset().await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_new_data_appends_contiguously() {
        let dir = TempDir::new().unwrap();
        let topic = topic_with(10);
        let lake = Arc::new(FileLake::open_path(dir.path()).unwrap());

        let mut engine = SyncEngine::new(source(&topic, 4), lake.clone(), SyncOptions::default());
        engine.sync().await.unwrap();

        topic.produce_many(5, |i| json!({"id": 10 + i, "payload": "more"}));

        // a fresh source starts at the earliest offset; the lake repositions it
        let mut engine = SyncEngine::new(source(&topic, 4), lake.clone(), SyncOptions::default());
        let summary = engine.sync().await.unwrap();

        assert_eq!(summary.records_committed, 5);
        assert_contiguous(&lake, 15);
    }

    #[tokio::test]
    async fn test_snapshot_bounds_the_run() {
        let dir = TempDir::new().unwrap();
        let topic = topic_with(6);
        let lake = Arc::new(FileLake::open_path(dir.path()).unwrap());

        let producing = ProducingSource {
            inner: source(&topic, 2),
            topic: topic.clone(),
            late_records: 4,
            produced: false,
        };
        let mut engine = SyncEngine::new(producing, lake.clone(), SyncOptions::default());
        let summary = engine.sync().await.unwrap();

        // the four late records are past the snapshot
        assert_eq!(summary.records_committed, 6);
        assert_eq!(topic.high_water(), 9);
        assert_eq!(lake.next_offset().await.unwrap(), 6);

        // the next run picks them up
        let summary = engine.sync().await.unwrap();
        assert_eq!(summary.records_committed, 4);
        assert_eq!(lake.next_offset().await.unwrap(), 10);
        assert_eq!(lake.last_input_offset().await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_repoll_includes_late_data() {
        let dir = TempDir::new().unwrap();
        let topic = topic_with(6);
        let lake = Arc::new(FileLake::open_path(dir.path()).unwrap());

        let producing = ProducingSource {
            inner: source(&topic, 2),
            topic: topic.clone(),
            late_records: 4,
            produced: false,
        };
        let options = SyncOptions {
            high_water_policy: HighWaterPolicy::Repoll,
            ..SyncOptions::default()
        };
        let mut engine = SyncEngine::new(producing, lake.clone(), options);

        assert_eq!(engine.sync().await.unwrap().records_committed, 10);
    }

    #[tokio::test]
    async fn test_crash_recovery_resumes_without_gap_or_duplicate() {
        let dir = TempDir::new().unwrap();
        let topic = topic_with(100);

        // fails on the fourth append
        {
            let lake = FileLake::open_path(dir.path()).unwrap();
            let failing = FailingLake::new(lake, 3);
            let mut engine = SyncEngine::new(source(&topic, 10), failing, SyncOptions::default());

            let err = engine.sync().await.unwrap_err();
            assert!(matches!(err, Error::Lake(LakeError::WriteFailed(_))));
            assert!(err.is_retryable());
            assert_eq!(engine.lake().next_offset().await.unwrap(), 30);
        }

        let lake = Arc::new(FileLake::open_path(dir.path()).unwrap());
        assert_eq!(lake.next_offset().await.unwrap(), 30);

        let mut engine = SyncEngine::new(source(&topic, 10), lake.clone(), SyncOptions::default());
        let summary = engine.sync().await.unwrap();

        assert_eq!(summary.batches_committed, 7);
        assert_eq!(summary.records_committed, 70);
        assert_contiguous(&lake, 100);
    }

    #[tokio::test]
    async fn test_orphan_segment_after_crash() {
        let dir = TempDir::new().unwrap();
        let topic = topic_with(20);

        {
            let lake = FileLake::open_path(dir.path()).unwrap();
            let mut engine = SyncEngine::new(source(&topic, 20), lake, SyncOptions::default());
            engine.sync().await.unwrap();
        }

        // crash between segment rename and journal append
        std::fs::write(
            dir.path().join("segments").join("uncommitted.jsonl"),
            b"{\"kafka\":{\"offset\":20}}\n",
        )
        .unwrap();
        topic.produce_many(5, |i| json!({"id": 20 + i}));

        let lake = Arc::new(FileLake::open_path(dir.path()).unwrap());
        assert_eq!(lake.recovery().orphans_removed, vec!["uncommitted.jsonl".to_string()]);

        let mut engine = SyncEngine::new(source(&topic, 20), lake.clone(), SyncOptions::default());
        assert_eq!(engine.sync().await.unwrap().records_committed, 5);
        assert_contiguous(&lake, 25);
    }

    #[tokio::test]
    async fn test_missing_metadata_commits_nothing_from_batch() {
        let dir = TempDir::new().unwrap();
        let topic = topic_with(5);
        topic.produce_raw(k2l_core::Record::new(json!({"id": 5})));
        let lake = Arc::new(FileLake::open_path(dir.path()).unwrap());

        // first batch is clean, second contains the bad record
        let mut engine = SyncEngine::new(source(&topic, 3), lake.clone(), SyncOptions::default());
        let err = engine.sync().await.unwrap_err();

        assert!(matches!(err, Error::Remap(_)));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("missing kafka meta-data field"));
        assert_eq!(lake.next_offset().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retry_wrapper_completes_after_transient_failure() {
        use k2l_core::retry::{retry, RetryConfig};

        let dir = TempDir::new().unwrap();
        let topic = topic_with(30);
        let lake = FileLake::open_path(dir.path()).unwrap();
        // second append fails twice, then the lake recovers
        let failing = Arc::new(FailingLake::new(lake, 1).recovering_after(2));

        let config = RetryConfig::new(Duration::from_millis(1), Duration::from_millis(5), 3);
        let attempts = &AtomicU64::new(0);
        let summary = retry(&config, "sync", || {
            let lake = failing.clone();
            let topic = topic.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                SyncEngine::new(source(&topic, 10), lake, SyncOptions::default())
                    .sync()
                    .await
            }
        })
        .await
        .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // only the last attempt's work is reported
        assert_eq!(summary.records_committed, 20);
        assert_eq!(failing.next_offset().await.unwrap(), 30);
        assert_eq!(failing.inner.commits().len(), 3);
    }

    #[tokio::test]
    async fn test_retry_on_same_engine_after_failed_first_append() {
        use k2l_core::retry::{retry, RetryConfig};
        use tokio::sync::Mutex;

        let dir = TempDir::new().unwrap();
        let topic = topic_with(30);
        let lake = FileLake::open_path(dir.path()).unwrap();
        // the very first append fails once
        let failing = Arc::new(FailingLake::new(lake.clone(), 0).recovering_after(1));
        let engine = Arc::new(Mutex::new(SyncEngine::new(
            source(&topic, 10),
            failing,
            SyncOptions::default(),
        )));

        let config = RetryConfig::new(Duration::from_millis(1), Duration::from_millis(5), 3);
        let attempts = &AtomicU64::new(0);
        let summary = retry(&config, "sync", || {
            let engine = Arc::clone(&engine);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                engine.lock().await.sync().await
            }
        })
        .await
        .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(summary.records_committed, 30);
        assert_contiguous(&lake, 30);
    }

    #[tokio::test]
    async fn test_gapped_source_offsets_are_packed() {
        let dir = TempDir::new().unwrap();
        let lake = FileLake::open_path(dir.path()).unwrap();
        let source = GappedSource::new(&[5, 7, 8, 12], 2);
        let mut engine = SyncEngine::new(source, lake.clone(), SyncOptions::default());

        let summary = engine.sync().await.unwrap();
        assert_eq!(
            summary,
            SyncSummary {
                batches_committed: 2,
                records_committed: 4
            }
        );

        let records = lake.scan(0, usize::MAX).unwrap();
        let offsets: Vec<_> = records.iter().map(|r| r.offset()).collect();
        let inputs: Vec<_> = records.iter().map(|r| r.input_offset()).collect();
        assert_eq!(offsets, vec![Some(0), Some(1), Some(2), Some(3)]);
        assert_eq!(inputs, vec![Some(5), Some(7), Some(8), Some(12)]);

        // resumes after source offset 12, not after destination offset 3
        assert!(engine.sync().await.unwrap().is_noop());
        assert_eq!(lake.commits().len(), 2);
    }
}

mod health_integration {
    use super::*;
    use k2l_core::health::{ComponentStatus, HealthCheck, HealthStatus, COMPONENT_LAKE};
    use k2l_core::metrics::{ErrorType, SyncMetrics};

    #[tokio::test]
    async fn test_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let topic = topic_with(10);
        let lake = FailingLake::new(FileLake::open_path(dir.path()).unwrap(), 0);
        let health = Arc::new(HealthCheck::for_sync());
        let metrics = Arc::new(SyncMetrics::new().unwrap());

        let mut engine = SyncEngine::new(source(&topic, 5), lake, SyncOptions::default())
            .with_health(health.clone())
            .with_metrics(metrics.clone());

        assert!(engine.sync().await.is_err());
        assert_eq!(health.overall_status(), HealthStatus::Unhealthy);
        assert!(matches!(
            health.get_component_status(COMPONENT_LAKE),
            Some(ComponentStatus::Unhealthy(_))
        ));
        assert_eq!(health.consecutive_failures(), 1);
        assert_eq!(metrics.errors_by_type(ErrorType::Lake), 1);

        let text = metrics.export_prometheus_text().unwrap();
        assert!(text.contains("k2l_errors{type=\"lake\"} 1"));
    }
}

mod kafka_integration {
    use super::*;
    use k2l_core::config::KafkaConfig;
    use k2l_core::kafka::KafkaSourceBuilder;
    use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
    use rdkafka::client::DefaultClientContext;
    use rdkafka::config::ClientConfig;
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::kafka::Kafka;

    async fn produce(bootstrap_servers: &str, topic: &str, ids: std::ops::Range<i64>) {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("message.timeout.ms", "5000")
            .create()
            .expect("Failed to create producer");

        for id in ids {
            let key = format!("key-{}", id);
            let payload = format!(r#"{{"id": {}, "value": "test-{}"}}"#, id, id);
            producer
                .send(
                    FutureRecord::to(topic).key(&key).payload(&payload),
                    Duration::from_secs(5),
                )
                .await
                .expect("Failed to produce message");
        }
    }

    /// Copy a real topic into a file lake across two runs.
    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_kafka_to_file_lake() {
        let kafka = Kafka::default()
            .start()
            .await
            .expect("Failed to start Kafka container");
        let bootstrap_servers = format!(
            "127.0.0.1:{}",
            kafka
                .get_host_port_ipv4(9093)
                .await
                .expect("Failed to get Kafka port")
        );

        let topic_name = "k2l-integration";
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &bootstrap_servers)
            .create()
            .expect("Failed to create admin client");
        admin
            .create_topics(
                &[NewTopic::new(topic_name, 1, TopicReplication::Fixed(1))],
                &AdminOptions::new(),
            )
            .await
            .expect("Failed to create topic");

        produce(&bootstrap_servers, topic_name, 0..10).await;

        let dir = TempDir::new().unwrap();
        let lake = Arc::new(FileLake::open_path(dir.path()).unwrap());
        let config = KafkaConfig::new(vec![bootstrap_servers.clone()], topic_name);
        let options = SyncOptions {
            batch_timeout: Duration::from_secs(2),
            ..SyncOptions::default()
        };

        let kafka_source = KafkaSourceBuilder::new(config.clone()).build().unwrap();
        let mut engine = SyncEngine::new(kafka_source, lake.clone(), options.clone());
        let summary = engine.sync().await.unwrap();
        assert_eq!(summary.records_committed, 10);

        produce(&bootstrap_servers, topic_name, 10..15).await;

        // a new source, as after a restart
        let kafka_source = KafkaSourceBuilder::new(config).build().unwrap();
        let mut engine = SyncEngine::new(kafka_source, lake.clone(), options);
        let summary = engine.sync().await.unwrap();
        assert_eq!(summary.records_committed, 5);

        let records = lake.scan(0, usize::MAX).unwrap();
        assert_eq!(records.len(), 15);
        for (position, record) in records.iter().enumerate() {
            assert_eq!(record.offset(), Some(position as i64));
            assert_eq!(record.input_offset(), Some(position as i64));
            assert_eq!(record.get("id"), Some(&json!(position)));
            assert_eq!(
                record.kafka_meta().unwrap().key,
                Some(format!("key-{}", position))
            );
        }
    }
}
