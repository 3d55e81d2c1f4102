//! Sync orchestration: read, remap, append.
//!
//! One call to [`SyncEngine::sync`] copies everything up to the source
//! high-water mark into the lake. The resume point is never stored by the
//! engine: it is asked from the lake at the start of every call, so a failed
//! call can simply be repeated.

use crate::config::{HighWaterPolicy, SyncConfig};
use crate::health::{HealthCheck, COMPONENT_KAFKA, COMPONENT_LAKE};
use crate::lake::LakeStore;
use crate::metrics::SyncMetrics;
use crate::remap;
use crate::source::SourceReader;
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Per-sync tunables.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Byte threshold for one batch read
    pub batch_threshold_bytes: usize,
    /// Timeout for one batch read
    pub batch_timeout: Duration,
    /// Whether the high-water bound is refreshed between batches
    pub high_water_policy: HighWaterPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            batch_threshold_bytes: config.batch_threshold_bytes,
            batch_timeout: config.batch_timeout(),
            high_water_policy: config.high_water_policy,
        }
    }
}

/// Work done by one sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub batches_committed: u64,
    pub records_committed: u64,
}

impl SyncSummary {
    pub fn is_noop(&self) -> bool {
        self.batches_committed == 0
    }
}

/// Copies records from a source into a lake, remapping offsets.
pub struct SyncEngine<S, L> {
    source: S,
    lake: L,
    options: SyncOptions,
    metrics: Option<Arc<SyncMetrics>>,
    health: Option<Arc<HealthCheck>>,
    /// First source offset read while the lake held no records
    origin: Option<i64>,
}

impl<S, L> SyncEngine<S, L>
where
    S: SourceReader,
    L: LakeStore,
{
    pub fn new(source: S, lake: L, options: SyncOptions) -> Self {
        Self {
            source,
            lake,
            options,
            metrics: None,
            health: None,
            origin: None,
        }
    }

    /// Record progress in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Report component health to `health`.
    pub fn with_health(mut self, health: Arc<HealthCheck>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn lake(&self) -> &L {
        &self.lake
    }

    pub fn into_parts(self) -> (S, L) {
        (self.source, self.lake)
    }

    /// Copy everything up to the current high-water mark into the lake.
    ///
    /// Returns `(0, 0)` without touching the source when the lake is already
    /// past the high-water mark. Any source, remap or lake error aborts the
    /// call; batches committed before the error stay committed.
    pub async fn sync(&mut self) -> Result<SyncSummary> {
        if let Some(ref health) = self.health {
            health.sync_started();
        }

        let result = self.run().await;

        match result {
            Ok(summary) => {
                if let Some(ref metrics) = self.metrics {
                    metrics.record_sync(summary.is_noop());
                }
                if let Some(ref health) = self.health {
                    health.sync_finished(true);
                }
            }
            Err(ref e) => {
                error!(error = %e, retryable = e.is_retryable(), "Sync failed");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_error(e);
                }
                if let Some(ref health) = self.health {
                    health.sync_finished(false);
                }
            }
        }

        result
    }

    async fn run(&mut self) -> Result<SyncSummary> {
        let next = self.lake.next_offset().await;
        let mut cursor = self.observe_lake(next)?;

        let hw = self.source.high_water().await;
        let snapshot = self.observe_source(hw)?;

        if let Some(ref metrics) = self.metrics {
            metrics.set_lake_next_offset(cursor);
            metrics.set_source_high_water(snapshot);
        }

        if cursor > snapshot {
            info!(
                cursor = cursor,
                high_water = snapshot,
                "Lake is ahead of source high-water mark, nothing to sync"
            );
            return Ok(SyncSummary::default());
        }

        let last = self.lake.last_input_offset().await;
        let mut last_input = self.observe_lake(last)?;
        // An empty lake still rewinds to where an earlier failed call began,
        // since that call may have read past records it never committed.
        let resume = match last_input {
            Some(last) => Some(last + 1),
            None => self.origin,
        };
        if let Some(offset) = resume {
            let seek = self.source.seek(offset).await;
            self.observe_source(seek)?;
        }

        info!(
            cursor = cursor,
            high_water = snapshot,
            resume_source_offset = ?resume,
            policy = ?self.options.high_water_policy,
            "Sync started"
        );

        let mut bound = snapshot;
        let mut summary = SyncSummary::default();

        loop {
            let read = self
                .source
                .read(self.options.batch_threshold_bytes, self.options.batch_timeout)
                .await;
            let batch = self.observe_source(read)?;
            if batch.is_empty() {
                break;
            }
            if last_input.is_none() && self.origin.is_none() {
                self.origin = batch.first_offset();
            }

            let started = Instant::now();
            let remapped = remap::adjust_offsets(&batch, cursor)?;
            let load = self.lake.load_batch(&remapped).await;
            let commit_id = self.observe_lake(load)?;
            let elapsed = started.elapsed();

            let records = batch.len() as u64;
            let first_offset = cursor;
            cursor += records as i64;
            summary.batches_committed += 1;
            summary.records_committed += records;
            last_input = remapped.max_input_offset().or(last_input);

            if let Some(ref metrics) = self.metrics {
                metrics.record_batch(batch.len(), batch.size_bytes(), elapsed);
                metrics.set_lake_next_offset(cursor);
            }

            debug!(
                commit_id = %commit_id,
                first_offset = first_offset,
                records = records,
                bytes = batch.size_bytes(),
                source_first = ?batch.first_offset(),
                duration_ms = elapsed.as_millis() as u64,
                "Batch committed"
            );

            if self.options.high_water_policy == HighWaterPolicy::Repoll {
                let hw = self.source.high_water().await;
                bound = self.observe_source(hw)?;
                if let Some(ref metrics) = self.metrics {
                    metrics.set_source_high_water(bound);
                }
            }
        }

        if let Some(ref metrics) = self.metrics {
            metrics.set_source_lag(bound - last_input.unwrap_or(-1));
        }

        info!(
            batches = summary.batches_committed,
            records = summary.records_committed,
            next_offset = cursor,
            high_water = bound,
            "Sync finished"
        );

        Ok(summary)
    }

    fn observe_source<T>(&self, result: Result<T>) -> Result<T> {
        self.observe(COMPONENT_KAFKA, result)
    }

    fn observe_lake<T>(&self, result: Result<T>) -> Result<T> {
        self.observe(COMPONENT_LAKE, result)
    }

    fn observe<T>(&self, component: &str, result: Result<T>) -> Result<T> {
        if let Some(ref health) = self.health {
            match result {
                Ok(_) => health.mark_healthy(component),
                Err(ref e) => health.mark_unhealthy(component, &e.to_string()),
            }
        }
        result
    }
}
