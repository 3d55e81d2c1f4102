//! Sync metrics registered in a private Prometheus registry.

use crate::Error;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Bucket boundaries for batch commit duration, in seconds.
const COMMIT_DURATION_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Error types for labeled metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Source errors (connection, watermarks, consume, decode)
    Kafka,
    /// Lake errors (append, journal, checksum)
    Lake,
    /// Offset remapping contract violations
    Remap,
    /// Configuration errors
    Config,
    /// Local IO errors
    Io,
    /// Unknown/other errors
    Other,
}

impl ErrorType {
    /// Get the label value for Prometheus export.
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorType::Kafka => "kafka",
            ErrorType::Lake => "lake",
            ErrorType::Remap => "remap",
            ErrorType::Config => "config",
            ErrorType::Io => "io",
            ErrorType::Other => "other",
        }
    }

    /// Classify an error.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Kafka(_) => ErrorType::Kafka,
            Error::Lake(_) => ErrorType::Lake,
            Error::Remap(_) => ErrorType::Remap,
            Error::Config(_) => ErrorType::Config,
            Error::Io(_) => ErrorType::Io,
            Error::Serialization(_) | Error::Metrics(_) | Error::Shutdown => ErrorType::Other,
        }
    }

    const ALL: [ErrorType; 6] = [
        ErrorType::Kafka,
        ErrorType::Lake,
        ErrorType::Remap,
        ErrorType::Config,
        ErrorType::Io,
        ErrorType::Other,
    ];
}

/// Counters, gauges and histograms describing sync progress.
pub struct SyncMetrics {
    registry: Registry,

    // === COUNTERS ===
    syncs_total: IntCounter,
    noop_syncs_total: IntCounter,
    batches_committed_total: IntCounter,
    records_committed_total: IntCounter,
    bytes_committed_total: IntCounter,
    errors: IntCounterVec,

    // === GAUGES ===
    lake_next_offset: IntGauge,
    source_high_water: IntGauge,
    source_lag: IntGauge,
    last_success_timestamp: IntGauge,

    // === HISTOGRAM ===
    commit_duration: Histogram,
}

impl SyncMetrics {
    /// Create metrics in a fresh registry.
    pub fn new() -> crate::Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered in `registry`.
    pub fn with_registry(registry: Registry) -> crate::Result<Self> {
        let syncs_total = IntCounter::with_opts(Opts::new(
            "k2l_syncs_total",
            "Total sync invocations that completed",
        ))?;
        let noop_syncs_total = IntCounter::with_opts(Opts::new(
            "k2l_noop_syncs_total",
            "Sync invocations that found nothing to copy",
        ))?;
        let batches_committed_total = IntCounter::with_opts(Opts::new(
            "k2l_batches_committed_total",
            "Total batches appended to the lake",
        ))?;
        let records_committed_total = IntCounter::with_opts(Opts::new(
            "k2l_records_committed_total",
            "Total records appended to the lake",
        ))?;
        let bytes_committed_total = IntCounter::with_opts(Opts::new(
            "k2l_bytes_committed_total",
            "Total serialized record bytes appended to the lake",
        ))?;
        let errors = IntCounterVec::new(Opts::new("k2l_errors", "Errors by type"), &["type"])?;

        let lake_next_offset = IntGauge::with_opts(Opts::new(
            "k2l_lake_next_offset",
            "Next writable lake offset",
        ))?;
        let source_high_water = IntGauge::with_opts(Opts::new(
            "k2l_source_high_water",
            "Latest source offset observed",
        ))?;
        let source_lag = IntGauge::with_opts(Opts::new(
            "k2l_source_lag",
            "Source records not yet copied to the lake",
        ))?;
        let last_success_timestamp = IntGauge::with_opts(Opts::new(
            "k2l_last_success_timestamp_seconds",
            "Unix time of the last successful sync",
        ))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "k2l_commit_duration_seconds",
                "Duration of remap plus lake append per batch",
            )
            .buckets(COMMIT_DURATION_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(syncs_total.clone()))?;
        registry.register(Box::new(noop_syncs_total.clone()))?;
        registry.register(Box::new(batches_committed_total.clone()))?;
        registry.register(Box::new(records_committed_total.clone()))?;
        registry.register(Box::new(bytes_committed_total.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(lake_next_offset.clone()))?;
        registry.register(Box::new(source_high_water.clone()))?;
        registry.register(Box::new(source_lag.clone()))?;
        registry.register(Box::new(last_success_timestamp.clone()))?;
        registry.register(Box::new(commit_duration.clone()))?;

        // Pre-create every label so dashboards see zeros.
        for error_type in ErrorType::ALL {
            errors.with_label_values(&[error_type.as_label()]);
        }

        Ok(Self {
            registry,
            syncs_total,
            noop_syncs_total,
            batches_committed_total,
            records_committed_total,
            bytes_committed_total,
            errors,
            lake_next_offset,
            source_high_water,
            source_lag,
            last_success_timestamp,
            commit_duration,
        })
    }

    // === RECORDING ===

    /// Record a completed sync.
    pub fn record_sync(&self, noop: bool) {
        self.syncs_total.inc();
        if noop {
            self.noop_syncs_total.inc();
        }
        self.last_success_timestamp
            .set(chrono::Utc::now().timestamp());
    }

    /// Record one committed batch.
    pub fn record_batch(&self, records: usize, bytes: usize, duration: Duration) {
        self.batches_committed_total.inc();
        self.records_committed_total.inc_by(records as u64);
        self.bytes_committed_total.inc_by(bytes as u64);
        self.commit_duration.observe(duration.as_secs_f64());
    }

    /// Record an error with a specific type label.
    pub fn record_error_by_type(&self, error_type: ErrorType) {
        self.errors
            .with_label_values(&[error_type.as_label()])
            .inc();
    }

    /// Record an error, classified by its variant.
    pub fn record_error(&self, err: &Error) {
        self.record_error_by_type(ErrorType::from_error(err));
    }

    pub fn set_lake_next_offset(&self, offset: i64) {
        self.lake_next_offset.set(offset);
    }

    pub fn set_source_high_water(&self, high_water: i64) {
        self.source_high_water.set(high_water);
    }

    /// Lag is the distance between the source high-water mark and the last
    /// source offset present in the lake.
    pub fn set_source_lag(&self, lag: i64) {
        self.source_lag.set(lag.max(0));
    }

    // === GETTERS ===

    pub fn syncs_total(&self) -> u64 {
        self.syncs_total.get()
    }

    pub fn noop_syncs_total(&self) -> u64 {
        self.noop_syncs_total.get()
    }

    pub fn batches_committed_total(&self) -> u64 {
        self.batches_committed_total.get()
    }

    pub fn records_committed_total(&self) -> u64 {
        self.records_committed_total.get()
    }

    pub fn errors_by_type(&self, error_type: ErrorType) -> u64 {
        self.errors.with_label_values(&[error_type.as_label()]).get()
    }

    pub fn errors_total(&self) -> u64 {
        ErrorType::ALL.iter().map(|t| self.errors_by_type(*t)).sum()
    }

    pub fn lake_next_offset(&self) -> i64 {
        self.lake_next_offset.get()
    }

    pub fn source_lag(&self) -> i64 {
        self.source_lag.get()
    }

    pub fn commit_count(&self) -> u64 {
        self.commit_duration.get_sample_count()
    }

    /// The registry holding these metrics.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Export all metrics in Prometheus text format.
    ///
    /// # Example
    /// ```
    /// use k2l_core::metrics::SyncMetrics;
    ///
    /// let metrics = SyncMetrics::new().unwrap();
    /// metrics.record_sync(true);
    /// let text = metrics.export_prometheus_text().unwrap();
    /// assert!(text.contains("k2l_syncs_total 1"));
    /// ```
    pub fn export_prometheus_text(&self) -> crate::Result<String> {
        let mut buffer = Vec::with_capacity(4096);
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Metrics(e.to_string()))
    }
}
