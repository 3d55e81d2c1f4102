//! Error types for k2l core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for k2l operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for k2l.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka source error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Lake store error
    #[error("Lake error: {0}")]
    Lake(#[from] LakeError),

    /// Offset remapping contract violation
    #[error("Remap error: {0}")]
    Remap(#[from] RemapError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Metrics registration or export error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

impl Error {
    /// Whether re-invoking the whole sync may succeed.
    ///
    /// Upstream I/O failures are retryable because the resume point is always
    /// re-derived from the lake. Contract violations and corruption are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kafka(e) => !matches!(e, KafkaError::MessageParse { .. }),
            Error::Lake(e) => matches!(e, LakeError::WriteFailed(_) | LakeError::ReadFailed(_)),
            Error::Io(_) => true,
            Error::Config(_)
            | Error::Remap(_)
            | Error::Serialization(_)
            | Error::Metrics(_)
            | Error::Shutdown => false,
        }
    }
}

/// Kafka-specific errors.
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Failed to connect to broker
    #[error("Connection failed to {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Partition assignment or seek error
    #[error("Partition assignment error: {0}")]
    PartitionAssignment(String),

    /// Watermark lookup failed
    #[error("Watermark fetch failed for {topic}/{partition}: {message}")]
    Watermarks {
        topic: String,
        partition: i32,
        message: String,
    },

    /// Consume error reported by the client
    #[error("Consume error: {0}")]
    Consume(String),

    /// Payload could not be decoded into a record
    #[error("Message parse error at offset {offset}: {message}")]
    MessageParse { offset: i64, message: String },

    /// Consumer closed
    #[error("Consumer closed")]
    ConsumerClosed,
}

/// Lake store errors.
#[derive(Error, Debug)]
pub enum LakeError {
    /// Journal corrupted
    #[error("Journal corrupted at line {line}: {message}")]
    Corrupted { line: u64, message: String },

    /// Segment contents do not match the journal checksum
    #[error("Checksum mismatch in segment {segment}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        segment: String,
        expected: String,
        actual: String,
    },

    /// A record does not carry the offset its append position requires
    #[error("Offset mismatch at batch index {index}: expected {expected}, found {found:?}")]
    OffsetMismatch {
        index: usize,
        expected: i64,
        found: Option<i64>,
    },

    /// Write or fsync failed
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Read failed
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// Lake store refuses appends (e.g. injected failure, read-only)
    #[error("Append rejected: {0}")]
    Rejected(String),
}

/// Offset remapping errors.
///
/// These are contract violations by the source reader, which must attach
/// offset metadata to every record. They are never retried.
#[derive(Error, Debug)]
pub enum RemapError {
    /// Record has no `kafka` metadata object
    #[error("value read from kafka topic missing kafka meta-data field: {record}")]
    MissingMetadata { record: String },

    /// Metadata object has no integer `offset`
    #[error("kafka meta-data field is missing 'offset' field: {metadata}")]
    MissingOffset { metadata: String },

    /// Offset arithmetic does not fit in an i64
    #[error("offset arithmetic overflows: {left} {op} {right}")]
    Overflow {
        left: i64,
        op: &'static str,
        right: i64,
    },

    /// Source offsets within a batch are not strictly increasing
    #[error("source offset {offset} follows {previous} in the same batch")]
    OutOfOrder { previous: i64, offset: i64 },
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Metrics(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
