//! K2L Core - Kafka to lake offset-remapping sync engine
//!
//! This library copies an offset-ordered Kafka partition into an append-only
//! lake while translating offsets into the lake's contiguous offset space:
//!
//! - Resume point always derived from the lake, so any failed sync can be rerun
//! - Each batch shifted as a rigid block, original offset kept as `input_offset`
//! - Atomic, journaled appends in the file-backed lake
//! - Bounded runs: a sync never reads past the high-water mark it observed

pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod kafka;
pub mod lake;
pub mod metrics;
pub mod record;
pub mod remap;
pub mod retry;
pub mod source;

// Re-export commonly used types
pub use config::Config;
pub use engine::{SyncEngine, SyncOptions, SyncSummary};
pub use error::{Error, Result};
pub use error::{KafkaError, LakeError, RemapError};
pub use lake::{CommitId, LakeStore};
pub use record::{Batch, KafkaMeta, Record};
pub use source::SourceReader;
