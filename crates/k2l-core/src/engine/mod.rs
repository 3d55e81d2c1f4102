//! Sync engine orchestration.

mod sync;

pub use crate::config::HighWaterPolicy;
pub use sync::{SyncEngine, SyncOptions, SyncSummary};
