//! Directory-backed lake.
//!
//! Layout:
//!
//! ```text
//! <root>/journal.jsonl            commit journal, source of truth
//! <root>/segments/<commit>.jsonl  one immutable segment per commit
//! ```
//!
//! A commit writes its segment under a temporary name, fsyncs and renames it,
//! then appends the journal line. The journal line is the commit point: a
//! segment without one is an orphan and is removed on the next open.

use super::journal::{CommitEntry, Journal, JournalEntry};
use super::{check_contiguous, CommitId, LakeStore};
use crate::config::LakeConfig;
use crate::error::LakeError;
use crate::record::{Batch, Record};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const JOURNAL_FILE: &str = "journal.jsonl";
const SEGMENTS_DIR: &str = "segments";
const TMP_SUFFIX: &str = ".tmp";

/// What was repaired while opening the lake.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryReport {
    /// Commits replayed from the journal
    pub commits: usize,
    /// Bytes cut from a torn final journal line
    pub truncated_bytes: u64,
    /// Segment files removed because no commit references them
    pub orphans_removed: Vec<String>,
}

impl RecoveryReport {
    pub fn repaired(&self) -> bool {
        self.truncated_bytes > 0 || !self.orphans_removed.is_empty()
    }
}

/// Point-in-time description of a lake.
#[derive(Debug, Clone, Serialize)]
pub struct LakeSummary {
    pub path: PathBuf,
    pub commits: usize,
    pub records: u64,
    pub next_offset: i64,
    pub last_input_offset: Option<i64>,
    pub size_bytes: u64,
    pub last_commit_at: Option<DateTime<Utc>>,
}

struct LakeState {
    journal: Journal,
    commits: Vec<CommitEntry>,
    next_offset: i64,
    last_input_offset: Option<i64>,
}

/// Append-only lake stored in a local directory.
///
/// Appends run on the blocking thread pool, so the handle is a cheap clone
/// of shared state.
#[derive(Clone)]
pub struct FileLake {
    inner: Arc<LakeInner>,
}

struct LakeInner {
    root: PathBuf,
    segments_dir: PathBuf,
    fsync: bool,
    state: Mutex<LakeState>,
    recovery: RecoveryReport,
}

impl FileLake {
    /// Open the lake described by `config`.
    pub fn open(config: &LakeConfig) -> Result<Self> {
        Self::open_with(&config.path, config.fsync)
    }

    /// Open (creating if needed) a lake at `root` with fsync enabled.
    pub fn open_path(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(root.as_ref(), true)
    }

    fn open_with(root: &Path, fsync: bool) -> Result<Self> {
        let segments_dir = root.join(SEGMENTS_DIR);
        fs::create_dir_all(&segments_dir).map_err(|e| {
            Error::Lake(LakeError::WriteFailed(format!(
                "Failed to create lake directory {}: {}",
                segments_dir.display(),
                e
            )))
        })?;

        let (journal, replay) = Journal::open(&root.join(JOURNAL_FILE), fsync)?;

        let mut commits = Vec::with_capacity(replay.entries.len());
        let mut next_offset = 0i64;
        let mut last_input_offset: Option<i64> = None;

        for (index, entry) in replay.entries.into_iter().enumerate() {
            let JournalEntry::Commit(commit) = entry;
            let line = index as u64 + 1;

            if commit.first_offset != next_offset {
                return Err(Error::Lake(LakeError::Corrupted {
                    line,
                    message: format!(
                        "commit {} starts at offset {}, expected {}",
                        commit.commit_id, commit.first_offset, next_offset
                    ),
                }));
            }
            if !segments_dir.join(&commit.segment).is_file() {
                return Err(Error::Lake(LakeError::Corrupted {
                    line,
                    message: format!("segment {} is missing", commit.segment),
                }));
            }

            next_offset = commit.end_offset();
            last_input_offset = last_input_offset.max(commit.max_input_offset);
            commits.push(commit);
        }

        let orphans_removed = remove_orphans(&segments_dir, &commits)?;

        let recovery = RecoveryReport {
            commits: commits.len(),
            truncated_bytes: replay.truncated_bytes,
            orphans_removed,
        };

        if recovery.repaired() {
            warn!(
                path = %root.display(),
                truncated_bytes = recovery.truncated_bytes,
                orphans = recovery.orphans_removed.len(),
                "Lake repaired during open"
            );
        }

        info!(
            path = %root.display(),
            commits = commits.len(),
            next_offset = next_offset,
            "Lake opened"
        );

        Ok(Self {
            inner: Arc::new(LakeInner {
                root: root.to_path_buf(),
                segments_dir,
                fsync,
                state: Mutex::new(LakeState {
                    journal,
                    commits,
                    next_offset,
                    last_input_offset,
                }),
                recovery,
            }),
        })
    }

    /// Lake root directory.
    pub fn path(&self) -> &Path {
        &self.inner.root
    }

    /// Repairs made when the lake was opened.
    pub fn recovery(&self) -> &RecoveryReport {
        &self.inner.recovery
    }

    /// All commits in offset order.
    pub fn commits(&self) -> Vec<CommitEntry> {
        self.inner.state.lock().commits.clone()
    }

    pub fn summary(&self) -> LakeSummary {
        let state = self.inner.state.lock();
        LakeSummary {
            path: self.inner.root.clone(),
            commits: state.commits.len(),
            records: state.commits.iter().map(|c| c.record_count).sum(),
            next_offset: state.next_offset,
            last_input_offset: state.last_input_offset,
            size_bytes: state.commits.iter().map(|c| c.size_bytes).sum(),
            last_commit_at: state.commits.last().map(|c| c.committed_at),
        }
    }

    /// Read up to `limit` committed records starting at lake offset `from`.
    ///
    /// Segment checksums are verified before any record is returned.
    pub fn scan(&self, from: i64, limit: usize) -> Result<Vec<Record>> {
        let commits: Vec<CommitEntry> = {
            let state = self.inner.state.lock();
            state
                .commits
                .iter()
                .filter(|c| c.end_offset() > from)
                .cloned()
                .collect()
        };

        let mut records = Vec::new();
        for commit in commits {
            if records.len() >= limit {
                break;
            }
            let content = self.read_segment(&commit)?;
            let skip = (from - commit.first_offset).max(0) as usize;

            for (line_num, line) in BufReader::new(content.as_slice())
                .lines()
                .enumerate()
                .skip(skip)
            {
                if records.len() >= limit {
                    break;
                }
                let line = line.map_err(|e| Error::Lake(LakeError::ReadFailed(e.to_string())))?;
                let record: Record = serde_json::from_str(&line).map_err(|e| {
                    Error::Lake(LakeError::Corrupted {
                        line: line_num as u64 + 1,
                        message: format!("segment {}: {}", commit.segment, e),
                    })
                })?;
                records.push(record);
            }
        }

        Ok(records)
    }

    fn read_segment(&self, commit: &CommitEntry) -> Result<Vec<u8>> {
        let path = self.inner.segments_dir.join(&commit.segment);
        let content = fs::read(&path).map_err(|e| {
            Error::Lake(LakeError::ReadFailed(format!(
                "Failed to read segment {}: {}",
                path.display(),
                e
            )))
        })?;

        let actual = checksum(&content);
        if actual != commit.checksum {
            return Err(Error::Lake(LakeError::ChecksumMismatch {
                segment: commit.segment.clone(),
                expected: commit.checksum.clone(),
                actual,
            }));
        }

        Ok(content)
    }

}

impl LakeInner {
    /// Write a segment under a temporary name and move it into place.
    fn write_segment(&self, name: &str, content: &[u8]) -> Result<()> {
        let final_path = self.segments_dir.join(name);
        let tmp_path = self.segments_dir.join(format!("{}{}", name, TMP_SUFFIX));

        let write = || -> std::io::Result<()> {
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&tmp_path)?;
            file.write_all(content)?;
            if self.fsync {
                file.sync_all()?;
            }
            fs::rename(&tmp_path, &final_path)?;
            if self.fsync {
                sync_dir(&self.segments_dir)?;
            }
            Ok(())
        };

        write().map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            Error::Lake(LakeError::WriteFailed(format!(
                "Failed to write segment {}: {}",
                name, e
            )))
        })
    }

    fn append(&self, batch: &Batch) -> Result<CommitId> {
        let mut state = self.state.lock();
        check_contiguous(batch, state.next_offset)?;

        let mut content = Vec::with_capacity(batch.size_bytes() + batch.len());
        for record in batch {
            serde_json::to_writer(&mut content, record)?;
            content.push(b'\n');
        }

        let commit_id = CommitId::new();
        let segment = format!("{}.jsonl", commit_id);
        self.write_segment(&segment, &content)?;

        let commit = CommitEntry {
            commit_id,
            first_offset: state.next_offset,
            record_count: batch.len() as u64,
            max_input_offset: batch.max_input_offset(),
            segment,
            size_bytes: content.len() as u64,
            checksum: checksum(&content),
            committed_at: Utc::now(),
        };

        if let Err(e) = state.journal.append(&JournalEntry::Commit(commit.clone())) {
            let path = self.segments_dir.join(&commit.segment);
            if let Err(remove) = fs::remove_file(&path) {
                warn!(
                    segment = %path.display(),
                    error = %remove,
                    "Failed to remove uncommitted segment"
                );
            }
            return Err(e);
        }

        state.next_offset = commit.end_offset();
        state.last_input_offset = state.last_input_offset.max(commit.max_input_offset);

        debug!(
            commit_id = %commit.commit_id,
            first_offset = commit.first_offset,
            records = commit.record_count,
            bytes = commit.size_bytes,
            journal = %state.journal.path().display(),
            "Batch committed"
        );

        state.commits.push(commit);
        Ok(commit_id)
    }
}

#[async_trait]
impl LakeStore for FileLake {
    async fn next_offset(&self) -> Result<i64> {
        Ok(self.inner.state.lock().next_offset)
    }

    /// File writes and fsyncs run under `spawn_blocking`.
    async fn load_batch(&self, batch: &Batch) -> Result<CommitId> {
        let inner = Arc::clone(&self.inner);
        let batch = batch.clone();

        tokio::task::spawn_blocking(move || inner.append(&batch))
            .await
            .map_err(|e| {
                Error::Lake(LakeError::WriteFailed(format!("append task failed: {}", e)))
            })?
    }

    async fn last_input_offset(&self) -> Result<Option<i64>> {
        Ok(self.inner.state.lock().last_input_offset)
    }
}

/// CRC32 of `content` as lowercase hex.
fn checksum(content: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(content))
}

fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Delete segment files that no commit references.
fn remove_orphans(segments_dir: &Path, commits: &[CommitEntry]) -> Result<Vec<String>> {
    let committed: HashSet<&str> = commits.iter().map(|c| c.segment.as_str()).collect();
    let mut removed = Vec::new();

    let entries = fs::read_dir(segments_dir).map_err(|e| {
        Error::Lake(LakeError::ReadFailed(format!(
            "Failed to read segment directory: {}",
            e
        )))
    })?;

    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if committed.contains(name.as_str()) {
            continue;
        }

        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        fs::remove_file(&path).map_err(|e| {
            Error::Lake(LakeError::WriteFailed(format!(
                "Failed to remove orphan segment {}: {}",
                path.display(),
                e
            )))
        })?;
        warn!(segment = %name, "Removed orphan segment");
        removed.push(name);
    }

    removed.sort();
    Ok(removed)
}
