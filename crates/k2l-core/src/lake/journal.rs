//! Commit journal for the file lake.
//!
//! One JSON entry per line. A line is durable once it has been written,
//! flushed and fsynced; a commit exists iff its line does.

use super::CommitId;
use crate::error::LakeError;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JournalEntry {
    /// A batch was committed
    Commit(CommitEntry),
}

/// One committed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitEntry {
    /// Commit identifier
    pub commit_id: CommitId,
    /// Lake offset of the first record
    pub first_offset: i64,
    /// Number of records in the batch
    pub record_count: u64,
    /// Highest source offset in the batch
    pub max_input_offset: Option<i64>,
    /// Segment file name under `segments/`
    pub segment: String,
    /// Segment size in bytes
    pub size_bytes: u64,
    /// CRC32 of the segment contents (hex)
    pub checksum: String,
    /// Commit time
    pub committed_at: DateTime<Utc>,
}

impl CommitEntry {
    /// One past the last lake offset in this commit.
    pub fn end_offset(&self) -> i64 {
        self.first_offset + self.record_count as i64
    }
}

/// What replaying the journal found.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    pub entries: Vec<JournalEntry>,
    /// Bytes dropped from an incomplete final line
    pub truncated_bytes: u64,
}

/// Append handle on the journal file.
pub(crate) struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
    len: u64,
    fsync: bool,
}

impl Journal {
    /// Open (creating if needed) and replay the journal.
    ///
    /// An unparsable final line without a trailing newline is a torn write and
    /// is cut off. Any other unparsable line is corruption.
    pub fn open(path: &Path, fsync: bool) -> Result<(Self, Replay)> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                Error::Lake(LakeError::ReadFailed(format!(
                    "Failed to open journal {}: {}",
                    path.display(),
                    e
                )))
            })?;

        let mut content = Vec::new();
        file.read_to_end(&mut content)
            .map_err(|e| Error::Lake(LakeError::ReadFailed(e.to_string())))?;

        let mut replay = Replay::default();
        let mut valid_len = 0usize;
        let mut needs_newline = false;
        let mut start = 0usize;
        let mut line_num = 0u64;

        while start < content.len() {
            line_num += 1;
            let (end, terminated) = match content[start..].iter().position(|b| *b == b'\n') {
                Some(pos) => (start + pos, true),
                None => (content.len(), false),
            };
            let line = &content[start..end];
            let next = if terminated { end + 1 } else { end };

            if line.iter().all(u8::is_ascii_whitespace) {
                start = next;
                valid_len = next;
                continue;
            }

            match serde_json::from_slice::<JournalEntry>(line) {
                Ok(entry) => {
                    replay.entries.push(entry);
                    valid_len = next;
                    needs_newline = !terminated;
                }
                Err(e) if !terminated => {
                    warn!(
                        path = %path.display(),
                        line = line_num,
                        bytes = line.len(),
                        error = %e,
                        "Truncating torn journal tail"
                    );
                    replay.truncated_bytes = (content.len() - valid_len) as u64;
                }
                Err(e) => {
                    return Err(Error::Lake(LakeError::Corrupted {
                        line: line_num,
                        message: format!("JSON parse error: {}", e),
                    }));
                }
            }
            start = next;
        }

        if replay.truncated_bytes > 0 {
            file.set_len(valid_len as u64)
                .and_then(|_| file.sync_all())
                .map_err(|e| Error::Lake(LakeError::WriteFailed(e.to_string())))?;
        }

        let mut journal = Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            len: valid_len as u64,
            fsync,
        };

        // A complete final entry that lost only its newline.
        if needs_newline {
            journal.write_raw(b"\n")?;
        }

        debug!(
            path = %path.display(),
            entries = replay.entries.len(),
            "Journal replayed"
        );

        Ok((journal, replay))
    }

    /// Durably append one entry.
    ///
    /// On failure the file is cut back to its previous length so a partial
    /// line cannot be followed by later entries.
    pub fn append(&mut self, entry: &JournalEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.write_raw(&line)
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let result = self
            .writer
            .write_all(bytes)
            .and_then(|_| self.writer.flush())
            .and_then(|_| {
                if self.fsync {
                    self.writer.get_ref().sync_data()
                } else {
                    Ok(())
                }
            });

        match result {
            Ok(()) => {
                self.len += bytes.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    warn!(
                        path = %self.path.display(),
                        error = %rollback,
                        "Failed to roll back partial journal write"
                    );
                }
                Err(Error::Lake(LakeError::WriteFailed(format!(
                    "Failed to append journal entry: {}",
                    e
                ))))
            }
        }
    }

    fn rollback(&mut self) -> std::io::Result<()> {
        let reopened = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(reopened));
        // Discard whatever the failed write left buffered.
        let (file, _unwritten) = stale.into_parts();
        file.set_len(self.len)?;
        file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
