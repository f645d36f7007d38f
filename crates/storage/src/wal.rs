// SPDX-License-Identifier: MIT

//! Append-only, JSON-lines write-ahead log of `Event`s with monotonic
//! sequence numbers, modeled on the daemon's own WAL: buffered appends,
//! an explicit `flush` that fsyncs, and corruption handled by quarantining
//! the bad tail to a rotated `.bak` file rather than refusing to start.

use lf_core::Event;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    pub event: Event,
}

const FLUSH_ENTRY_THRESHOLD: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BAK_FILES: u32 = 3;

/// Picks the next `.bak`/`.bak.N` path, rotating older backups out. Keeps
/// at most [`MAX_BAK_FILES`] generations.
pub(crate) fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| if n == 1 { path.with_extension("bak") } else { path.with_extension(format!("bak.{n}")) };
    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }
    bak(1)
}

/// Parses the JSON-lines content of a WAL file, stopping at the first
/// line that fails to parse. Returns the valid entries and the byte
/// length of the valid prefix.
fn parse_lines(text: &str) -> (Vec<WalEntry>, usize) {
    let mut entries = Vec::new();
    let mut valid_len = 0usize;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches('\n');
        if trimmed.is_empty() {
            valid_len += line.len();
            continue;
        }
        match serde_json::from_str::<WalEntry>(trimmed) {
            Ok(entry) => {
                valid_len += line.len();
                entries.push(entry);
            }
            Err(_) => break,
        }
    }
    (entries, valid_len)
}

pub struct Wal {
    path: PathBuf,
    file: File,
    on_disk: Vec<WalEntry>,
    pending_text: String,
    pending: Vec<WalEntry>,
    write_seq: u64,
    processed_seq: u64,
    read_cursor: u64,
    last_flush: Instant,
}

impl Wal {
    /// Opens (creating if absent) the WAL at `path`. `processed_seq` is the
    /// watermark recorded in the last snapshot: entries at or below it are
    /// skipped by `next_unprocessed`. A corrupt tail is quarantined to a
    /// rotated `.bak` file and the valid prefix becomes the new content.
    pub fn open(path: &Path, processed_seq: u64) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = if path.exists() { fs::read(path)? } else { Vec::new() };
        let (entries, valid_len) = match std::str::from_utf8(&raw) {
            Ok(text) => parse_lines(text),
            Err(_) => (Vec::new(), 0),
        };
        if valid_len < raw.len() {
            tracing::warn!(path = %path.display(), "quarantining corrupt WAL tail");
            let bak = rotate_bak_path(path);
            fs::write(&bak, &raw)?;
            let mut rewritten = String::new();
            for entry in &entries {
                rewritten.push_str(&serde_json::to_string(entry)?);
                rewritten.push('\n');
            }
            fs::write(path, rewritten.as_bytes())?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let write_seq = entries.last().map(|e| e.seq).unwrap_or(0);
        Ok(Self {
            path: path.to_path_buf(),
            file,
            on_disk: entries,
            pending_text: String::new(),
            pending: Vec::new(),
            write_seq,
            processed_seq,
            read_cursor: processed_seq,
            last_flush: Instant::now(),
        })
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    pub fn processed_seq(&self) -> u64 {
        self.processed_seq
    }

    /// Buffers `event` with the next sequence number. Not durable until
    /// [`Wal::flush`].
    pub fn append(&mut self, event: &Event) -> Result<u64, WalError> {
        self.write_seq += 1;
        let entry = WalEntry { seq: self.write_seq, event: event.clone() };
        self.pending_text.push_str(&serde_json::to_string(&entry)?);
        self.pending_text.push('\n');
        self.pending.push(entry);
        Ok(self.write_seq)
    }

    /// Persists buffered entries to disk and fsyncs.
    pub fn flush(&mut self) -> Result<(), WalError> {
        if self.pending_text.is_empty() {
            return Ok(());
        }
        self.file.write_all(self.pending_text.as_bytes())?;
        self.file.sync_all()?;
        self.pending_text.clear();
        self.on_disk.append(&mut self.pending);
        self.last_flush = Instant::now();
        Ok(())
    }

    pub fn needs_flush(&self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        self.pending.len() >= FLUSH_ENTRY_THRESHOLD || self.last_flush.elapsed() >= FLUSH_INTERVAL
    }

    /// Returns the next entry past the read cursor, advancing it. Entries
    /// are visible whether flushed or still buffered.
    pub fn next_unprocessed(&mut self) -> Result<Option<WalEntry>, WalError> {
        let found = self
            .on_disk
            .iter()
            .chain(self.pending.iter())
            .find(|e| e.seq > self.read_cursor)
            .cloned();
        if let Some(entry) = &found {
            self.read_cursor = entry.seq;
        }
        Ok(found)
    }

    /// Records that entries up to and including `seq` have been folded
    /// into the materialized state. Used as the watermark on next open.
    pub fn mark_processed(&mut self, seq: u64) {
        if seq > self.processed_seq {
            self.processed_seq = seq;
        }
    }

    pub fn entries_after(&self, seq: u64) -> Vec<WalEntry> {
        self.on_disk.iter().chain(self.pending.iter()).filter(|e| e.seq > seq).cloned().collect()
    }

    /// Drops entries with `seq < floor` and rewrites the file, used by the
    /// checkpointer after a snapshot makes them redundant.
    pub fn truncate_before(&mut self, floor: u64) -> Result<(), WalError> {
        self.flush()?;
        self.on_disk.retain(|e| e.seq >= floor);
        let mut rewritten = String::new();
        for entry in &self.on_disk {
            rewritten.push_str(&serde_json::to_string(entry)?);
            rewritten.push('\n');
        }
        fs::write(&self.path, rewritten.as_bytes())?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(())
    }
}
