// SPDX-License-Identifier: MIT

//! Optional human-readable JSONL mirror of a worker's annotations,
//! alongside the durable store record. Ported from the original
//! `AnnotationWorker`'s per-worker `annotations.jsonl` file — useful for
//! a human skimming results without going through the store, never read
//! back by the system itself.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct MirrorRow<'a> {
    pub id: &'a str,
    pub text: &'a str,
    pub response: &'a str,
    pub label: &'a str,
    pub malformed: bool,
    pub parsing_error: Option<&'a str>,
    pub validity_error: Option<&'a str>,
    pub timestamp: DateTime<Utc>,
}

/// Appends `row` as one JSON line, creating the parent directory and
/// file on first use.
pub fn append(path: &Path, row: &MirrorRow<'_>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(row).map_err(io::Error::from)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")
}
