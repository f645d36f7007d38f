// SPDX-License-Identifier: MIT

//! File utilities: atomic write-then-rename JSON/text I/O, and
//! idempotent directory creation.
//!
//! Atomic write: serialize to a sibling temp file in the same directory,
//! flush + fsync, then rename over the target. Rename within one
//! filesystem is atomic, so a crash mid-write never leaves a torn file
//! at the destination path — readers see either the old content or the
//! new content, never a mix.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("io error at {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
}

fn io_err(path: &Path, source: std::io::Error) -> FsError {
    FsError::Io { path: path.display().to_string(), source }
}

/// Idempotent recursive directory creation.
pub fn ensure_dir(path: &Path) -> Result<(), FsError> {
    fs::create_dir_all(path).map_err(|e| io_err(path, e))
}

/// Write `contents` atomically to `path`: write to `path.tmp.<pid>`,
/// fsync, rename over `path`.
pub fn atomic_write_text(path: &Path, contents: &str) -> Result<(), FsError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp.{}",
        path.extension().and_then(|e| e.to_str()).unwrap_or("tmp"),
        std::process::id()
    ));
    {
        let mut file = File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
        file.write_all(contents.as_bytes()).map_err(|e| io_err(&tmp_path, e))?;
        file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Read a text file, returning `None` for a missing file so the caller
/// can distinguish "missing" from "malformed".
pub fn atomic_read_text(path: &Path) -> Result<Option<String>, FsError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Serialize `value` to pretty JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), FsError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| io_err(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    atomic_write_text(path, &json)
}

/// Read and parse a JSON file. Returns `Ok(None)` for a missing file
/// *or* a malformed payload — the original system's `atomic_read_json`
/// convention, which treats "file present but unparseable" the same as
/// "absent" so a torn write from a prior crash is self-healing rather
/// than fatal.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, FsError> {
    match atomic_read_text(path)? {
        None => Ok(None),
        Some(text) => Ok(serde_json::from_str(&text).ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, serde::Deserialize, PartialEq)]
    struct Payload {
        value: u32,
    }

    #[test]
    fn round_trips_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        atomic_write_json(&path, &Payload { value: 42 }).unwrap();
        let read: Option<Payload> = atomic_read_json(&path).unwrap();
        assert_eq!(read, Some(Payload { value: 42 }));
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let read: Option<Payload> = atomic_read_json(&path).unwrap();
        assert_eq!(read, None);
    }

    #[test]
    fn malformed_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        atomic_write_text(&path, "{not json").unwrap();
        let read: Option<Payload> = atomic_read_json(&path).unwrap();
        assert_eq!(read, None);
    }

    #[test]
    fn ensure_dir_is_idempotent() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        ensure_dir(&nested).unwrap();
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
