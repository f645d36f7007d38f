// SPDX-License-Identifier: MIT

//! Snapshot persistence for crash recovery: the complete materialized
//! state plus the WAL sequence number it reflects. Recovery loads the
//! snapshot then replays WAL entries after that sequence.

use crate::state::MaterializedState;
use crate::wal::rotate_bak_path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "v")]
    pub version: u32,
    pub seq: u64,
    pub state: MaterializedState,
    pub created_at: DateTime<Utc>,
}

/// Loads and periodically writes [`Snapshot`]s, rotating up to three
/// `.bak` generations of the previous file before each overwrite.
pub struct Checkpointer {
    path: std::path::PathBuf,
}

impl Checkpointer {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        match serde_json::from_str::<Snapshot>(&text) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "snapshot unreadable, falling back to full WAL replay");
                Ok(None)
            }
        }
    }

    pub fn save(&self, seq: u64, state: &MaterializedState, now: DateTime<Utc>) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        if self.path.exists() {
            let bak = rotate_bak_path(&self.path);
            fs::copy(&self.path, bak)?;
        }
        let snapshot = Snapshot { version: CURRENT_SNAPSHOT_VERSION, seq, state: state.clone(), created_at: now };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&snapshot)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_snapshot() {
        let dir = tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path().join("snapshot.json"));
        let state = MaterializedState::default();
        checkpointer.save(42, &state, Utc::now()).unwrap();
        let loaded = checkpointer.load().unwrap().unwrap();
        assert_eq!(loaded.seq, 42);
        assert_eq!(loaded.version, CURRENT_SNAPSHOT_VERSION);
    }

    #[test]
    fn missing_snapshot_loads_as_none() {
        let dir = tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path().join("snapshot.json"));
        assert!(checkpointer.load().unwrap().is_none());
    }

    #[test]
    fn overwrite_rotates_previous_into_bak() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let checkpointer = Checkpointer::new(&path);
        let state = MaterializedState::default();
        checkpointer.save(1, &state, Utc::now()).unwrap();
        checkpointer.save(2, &state, Utc::now()).unwrap();
        assert!(path.with_extension("bak").exists());
    }
}
