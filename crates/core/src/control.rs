// SPDX-License-Identifier: MIT

//! Control signals: the per-worker file a supervisor writes and a
//! worker reads to convey `pause`/`resume`/`stop` out-of-process.
//! Durable and restart-surviving because it is just a file, written
//! atomically by [`fsutil::atomic_write_json`].

use crate::fsutil::{self, FsError};
use crate::ids::WorkerKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSignal {
    pub command: ControlCommand,
    pub timestamp: DateTime<Utc>,
}

/// Path of the control-signal file for `worker` under `control_dir`:
/// `control/annotator_<a>_<d>.json`.
pub fn control_path(control_dir: &Path, worker: &WorkerKey) -> PathBuf {
    control_dir.join(format!("{}.json", worker.scoped_name()))
}

/// Writes a control signal atomically. Used by the supervisor to relay
/// pause/resume/stop to a worker it does not otherwise share memory with.
pub fn write_signal(control_dir: &Path, worker: &WorkerKey, command: ControlCommand, now: DateTime<Utc>) -> Result<(), FsError> {
    let path = control_path(control_dir, worker);
    fsutil::atomic_write_json(&path, &ControlSignal { command, timestamp: now })
}

/// Reads the current signal, if any. A malformed or absent file reads as
/// `None` — the worker just checks again at the next poll cadence.
pub fn read_signal(control_dir: &Path, worker: &WorkerKey) -> Result<Option<ControlSignal>, FsError> {
    fsutil::atomic_read_json(&control_path(control_dir, worker))
}

/// Removes the control file, best-effort.
pub fn clear_signal(control_dir: &Path, worker: &WorkerKey) {
    let _ = std::fs::remove_file(control_path(control_dir, worker));
}
