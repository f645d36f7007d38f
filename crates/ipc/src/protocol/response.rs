// SPDX-License-Identifier: MIT

use lf_core::WorkerSnapshot;
use serde::{Deserialize, Serialize};

/// A worker's identity flattened alongside its snapshot, since
/// [`WorkerSnapshot`] itself is keyless (it is always read by key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatusView {
    pub annotator: u32,
    pub domain: String,
    pub snapshot: WorkerSnapshot,
}

/// Summary of a `start-all` sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartAllSummary {
    pub started: u32,
    pub already_running: u32,
    pub concurrency_limited: u32,
    pub failed: u32,
    pub disabled: u32,
}

/// One response frame sent from `lfd` back to `lfctl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Pong,
    Ok,
    Error { message: String },
    WorkerStarted { pid: u32 },
    WorkerAlreadyRunning { pid: u32 },
    WorkerNotRunning,
    WorkerStopped { pid: u32, forced: bool, exit_code: Option<i32> },
    WorkerStatus(WorkerStatusView),
    Workers(Vec<WorkerStatusView>),
    StartAllSummary(StartAllSummary),
    AllStopped { count: u32 },
    FactoryResetDone,
}
