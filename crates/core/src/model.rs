// SPDX-License-Identifier: MIT

//! Shared domain records: the values that flow through `Event`s and end up
//! materialized in the state store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    NotStarted,
    Running,
    Paused,
    Stopped,
    Completed,
    Crashed,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::NotStarted => "not_started",
            WorkerStatus::Running => "running",
            WorkerStatus::Paused => "paused",
            WorkerStatus::Stopped => "stopped",
            WorkerStatus::Completed => "completed",
            WorkerStatus::Crashed => "crashed",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The status carried on a heartbeat row. Distinct from `WorkerStatus`
/// because a paused worker still emits heartbeats while sitting in its
/// pause wait-loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    Running,
    Paused,
}

/// WorkerEvent log entry kind (append-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerEventType {
    Started,
    Paused,
    Resumed,
    Stopped,
    Completed,
    Crashed,
    Reset,
}

/// Full record of a sample decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub sample_id: String,
    pub sample_text: String,
    pub label: String,
    pub response: String,
    pub is_malformed: bool,
    pub parse_error: Option<String>,
    pub validity_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-credential token bucket state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterState {
    pub tokens: f64,
    pub last_refill: DateTime<Utc>,
    pub requests_today: u32,
    pub day_start: chrono::NaiveDate,
    pub total_requests: u64,
    pub last_request: Option<DateTime<Utc>>,
}

impl RateLimiterState {
    pub fn fresh(now: DateTime<Utc>, burst_size: f64) -> Self {
        Self {
            tokens: burst_size,
            last_refill: now,
            requests_today: 0,
            day_start: now.date_naive(),
            total_requests: 0,
            last_request: None,
        }
    }
}

/// A read-model snapshot of a worker's full state, as returned by
/// `get_worker_status`. `status` is the *derived* status: it has
/// already been flipped to `Crashed` if the raw status was `Running` but
/// the heartbeat or process liveness check failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub status: WorkerStatus,
    pub enabled: bool,
    pub target_count: u32,
    pub total_completed: u32,
    pub total_malformed: u32,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub samples_per_min: f64,
    pub heartbeat_alive: bool,
}

impl WorkerSnapshot {
    pub fn progress_percent(&self) -> f64 {
        if self.target_count == 0 {
            return 100.0;
        }
        let done = self.total_completed + self.total_malformed;
        (done as f64 / self.target_count as f64 * 100.0).min(100.0)
    }
}
