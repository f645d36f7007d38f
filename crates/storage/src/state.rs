// SPDX-License-Identifier: MIT

//! `MaterializedState` is the in-memory read model folded from the WAL.
//! It is the sole mutable surface `Event`s may touch; nothing mutates a
//! row directly except through `apply_event`.

use chrono::{DateTime, Utc};
use lf_core::{
    AnnotationRecord, AnnotatorId, Event, HeartbeatStatus, RateLimiterState, WorkerEventType, WorkerKey, WorkerStatus,
};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A materialized Worker row.
///
/// `pid` is non-null for `running` and `paused` (the process that set it
/// may since have exited — callers needing a live/dead answer re-check via
/// `is_worker_alive`), and null for every other status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRow {
    pub key: WorkerKey,
    pub enabled: bool,
    pub target_count: u32,
    pub status: WorkerStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub total_completed: u32,
    pub total_malformed: u32,
    pub samples_per_min: f64,
}

impl WorkerRow {
    fn fresh(key: WorkerKey, enabled: bool, target_count: u32) -> Self {
        Self {
            key,
            enabled,
            target_count,
            status: WorkerStatus::NotStarted,
            pid: None,
            started_at: None,
            stopped_at: None,
            last_updated: None,
            total_completed: 0,
            total_malformed: 0,
            samples_per_min: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRow {
    pub pid: u32,
    pub iteration: u64,
    pub status: HeartbeatStatus,
    pub heartbeat_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerEventRow {
    pub event_type: WorkerEventType,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemState {
    pub last_factory_reset: Option<DateTime<Utc>>,
}

/// The full set of tables the daemon persists, keyed by
/// [`WorkerKey::scoped_name`] (or credential id for the rate limiter
/// table) so the whole structure round-trips through `serde_json` without
/// a custom map-key codec.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterializedState {
    pub workers: HashMap<String, WorkerRow>,
    pub completed_samples: HashMap<String, IndexSet<String>>,
    pub annotations: HashMap<String, Vec<AnnotationRecord>>,
    pub heartbeats: HashMap<String, HeartbeatRow>,
    pub worker_events: HashMap<String, Vec<WorkerEventRow>>,
    pub rate_limiters: HashMap<String, RateLimiterState>,
    pub system: SystemState,
}

impl MaterializedState {
    /// Folds one `Event` into the state. Must be idempotent: replaying
    /// the same event twice yields the same state as replaying it once.
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::WorkerInitialized { worker, enabled, target_count } => {
                let row = self
                    .workers
                    .entry(worker.scoped_name())
                    .or_insert_with(|| WorkerRow::fresh(worker.clone(), *enabled, *target_count));
                row.enabled = *enabled;
                row.target_count = *target_count;
            }
            Event::WorkerStatusChanged { worker, status_label, pid, event_type, at } => {
                let status = parse_status(status_label);
                if let Some(row) = self.workers.get_mut(&worker.scoped_name()) {
                    row.status = status;
                    row.last_updated = Some(*at);
                    match status {
                        WorkerStatus::Running => {
                            row.pid = *pid;
                            if row.started_at.is_none() {
                                row.started_at = Some(*at);
                            }
                            row.stopped_at = None;
                        }
                        WorkerStatus::Stopped | WorkerStatus::Completed | WorkerStatus::Crashed => {
                            row.pid = None;
                            row.stopped_at = Some(*at);
                        }
                        // Paused carries the pid it held when the process stopped running:
                        // still-interactive-paused (process alive, sleeping) or
                        // daily-cap-paused (process exited). The watchdog tells these
                        // apart with a liveness check rather than the status alone, so
                        // it treats the latter as a restart candidate.
                        WorkerStatus::Paused => {
                            row.pid = *pid;
                        }
                        WorkerStatus::NotStarted => {}
                    }
                }
                self.worker_events
                    .entry(worker.scoped_name())
                    .or_default()
                    .push(WorkerEventRow { event_type: *event_type, at: *at });
            }
            Event::SampleCompleted { worker, sample_id, label: _, is_malformed, at } => {
                let inserted = self.completed_samples.entry(worker.scoped_name()).or_default().insert(sample_id.clone());
                if inserted {
                    if let Some(row) = self.workers.get_mut(&worker.scoped_name()) {
                        if *is_malformed {
                            row.total_malformed += 1;
                        } else {
                            row.total_completed += 1;
                        }
                        row.last_updated = Some(*at);
                    }
                }
            }
            Event::AnnotationSaved { worker, record } => {
                self.annotations.entry(worker.scoped_name()).or_default().push(record.clone());
            }
            Event::HeartbeatSent { worker, pid, iteration, status, at } => {
                self.heartbeats
                    .insert(worker.scoped_name(), HeartbeatRow { pid: *pid, iteration: *iteration, status: *status, heartbeat_time: *at });
            }
            Event::HeartbeatCleared { worker } => {
                self.heartbeats.remove(&worker.scoped_name());
            }
            Event::SpeedUpdated { worker, samples_per_min } => {
                if let Some(row) = self.workers.get_mut(&worker.scoped_name()) {
                    row.samples_per_min = *samples_per_min;
                }
            }
            Event::RateLimiterUpdated { credential, state } => {
                self.rate_limiters.insert(credential.clone(), state.clone());
            }
            Event::WorkerReset { worker, at } => {
                self.reset_worker_tables(&worker.scoped_name());
                if let Some(row) = self.workers.get_mut(&worker.scoped_name()) {
                    row.status = WorkerStatus::NotStarted;
                    row.last_updated = Some(*at);
                }
            }
            Event::FactoryReset { at } => {
                let keys: Vec<String> = self.workers.keys().cloned().collect();
                for key in keys {
                    self.reset_worker_tables(&key);
                    if let Some(row) = self.workers.get_mut(&key) {
                        row.status = WorkerStatus::NotStarted;
                        row.last_updated = Some(*at);
                    }
                }
                self.rate_limiters.clear();
                self.system.last_factory_reset = Some(*at);
            }
        }
    }

    fn reset_worker_tables(&mut self, scoped_name: &str) {
        self.completed_samples.remove(scoped_name);
        self.annotations.remove(scoped_name);
        self.heartbeats.remove(scoped_name);
        self.worker_events.remove(scoped_name);
        if let Some(row) = self.workers.get_mut(scoped_name) {
            row.pid = None;
            row.started_at = None;
            row.stopped_at = None;
            row.total_completed = 0;
            row.total_malformed = 0;
            row.samples_per_min = 0.0;
        }
    }

    pub fn worker(&self, key: &WorkerKey) -> Option<&WorkerRow> {
        self.workers.get(&key.scoped_name())
    }

    pub fn all_worker_keys(&self) -> Vec<WorkerKey> {
        self.workers.values().map(|row| row.key.clone()).collect()
    }

    pub fn credential_for(&self, annotator: AnnotatorId) -> String {
        format!("annotator_{}", annotator.get())
    }
}

fn parse_status(label: &str) -> WorkerStatus {
    match label {
        "running" => WorkerStatus::Running,
        "paused" => WorkerStatus::Paused,
        "stopped" => WorkerStatus::Stopped,
        "completed" => WorkerStatus::Completed,
        "crashed" => WorkerStatus::Crashed,
        _ => WorkerStatus::NotStarted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn key() -> WorkerKey {
        WorkerKey::new(AnnotatorId::new(1), "urgency")
    }

    #[test]
    fn worker_initialized_is_idempotent() {
        let mut state = MaterializedState::default();
        let event = Event::WorkerInitialized { worker: key(), enabled: true, target_count: 5 };
        state.apply_event(&event);
        state.apply_event(&event);
        assert_eq!(state.worker(&key()).unwrap().target_count, 5);
    }

    #[test]
    fn sample_completed_is_idempotent_on_worker_and_sample_id() {
        let mut state = MaterializedState::default();
        state.apply_event(&Event::WorkerInitialized { worker: key(), enabled: true, target_count: 5 });
        let event = Event::SampleCompleted { worker: key(), sample_id: "s1".into(), label: "L".into(), is_malformed: false, at: Utc::now() };
        state.apply_event(&event);
        state.apply_event(&event);
        assert_eq!(state.worker(&key()).unwrap().total_completed, 1);
    }

    #[test]
    fn paused_status_retains_the_pid_it_was_given() {
        let mut state = MaterializedState::default();
        state.apply_event(&Event::WorkerInitialized { worker: key(), enabled: true, target_count: 5 });
        state.apply_event(&Event::WorkerStatusChanged {
            worker: key(),
            status_label: "running".into(),
            pid: Some(123),
            event_type: WorkerEventType::Started,
            at: Utc::now(),
        });
        state.apply_event(&Event::WorkerStatusChanged {
            worker: key(),
            status_label: "paused".into(),
            pid: Some(123),
            event_type: WorkerEventType::Paused,
            at: Utc::now(),
        });
        assert_eq!(state.worker(&key()).unwrap().pid, Some(123));
    }

    #[test]
    fn worker_reset_preserves_enabled_and_target_count() {
        let mut state = MaterializedState::default();
        state.apply_event(&Event::WorkerInitialized { worker: key(), enabled: true, target_count: 5 });
        state.apply_event(&Event::SampleCompleted { worker: key(), sample_id: "s1".into(), label: "L".into(), is_malformed: false, at: Utc::now() });
        state.apply_event(&Event::WorkerReset { worker: key(), at: Utc::now() });
        let row = state.worker(&key()).unwrap();
        assert!(row.enabled);
        assert_eq!(row.target_count, 5);
        assert_eq!(row.total_completed, 0);
    }

    #[test]
    fn factory_reset_clears_every_worker_and_rate_limiter() {
        let mut state = MaterializedState::default();
        state.apply_event(&Event::WorkerInitialized { worker: key(), enabled: true, target_count: 5 });
        state.apply_event(&Event::RateLimiterUpdated {
            credential: "annotator_1".into(),
            state: RateLimiterState::fresh(Utc::now(), 10.0),
        });
        state.apply_event(&Event::SampleCompleted { worker: key(), sample_id: "s1".into(), label: "L".into(), is_malformed: false, at: Utc::now() });
        state.apply_event(&Event::FactoryReset { at: Utc::now() });
        assert_eq!(state.worker(&key()).unwrap().total_completed, 0);
        assert!(state.rate_limiters.is_empty());
        assert!(state.system.last_factory_reset.is_some());
    }
}
