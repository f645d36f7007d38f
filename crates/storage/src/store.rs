// SPDX-License-Identifier: MIT

//! `StateStore`: a single embedded database with WAL-style journaling.
//! Every public method is one critical section — append to the WAL,
//! fold into `MaterializedState`, optionally checkpoint — guarded by a
//! single `parking_lot::Mutex`, so every mutation runs inside a
//! transaction that commits on success, without a SQL engine.

use crate::snapshot::Checkpointer;
use crate::state::MaterializedState;
use crate::wal::{Wal, WalError};
use chrono::Duration as ChronoDuration;
use lf_core::{
    AnnotationRecord, Clock, Config, Event, HeartbeatStatus, RateLimiterState, WorkerEventType, WorkerKey, WorkerSnapshot,
    WorkerStatus,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Heartbeats older than this are considered stale (default 2 minutes).
pub const HEARTBEAT_TIMEOUT_SECS: i64 = 120;

const CHECKPOINT_INTERVAL: u64 = 200;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] crate::snapshot::SnapshotError),
}

struct Inner {
    wal: Wal,
    state: MaterializedState,
    checkpointer: Checkpointer,
    ops_since_checkpoint: u64,
}

pub struct StateStore<C: Clock> {
    inner: Mutex<Inner>,
    clock: C,
}

impl<C: Clock> StateStore<C> {
    /// Opens the store rooted at `dir`: loads the last snapshot (if any),
    /// opens the WAL at its watermark, and replays anything after it.
    pub fn open(dir: &Path, clock: C) -> Result<Self, StoreError> {
        let wal_path = dir.join("events.wal");
        let checkpointer = Checkpointer::new(dir.join("snapshot.json"));
        let snapshot = checkpointer.load()?;
        let processed_seq = snapshot.as_ref().map(|s| s.seq).unwrap_or(0);
        let mut state = snapshot.map(|s| s.state).unwrap_or_default();
        let mut wal = Wal::open(&wal_path, processed_seq)?;
        while let Some(entry) = wal.next_unprocessed()? {
            state.apply_event(&entry.event);
            wal.mark_processed(entry.seq);
        }
        wal.flush()?;
        Ok(Self { inner: Mutex::new(Inner { wal, state, checkpointer, ops_since_checkpoint: 0 }), clock })
    }

    fn commit(&self, inner: &mut Inner, event: Event) -> Result<(), StoreError> {
        let seq = inner.wal.append(&event)?;
        inner.state.apply_event(&event);
        inner.wal.mark_processed(seq);
        if inner.wal.needs_flush() {
            inner.wal.flush()?;
        }
        inner.ops_since_checkpoint += 1;
        if inner.ops_since_checkpoint >= CHECKPOINT_INTERVAL {
            self.checkpoint_locked(inner)?;
        }
        Ok(())
    }

    fn checkpoint_locked(&self, inner: &mut Inner) -> Result<(), StoreError> {
        inner.wal.flush()?;
        let floor = inner.wal.write_seq() + 1;
        inner.checkpointer.save(inner.wal.write_seq(), &inner.state, self.clock.now())?;
        inner.wal.truncate_before(floor)?;
        inner.ops_since_checkpoint = 0;
        Ok(())
    }

    /// Forces an out-of-band checkpoint, e.g. on graceful daemon shutdown.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        self.checkpoint_locked(&mut self.inner.lock())
    }

    pub fn initialize_workers(&self, config: &Config) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        for (annotator, domain) in config.worker_keys() {
            let Ok(domain_config) = config.domain_config(annotator, &domain) else { continue };
            let worker = WorkerKey::new(annotator, domain);
            let event = Event::WorkerInitialized { worker, enabled: domain_config.enabled, target_count: domain_config.target_count };
            self.commit(&mut inner, event)?;
        }
        Ok(())
    }

    pub fn update_worker_status(
        &self,
        worker: &WorkerKey,
        status: WorkerStatus,
        pid: Option<u32>,
        event_type: WorkerEventType,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let event = Event::WorkerStatusChanged {
            worker: worker.clone(),
            status_label: status.as_str().to_string(),
            pid,
            event_type,
            at: self.clock.now(),
        };
        self.commit(&mut inner, event)
    }

    /// Inserts a `CompletedSample` row if `(worker, sample_id)` is new,
    /// bumping the matching progress counter. Returns `false` for a
    /// replayed duplicate, letting callers skip downstream side effects.
    pub fn add_completed_sample(
        &self,
        worker: &WorkerKey,
        sample_id: &str,
        label: &str,
        malformed: bool,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let already_present = inner
            .state
            .completed_samples
            .get(&worker.scoped_name())
            .is_some_and(|set| set.contains(sample_id));
        if already_present {
            return Ok(false);
        }
        let event = Event::SampleCompleted {
            worker: worker.clone(),
            sample_id: sample_id.to_string(),
            label: label.to_string(),
            is_malformed: malformed,
            at: self.clock.now(),
        };
        self.commit(&mut inner, event)?;
        Ok(true)
    }

    pub fn save_annotation(&self, worker: &WorkerKey, record: AnnotationRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        self.commit(&mut inner, Event::AnnotationSaved { worker: worker.clone(), record })
    }

    fn heartbeat_alive_locked(&self, inner: &Inner, worker: &WorkerKey) -> bool {
        match inner.state.heartbeats.get(&worker.scoped_name()) {
            Some(heartbeat) => self.clock.now() - heartbeat.heartbeat_time < ChronoDuration::seconds(HEARTBEAT_TIMEOUT_SECS),
            None => false,
        }
    }

    fn to_snapshot(row: &crate::state::WorkerRow, heartbeat_alive: bool) -> WorkerSnapshot {
        WorkerSnapshot {
            status: row.status,
            enabled: row.enabled,
            target_count: row.target_count,
            total_completed: row.total_completed,
            total_malformed: row.total_malformed,
            pid: row.pid,
            started_at: row.started_at,
            stopped_at: row.stopped_at,
            last_updated: row.last_updated,
            samples_per_min: row.samples_per_min,
            heartbeat_alive,
        }
    }

    /// Derived-status rule: a `running` row observed without a live
    /// heartbeat is flipped to `crashed` in the same transaction as the
    /// read.
    pub fn get_worker_status(&self, worker: &WorkerKey) -> Result<Option<WorkerSnapshot>, StoreError> {
        let mut inner = self.inner.lock();
        let Some(mut row) = inner.state.worker(worker).cloned() else {
            return Ok(None);
        };
        let heartbeat_alive = self.heartbeat_alive_locked(&inner, worker);
        if row.status == WorkerStatus::Running && !heartbeat_alive {
            let at = self.clock.now();
            self.commit(
                &mut inner,
                Event::WorkerStatusChanged {
                    worker: worker.clone(),
                    status_label: WorkerStatus::Crashed.as_str().to_string(),
                    pid: None,
                    event_type: WorkerEventType::Crashed,
                    at,
                },
            )?;
            row.status = WorkerStatus::Crashed;
            row.pid = None;
            row.stopped_at = Some(at);
        }
        Ok(Some(Self::to_snapshot(&row, heartbeat_alive)))
    }

    pub fn send_heartbeat(&self, worker: &WorkerKey, pid: u32, iteration: u64, status: HeartbeatStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let at = self.clock.now();
        self.commit(&mut inner, Event::HeartbeatSent { worker: worker.clone(), pid, iteration, status, at })
    }

    pub fn clear_heartbeat(&self, worker: &WorkerKey) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        self.commit(&mut inner, Event::HeartbeatCleared { worker: worker.clone() })
    }

    pub fn update_speed(&self, worker: &WorkerKey, samples_per_min: f64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        self.commit(&mut inner, Event::SpeedUpdated { worker: worker.clone(), samples_per_min })
    }

    /// Workers whose raw status is `running` but whose heartbeat is
    /// stale — the watchdog's primary hunting ground.
    pub fn get_stuck_workers(&self) -> Result<Vec<WorkerKey>, StoreError> {
        let inner = self.inner.lock();
        let stuck = inner
            .state
            .workers
            .values()
            .filter(|row| row.status == WorkerStatus::Running && !self.heartbeat_alive_locked(&inner, &row.key))
            .map(|row| row.key.clone())
            .collect();
        Ok(stuck)
    }

    /// Workers with `status=running ∧ pid≠null`, with each `pid`
    /// re-verified against the OS via `is_alive`; any that failed
    /// liveness are flipped to `crashed` and excluded from the result.
    pub fn get_all_running_workers(&self, is_alive: impl Fn(u32) -> bool) -> Result<Vec<WorkerSnapshot>, StoreError> {
        let mut inner = self.inner.lock();
        let candidates: Vec<(WorkerKey, u32, crate::state::WorkerRow)> = inner
            .state
            .workers
            .values()
            .filter(|row| row.status == WorkerStatus::Running)
            .filter_map(|row| row.pid.map(|pid| (row.key.clone(), pid, row.clone())))
            .collect();
        let mut running = Vec::new();
        for (worker, pid, row) in candidates {
            if is_alive(pid) {
                let heartbeat_alive = self.heartbeat_alive_locked(&inner, &worker);
                running.push(Self::to_snapshot(&row, heartbeat_alive));
            } else {
                let at = self.clock.now();
                self.commit(
                    &mut inner,
                    Event::WorkerStatusChanged {
                        worker: worker.clone(),
                        status_label: WorkerStatus::Crashed.as_str().to_string(),
                        pid: None,
                        event_type: WorkerEventType::Crashed,
                        at,
                    },
                )?;
            }
        }
        Ok(running)
    }

    pub fn factory_reset(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let at = self.clock.now();
        self.commit(&mut inner, Event::FactoryReset { at })
    }

    pub fn reset_worker(&self, worker: &WorkerKey) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let at = self.clock.now();
        self.commit(&mut inner, Event::WorkerReset { worker: worker.clone(), at })
    }

    /// Current token-bucket row for `credential`, or `None` if it has never
    /// made a request. [`lf_ratelimit`] seeds a fresh row on first use.
    pub fn rate_limiter_state(&self, credential: &str) -> Option<RateLimiterState> {
        self.inner.lock().state.rate_limiters.get(credential).cloned()
    }

    /// Replaces a credential's token-bucket row wholesale, serialized by
    /// the same per-store mutex every other mutation goes through, so
    /// the read-modify-write is never interleaved with another one.
    pub fn update_rate_limiter_state(&self, credential: &str, state: RateLimiterState) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        self.commit(&mut inner, Event::RateLimiterUpdated { credential: credential.to_string(), state })
    }
}

impl<C: Clock> StateStore<C> {
    /// Path the WAL file lives at, for operators inspecting a store
    /// without opening it (diagnostics, `lfctl` debug commands).
    pub fn wal_path(dir: &Path) -> PathBuf {
        dir.join("events.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lf_core::{AnnotatorId, FakeClock};
    use tempfile::tempdir;

    fn worker() -> WorkerKey {
        WorkerKey::new(AnnotatorId::new(1), "urgency")
    }

    #[test]
    fn initialize_then_complete_samples_tracks_progress() {
        let dir = tempdir().unwrap();
        let clock = FakeClock::new();
        let store = StateStore::open(dir.path(), clock).unwrap();
        store
            .update_worker_status(&worker(), WorkerStatus::NotStarted, None, WorkerEventType::Reset)
            .unwrap();
        store.add_completed_sample(&worker(), "s1", "L1", false).unwrap();
        store.add_completed_sample(&worker(), "s1", "L1", false).unwrap();
        let status = store.get_worker_status(&worker()).unwrap();
        assert!(status.is_none(), "worker row only exists after WorkerInitialized");
    }

    #[test]
    fn duplicate_completed_sample_does_not_double_count() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), FakeClock::new()).unwrap();
        store.update_worker_status(&worker(), WorkerStatus::Running, Some(1), WorkerEventType::Started).unwrap();
        assert!(store.add_completed_sample(&worker(), "s1", "L1", false).unwrap());
        assert!(!store.add_completed_sample(&worker(), "s1", "L1", false).unwrap());
    }

    #[test]
    fn running_without_heartbeat_reads_as_crashed() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), FakeClock::new()).unwrap();
        store.update_worker_status(&worker(), WorkerStatus::Running, Some(123), WorkerEventType::Started).unwrap();
        let snapshot = store.get_worker_status(&worker()).unwrap().unwrap();
        assert_eq!(snapshot.status, WorkerStatus::Crashed);
        assert!(!snapshot.heartbeat_alive);
    }

    #[test]
    fn fresh_heartbeat_keeps_running_status() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), FakeClock::new()).unwrap();
        store.update_worker_status(&worker(), WorkerStatus::Running, Some(123), WorkerEventType::Started).unwrap();
        store.send_heartbeat(&worker(), 123, 1, HeartbeatStatus::Running).unwrap();
        let snapshot = store.get_worker_status(&worker()).unwrap().unwrap();
        assert_eq!(snapshot.status, WorkerStatus::Running);
        assert!(snapshot.heartbeat_alive);
    }

    #[test]
    fn get_all_running_workers_marks_dead_pid_crashed() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), FakeClock::new()).unwrap();
        store.update_worker_status(&worker(), WorkerStatus::Running, Some(999), WorkerEventType::Started).unwrap();
        let running = store.get_all_running_workers(|_pid| false).unwrap();
        assert!(running.is_empty());
        let snapshot = store.get_worker_status(&worker()).unwrap().unwrap();
        assert_eq!(snapshot.status, WorkerStatus::Crashed);
    }

    #[test]
    fn factory_reset_preserves_enabled_and_target_count() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), FakeClock::new()).unwrap();
        let mut annotators = std::collections::HashMap::new();
        let mut domains = std::collections::HashMap::new();
        domains.insert("urgency".to_string(), lf_core::DomainConfig { enabled: true, target_count: 7 });
        annotators.insert(1u32, domains);
        let config = Config {
            global: lf_core::GlobalConfig {
                model_name: "gemini-pro".into(),
                request_delay_seconds: 1.0,
                max_retries: 3,
                crash_detection_minutes: 5.0,
                control_check_iterations: 10,
                control_check_seconds: 5,
            },
            annotators,
        };
        store.initialize_workers(&config).unwrap();
        store.add_completed_sample(&worker(), "s1", "L", false).unwrap();
        store.factory_reset().unwrap();
        let row = store.inner.lock().state.worker(&worker()).cloned().unwrap();
        assert!(row.enabled);
        assert_eq!(row.target_count, 7);
        assert_eq!(row.total_completed, 0);
    }

    #[test]
    fn reopening_after_checkpoint_replays_correct_state() {
        let dir = tempdir().unwrap();
        {
            let store = StateStore::open(dir.path(), FakeClock::new()).unwrap();
            store.update_worker_status(&worker(), WorkerStatus::Running, Some(1), WorkerEventType::Started).unwrap();
            store.add_completed_sample(&worker(), "s1", "L", false).unwrap();
            store.checkpoint().unwrap();
            store.add_completed_sample(&worker(), "s2", "L", false).unwrap();
        }
        let store = StateStore::open(dir.path(), FakeClock::new()).unwrap();
        let row = store.inner.lock().state.worker(&worker()).cloned().unwrap();
        assert_eq!(row.total_completed, 2);
    }
}
