// SPDX-License-Identifier: MIT

//! `WorkerManager`: spawns and terminates worker processes, relays
//! control signals, and aggregates status across the fleet. Grounded in
//! `worker_manager.py`'s `WorkerManager` class, with the Python
//! threading model replaced by one OS process per worker.

use lf_core::{
    control, AnnotatorId, Clock, Config, ConfigError, Domain, WorkerEventType, WorkerKey, WorkerSnapshot, WorkerStatus,
};
use lf_storage::{StateStore, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Outcome of `start_worker`, mirroring the original's string-tagged
/// return value as a closed set of variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning { pid: Option<u32> },
    ConcurrencyLimitReached,
    Disabled,
    SpawnFailed(String),
}

/// Outcome of `stop_worker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { pid: Option<u32>, forced: bool, exit_code: Option<i32> },
    NotRunning,
}

/// Tally returned by `start_all_enabled`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartAllSummary {
    pub started: u32,
    pub already_running: u32,
    pub disabled: u32,
    pub concurrency_limited: u32,
    pub failed: u32,
}

/// Spawns and supervises worker processes for one configuration tree.
///
/// `processes` holds a handle to every child this manager instance
/// personally spawned; after a supervisor restart that map starts
/// empty even though the store may still show workers `running` under
/// PIDs this instance never spawned itself — `stop_worker` falls back
/// to polling OS liveness directly in that case.
pub struct WorkerManager<C: Clock> {
    store: Arc<StateStore<C>>,
    config: Arc<Config>,
    clock: C,
    control_dir: PathBuf,
    worker_binary: PathBuf,
    project_root: PathBuf,
    max_concurrent_workers: usize,
    processes: Mutex<HashMap<WorkerKey, Child>>,
}

impl<C: Clock> WorkerManager<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<StateStore<C>>,
        config: Arc<Config>,
        clock: C,
        control_dir: PathBuf,
        worker_binary: PathBuf,
        project_root: PathBuf,
        max_concurrent_workers: usize,
    ) -> Self {
        Self { store, config, clock, control_dir, worker_binary, project_root, max_concurrent_workers, processes: Mutex::new(HashMap::new()) }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Every configured worker whose store snapshot currently reads
    /// `running`, alongside the snapshot itself.
    fn running_snapshots(&self) -> Result<Vec<(WorkerKey, WorkerSnapshot)>, SupervisorError> {
        let mut running = Vec::new();
        for (annotator, domain) in self.config.worker_keys() {
            let key = WorkerKey::new(annotator, domain);
            if let Some(snapshot) = self.store.get_worker_status(&key)? {
                if snapshot.status == WorkerStatus::Running {
                    running.push((key, snapshot));
                }
            }
        }
        Ok(running)
    }

    /// Sweeps every nominally-running worker and re-verifies OS
    /// liveness via [`lf_core::is_alive`], flipping dead ones to
    /// `crashed`. Run once at daemon startup to reconcile orphaned
    /// registrations left behind by an earlier supervisor instance,
    /// independent of the watchdog's own ticks.
    pub fn reconcile_orphans(&self) -> Result<(), SupervisorError> {
        let before = self.running_snapshots()?.len();
        let still_running = self.store.get_all_running_workers(lf_core::is_alive)?;
        let flipped = before.saturating_sub(still_running.len());
        if flipped > 0 {
            tracing::warn!(flipped, "reconciled orphaned worker registrations on startup");
        }
        Ok(())
    }

    pub fn start_worker(&self, annotator: AnnotatorId, domain: &Domain) -> Result<StartOutcome, SupervisorError> {
        let key = WorkerKey::new(annotator, domain.clone());

        if let Some(snapshot) = self.store.get_worker_status(&key)? {
            if snapshot.status == WorkerStatus::Running {
                return Ok(StartOutcome::AlreadyRunning { pid: snapshot.pid });
            }
        }

        let running_count = self.running_snapshots()?.len();
        if running_count >= self.max_concurrent_workers {
            return Ok(StartOutcome::ConcurrencyLimitReached);
        }

        let domain_config = self.config.domain_config(annotator, domain)?;
        if !domain_config.enabled {
            return Ok(StartOutcome::Disabled);
        }

        let child = Command::new(&self.worker_binary)
            .arg(annotator.get().to_string())
            .arg(domain.as_str())
            .current_dir(&self.project_root)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(err) => return Ok(StartOutcome::SpawnFailed(err.to_string())),
        };
        let pid = child.id();

        self.store.update_worker_status(&key, WorkerStatus::Running, Some(pid), WorkerEventType::Started)?;
        if let Some(previous) = self.processes.lock().insert(key, child) {
            // A stale handle from an earlier spawn of the same key; reap it
            // without blocking so we don't leak a zombie process entry.
            let _ = previous;
        }
        Ok(StartOutcome::Started { pid })
    }

    pub fn stop_worker(&self, annotator: AnnotatorId, domain: &Domain, timeout: Duration) -> Result<StopOutcome, SupervisorError> {
        let key = WorkerKey::new(annotator, domain.clone());
        let Some(snapshot) = self.store.get_worker_status(&key)? else {
            return Ok(StopOutcome::NotRunning);
        };
        if snapshot.status != WorkerStatus::Running {
            return Ok(StopOutcome::NotRunning);
        }
        let pid = snapshot.pid;

        control::write_signal(&self.control_dir, &key, lf_core::ControlCommand::Stop, self.clock.now())
            .unwrap_or_else(|err| tracing::warn!(worker = %key, error = %err, "failed to write stop signal"));

        let (forced, exit_code) = if let Some(mut child) = self.processes.lock().remove(&key) {
            self.wait_owned_child(&mut child, timeout)
        } else if let Some(pid) = pid {
            (self.wait_foreign_pid(pid, &key, timeout), None)
        } else {
            (false, None)
        };

        self.store
            .clear_heartbeat(&key)
            .unwrap_or_else(|err| tracing::warn!(worker = %key, error = %err, "failed to clear heartbeat on stop"));
        control::clear_signal(&self.control_dir, &key);
        self.store.update_worker_status(&key, WorkerStatus::Stopped, None, WorkerEventType::Stopped)?;

        Ok(StopOutcome::Stopped { pid, forced, exit_code })
    }

    /// Polls a handle this manager spawned itself; force-kills past
    /// `timeout`. Returns whether force-termination was needed and the
    /// process's exit code (`None` if it had to be force-killed).
    fn wait_owned_child(&self, child: &mut Child, timeout: Duration) -> (bool, Option<i32>) {
        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return (false, status.code()),
                Ok(None) if Instant::now() >= deadline => break,
                Ok(None) => std::thread::sleep(Duration::from_millis(200)),
                Err(err) => {
                    tracing::warn!(error = %err, "error polling worker child process");
                    break;
                }
            }
        }
        let _ = child.kill();
        let _ = child.wait();
        (true, None)
    }

    /// Polls OS liveness of a PID this manager did not itself spawn
    /// (supervisor restarted since the worker started); force-kills
    /// past `timeout` via SIGKILL.
    fn wait_foreign_pid(&self, pid: u32, worker: &WorkerKey, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while lf_core::is_worker_alive(pid, worker) {
            if Instant::now() >= deadline {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
                return true;
            }
            std::thread::sleep(Duration::from_secs(1));
        }
        false
    }

    pub fn pause_worker(&self, annotator: AnnotatorId, domain: &Domain) -> Result<(), SupervisorError> {
        let key = WorkerKey::new(annotator, domain.clone());
        control::write_signal(&self.control_dir, &key, lf_core::ControlCommand::Pause, self.clock.now())
            .unwrap_or_else(|err| tracing::warn!(worker = %key, error = %err, "failed to write pause signal"));
        Ok(())
    }

    pub fn resume_worker(&self, annotator: AnnotatorId, domain: &Domain) -> Result<(), SupervisorError> {
        let key = WorkerKey::new(annotator, domain.clone());
        control::write_signal(&self.control_dir, &key, lf_core::ControlCommand::Resume, self.clock.now())
            .unwrap_or_else(|err| tracing::warn!(worker = %key, error = %err, "failed to write resume signal"));
        Ok(())
    }

    pub fn get_worker_status(&self, annotator: AnnotatorId, domain: &Domain) -> Result<Option<WorkerSnapshot>, SupervisorError> {
        Ok(self.store.get_worker_status(&WorkerKey::new(annotator, domain.clone()))?)
    }

    pub fn get_all_statuses(&self) -> Result<Vec<(WorkerKey, WorkerSnapshot)>, SupervisorError> {
        let mut all = Vec::new();
        for (annotator, domain) in self.config.worker_keys() {
            let key = WorkerKey::new(annotator, domain);
            if let Some(snapshot) = self.store.get_worker_status(&key)? {
                all.push((key, snapshot));
            }
        }
        Ok(all)
    }

    pub fn stop_all_workers(&self, timeout: Duration) -> Result<u32, SupervisorError> {
        let mut stopped = 0;
        for (key, _) in self.running_snapshots()? {
            if matches!(self.stop_worker(key.annotator, &key.domain, timeout)?, StopOutcome::Stopped { .. }) {
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    pub fn start_all_enabled(&self) -> Result<StartAllSummary, SupervisorError> {
        let mut summary = StartAllSummary::default();
        for (annotator, domain) in self.config.worker_keys() {
            match self.start_worker(annotator, &domain)? {
                StartOutcome::Started { .. } => summary.started += 1,
                StartOutcome::AlreadyRunning { .. } => summary.already_running += 1,
                StartOutcome::Disabled => summary.disabled += 1,
                StartOutcome::ConcurrencyLimitReached => summary.concurrency_limited += 1,
                StartOutcome::SpawnFailed(err) => {
                    tracing::error!(%annotator, %domain, error = %err, "failed to spawn worker");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Whether this manager instance holds a live handle for `worker`
    /// (used by the watchdog to confirm a restart actually took).
    pub fn is_actually_running(&self, worker: &WorkerKey) -> bool {
        match self.processes.lock().get_mut(worker) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub(crate) fn control_dir(&self) -> &Path {
        &self.control_dir
    }
}
