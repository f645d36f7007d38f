// SPDX-License-Identifier: MIT

//! `Watchdog`: periodic crash detection and bounded restart. Ported
//! from `worker_watchdog.py`'s `WorkerWatchdog`: an in-memory
//! restart-attempt counter and blacklist, neither persisted, so a fresh
//! supervisor process always starts with a clean slate.

use lf_core::{Clock, WorkerKey, WorkerStatus};
use lf_storage::StateStore;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::manager::{StartOutcome, SupervisorError, WorkerManager};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchdogConfig {
    /// Cadence between ticks (default 60s).
    pub tick_interval: Duration,
    /// Restart attempts allowed before blacklisting (default 3).
    pub max_attempts: u32,
    /// `stop_worker` timeout used during a restart.
    pub stop_timeout: Duration,
    /// Pause between stop and start during a restart (2s in the original).
    pub pre_restart_delay: Duration,
    /// Settle time before verifying a restart took (30s in the original).
    pub post_restart_settle: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            max_attempts: 3,
            stop_timeout: Duration::from_secs(10),
            pre_restart_delay: Duration::from_secs(2),
            post_restart_settle: Duration::from_secs(30),
        }
    }
}

/// Why a worker was flagged as a restart candidate on a given tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashReason {
    /// Heartbeat aged past the timeout while `status=running` — the
    /// store's derived-status rule already flipped it to `crashed`.
    StuckNoHeartbeat,
    /// `status=running` but the registered `pid` is no longer alive.
    ProcessDied,
    /// `status=paused` but the registered `pid` is no longer alive — the
    /// worker exited on a daily-quota pause rather than on an interactive
    /// one, where the process stays up polling the control signal.
    DailyCapPaused,
}

pub struct Watchdog<C: Clock> {
    store: Arc<StateStore<C>>,
    manager: Arc<WorkerManager<C>>,
    config: WatchdogConfig,
    restart_attempts: Mutex<HashMap<WorkerKey, u32>>,
    blacklist: Mutex<HashSet<WorkerKey>>,
}

impl<C: Clock> Watchdog<C> {
    pub fn new(store: Arc<StateStore<C>>, manager: Arc<WorkerManager<C>>, config: WatchdogConfig) -> Self {
        Self { store, manager, config, restart_attempts: Mutex::new(HashMap::new()), blacklist: Mutex::new(HashSet::new()) }
    }

    pub fn is_blacklisted(&self, worker: &WorkerKey) -> bool {
        self.blacklist.lock().contains(worker)
    }

    pub fn restart_attempts_for(&self, worker: &WorkerKey) -> u32 {
        *self.restart_attempts.lock().get(worker).unwrap_or(&0)
    }

    /// Runs ticks forever at `tick_interval`. Intended to be spawned as
    /// its own tokio task by the daemon.
    pub async fn run(self: Arc<Self>) {
        loop {
            if let Err(err) = self.tick().await {
                tracing::error!(error = %err, "watchdog tick failed");
            }
            tokio::time::sleep(self.config.tick_interval).await;
        }
    }

    /// One pass: reconcile orphans, find crashed/stuck workers, restart
    /// the eligible ones.
    pub async fn tick(&self) -> Result<(), SupervisorError> {
        let manager = Arc::clone(&self.manager);
        match tokio::task::spawn_blocking(move || manager.reconcile_orphans()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(err) => tracing::error!(error = %err, "reconcile_orphans task panicked"),
        }

        for (worker, reason) in self.scan_for_crashed()? {
            if self.eligible_for_restart(&worker) {
                self.restart_worker(worker, reason).await;
            } else {
                tracing::warn!(%worker, ?reason, "worker crashed but is not eligible for automatic restart");
            }
        }
        Ok(())
    }

    /// Per-key scan combining the heartbeat-based "stuck" check (done
    /// for free by `get_worker_status`'s derived-status rule) with an
    /// explicit process-liveness check for workers whose heartbeat is
    /// still fresh but whose PID has actually died, and for workers
    /// sitting in a daily-quota `paused` exit whose PID is also dead —
    /// the case a raw status match alone can't tell apart from an
    /// interactive pause, where the process is still up and polling.
    fn scan_for_crashed(&self) -> Result<Vec<(WorkerKey, CrashReason)>, SupervisorError> {
        let mut found = Vec::new();
        for (annotator, domain) in self.manager.config().worker_keys() {
            let key = WorkerKey::new(annotator, domain);
            let Some(snapshot) = self.store.get_worker_status(&key)? else { continue };
            match snapshot.status {
                WorkerStatus::Crashed => found.push((key, CrashReason::StuckNoHeartbeat)),
                WorkerStatus::Running => {
                    if let Some(pid) = snapshot.pid {
                        if !lf_core::is_worker_alive(pid, &key) {
                            self.store.update_worker_status(&key, WorkerStatus::Crashed, None, lf_core::WorkerEventType::Crashed)?;
                            found.push((key, CrashReason::ProcessDied));
                        }
                    }
                }
                WorkerStatus::Paused => {
                    if let Some(pid) = snapshot.pid {
                        if !lf_core::is_worker_alive(pid, &key) {
                            found.push((key, CrashReason::DailyCapPaused));
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(found)
    }

    fn eligible_for_restart(&self, worker: &WorkerKey) -> bool {
        if self.is_blacklisted(worker) {
            return false;
        }
        let enabled = self
            .manager
            .config()
            .domain_config(worker.annotator, &worker.domain)
            .map(|domain_config| domain_config.enabled)
            .unwrap_or(false);
        if !enabled {
            return false;
        }
        self.restart_attempts_for(worker) < self.config.max_attempts
    }

    /// Bounded-retry restart sequence ported from `_restart_worker`:
    /// stop → clear heartbeat → brief pause → start → settle → verify.
    async fn restart_worker(&self, worker: WorkerKey, reason: CrashReason) {
        tracing::warn!(%worker, ?reason, "attempting to restart crashed worker");
        let attempts = {
            let mut attempts = self.restart_attempts.lock();
            let count = attempts.entry(worker.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let manager = Arc::clone(&self.manager);
        let stop_timeout = self.config.stop_timeout;
        let stop_worker = worker.clone();
        let _ = tokio::task::spawn_blocking(move || manager.stop_worker(stop_worker.annotator, &stop_worker.domain, stop_timeout)).await;

        tokio::time::sleep(self.config.pre_restart_delay).await;

        let manager = Arc::clone(&self.manager);
        let start_worker_key = worker.clone();
        let start_outcome = tokio::task::spawn_blocking(move || manager.start_worker(start_worker_key.annotator, &start_worker_key.domain))
            .await
            .ok()
            .and_then(|result| result.ok());

        let restarted = matches!(start_outcome, Some(StartOutcome::Started { .. }));
        if !restarted {
            tracing::error!(%worker, "restart attempt failed to spawn worker process");
            self.maybe_blacklist(&worker, attempts);
            return;
        }

        tokio::time::sleep(self.config.post_restart_settle).await;

        let manager = Arc::clone(&self.manager);
        let verify_key = worker.clone();
        let still_running = tokio::task::spawn_blocking(move || manager.is_actually_running(&verify_key)).await.unwrap_or(false);

        if still_running {
            self.restart_attempts.lock().insert(worker.clone(), 0);
            tracing::info!(%worker, "worker restarted successfully");
        } else {
            tracing::error!(%worker, "worker died again shortly after restart");
            self.maybe_blacklist(&worker, attempts);
        }
    }

    fn maybe_blacklist(&self, worker: &WorkerKey, attempts: u32) {
        if attempts >= self.config.max_attempts {
            self.blacklist.lock().insert(worker.clone());
            tracing::error!(%worker, attempts, "worker exceeded maximum restart attempts, blacklisting");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lf_core::{AnnotatorId, Domain, DomainConfig, FakeClock, GlobalConfig, WorkerEventType};
    use std::collections::HashMap as Map;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn config() -> Arc<lf_core::Config> {
        let mut domains = Map::new();
        domains.insert("urgency".to_string(), DomainConfig { enabled: true, target_count: 5 });
        let mut annotators = Map::new();
        annotators.insert(1u32, domains);
        Arc::new(lf_core::Config {
            global: GlobalConfig {
                model_name: "gemini-pro".into(),
                request_delay_seconds: 1.0,
                max_retries: 3,
                crash_detection_minutes: 5.0,
                control_check_iterations: 10,
                control_check_seconds: 5,
            },
            annotators,
        })
    }

    fn setup() -> (tempfile::TempDir, Arc<StateStore<FakeClock>>, Arc<WorkerManager<FakeClock>>) {
        let dir = tempdir().unwrap();
        let store = Arc::new(StateStore::open(dir.path(), FakeClock::new()).unwrap());
        store.initialize_workers(&config()).unwrap();
        let control_dir = dir.path().join("control");
        std::fs::create_dir_all(&control_dir).unwrap();
        let manager = Arc::new(WorkerManager::new(
            Arc::clone(&store),
            config(),
            FakeClock::new(),
            control_dir,
            PathBuf::from("/bin/sleep"),
            dir.path().to_path_buf(),
            4,
        ));
        (dir, store, manager)
    }

    fn worker() -> WorkerKey {
        WorkerKey::new(AnnotatorId::new(1), Domain::new("urgency"))
    }

    #[tokio::test]
    async fn scan_finds_heartbeat_stale_worker_as_crashed() {
        let (_dir, store, manager) = setup();
        store.update_worker_status(&worker(), WorkerStatus::Running, Some(123), WorkerEventType::Started).unwrap();
        let watchdog = Watchdog::new(store, manager, WatchdogConfig::default());
        let found = watchdog.scan_for_crashed().unwrap();
        assert_eq!(found, vec![(worker(), CrashReason::StuckNoHeartbeat)]);
    }

    #[tokio::test]
    async fn running_worker_with_fresh_heartbeat_is_not_flagged() {
        let (_dir, store, manager) = setup();
        store.update_worker_status(&worker(), WorkerStatus::Running, Some(std::process::id()), WorkerEventType::Started).unwrap();
        store.send_heartbeat(&worker(), std::process::id(), 1, lf_core::HeartbeatStatus::Running).unwrap();
        let watchdog = Watchdog::new(store, manager, WatchdogConfig::default());
        assert!(watchdog.scan_for_crashed().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabled_worker_is_never_restart_eligible() {
        let (_dir, store, manager) = setup();
        let watchdog = Watchdog::new(store, manager, WatchdogConfig::default());
        let disabled = WorkerKey::new(AnnotatorId::new(9), Domain::new("nonexistent"));
        assert!(!watchdog.eligible_for_restart(&disabled));
    }

    #[tokio::test]
    async fn exhausting_restart_attempts_blacklists_the_worker() {
        let (_dir, store, manager) = setup();
        let config = WatchdogConfig { max_attempts: 1, pre_restart_delay: Duration::from_millis(1), ..WatchdogConfig::default() };
        let watchdog = Watchdog::new(store, manager, config);
        watchdog.maybe_blacklist(&worker(), 1);
        assert!(watchdog.is_blacklisted(&worker()));
    }

    #[tokio::test]
    async fn scan_finds_daily_cap_paused_worker_with_dead_pid() {
        let (_dir, store, manager) = setup();
        store.update_worker_status(&worker(), WorkerStatus::Paused, Some(999_999), WorkerEventType::Paused).unwrap();
        let watchdog = Watchdog::new(store, manager, WatchdogConfig::default());
        let found = watchdog.scan_for_crashed().unwrap();
        assert_eq!(found, vec![(worker(), CrashReason::DailyCapPaused)]);
    }

    #[tokio::test]
    async fn interactively_paused_worker_with_live_pid_is_not_flagged() {
        let (_dir, store, manager) = setup();
        store.update_worker_status(&worker(), WorkerStatus::Paused, Some(std::process::id()), WorkerEventType::Paused).unwrap();
        let watchdog = Watchdog::new(store, manager, WatchdogConfig::default());
        assert!(watchdog.scan_for_crashed().unwrap().is_empty());
    }

    /// Drives the full resume path end to end: a worker that exited on a
    /// daily-cap pause (status=paused, dead pid) is detected, restarted
    /// via `/bin/sleep`, and ends up `running` again with a fresh pid.
    #[tokio::test]
    async fn daily_cap_paused_worker_is_restarted_back_to_running() {
        let (_dir, store, manager) = setup();
        store.update_worker_status(&worker(), WorkerStatus::Paused, Some(999_999), WorkerEventType::Paused).unwrap();
        let config = WatchdogConfig {
            pre_restart_delay: Duration::from_millis(1),
            post_restart_settle: Duration::from_millis(1),
            ..WatchdogConfig::default()
        };
        let watchdog = Watchdog::new(Arc::clone(&store), Arc::clone(&manager), config);

        let found = watchdog.scan_for_crashed().unwrap();
        assert_eq!(found, vec![(worker(), CrashReason::DailyCapPaused)]);
        assert!(watchdog.eligible_for_restart(&worker()));

        watchdog.restart_worker(worker(), CrashReason::DailyCapPaused).await;

        let snapshot = store.get_worker_status(&worker()).unwrap().unwrap();
        assert_eq!(snapshot.status, WorkerStatus::Running);
        assert_ne!(snapshot.pid, Some(999_999));
        manager.stop_worker(worker().annotator, &worker().domain, Duration::from_secs(2)).unwrap();
    }
}
