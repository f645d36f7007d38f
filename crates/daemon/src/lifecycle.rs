// SPDX-License-Identifier: MIT

//! Daemon startup: acquire the single-instance lock, open the store,
//! bind the control socket, and hand back everything the listener and
//! watchdog tasks need, in that order (lock, then state, then socket
//! bind last).

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use lf_core::{Config, ConfigError, SystemClock};
use lf_storage::{StateStore, StoreError};
use lf_supervisor::{SupervisorError, Watchdog, WatchdogConfig, WorkerManager};
use lf_worker::WorkerLayout;
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::info;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("another lfd instance already holds the lock at {0}")]
    LockFailed(PathBuf),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
    #[error("failed to bind control socket at {path}: {source}")]
    BindFailed { path: PathBuf, #[source] source: std::io::Error },
}

pub struct DaemonOptions {
    pub root: PathBuf,
    pub worker_binary: PathBuf,
    pub max_concurrent_workers: usize,
}

/// Everything a running daemon needs to keep alive for its lifetime.
/// The lock file is held for as long as this struct lives; dropping it
/// releases the lock.
pub struct Daemon {
    pub store: Arc<StateStore<SystemClock>>,
    pub manager: Arc<WorkerManager<SystemClock>>,
    pub watchdog: Arc<Watchdog<SystemClock>>,
    pub listener: Arc<UnixListener>,
    pub socket_path: PathBuf,
    _lock_file: std::fs::File,
}

fn run_dir(root: &Path) -> PathBuf {
    root.join("run")
}

pub async fn startup(options: DaemonOptions) -> Result<Daemon, LifecycleError> {
    match startup_inner(options).await {
        Ok(daemon) => Ok(daemon),
        Err(err) => Err(err),
    }
}

async fn startup_inner(options: DaemonOptions) -> Result<Daemon, LifecycleError> {
    let layout = WorkerLayout::new(options.root.clone());
    let run_dir = run_dir(layout.root());
    std::fs::create_dir_all(&run_dir)?;

    let lock_path = run_dir.join("lfd.lock");
    let lock_file = OpenOptions::new().write(true).create(true).truncate(false).open(&lock_path)?;
    lock_file.try_lock_exclusive().map_err(|_| LifecycleError::LockFailed(lock_path.clone()))?;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    std::fs::create_dir_all(layout.control_dir())?;

    let config = Config::load(&layout.config_path())?;

    let store = Arc::new(StateStore::open(layout.root(), SystemClock)?);
    store.initialize_workers(&config)?;

    let socket_path = run_dir.join("lfd.sock");
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)
        .map_err(|source| LifecycleError::BindFailed { path: socket_path.clone(), source })?;

    let manager = Arc::new(WorkerManager::new(
        Arc::clone(&store),
        Arc::new(config),
        SystemClock,
        layout.control_dir(),
        options.worker_binary,
        layout.root().to_path_buf(),
        options.max_concurrent_workers,
    ));
    manager.reconcile_orphans()?;

    let watchdog = Arc::new(Watchdog::new(Arc::clone(&store), Arc::clone(&manager), WatchdogConfig::default()));

    info!(socket = %socket_path.display(), "daemon started");

    Ok(Daemon { store, manager, watchdog, listener: Arc::new(listener), socket_path, _lock_file: lock_file })
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}
