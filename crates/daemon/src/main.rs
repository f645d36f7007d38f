// SPDX-License-Identifier: MIT

//! `lfd`: the labelforge daemon. Owns the state store and the control
//! socket, supervises the worker fleet through `lf-supervisor`, and
//! serves `lfctl` requests over `lf-ipc`'s wire protocol.

mod lifecycle;
mod listener;

use clap::Parser;
use lifecycle::DaemonOptions;
use listener::{ListenCtx, Listener};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "lfd")]
struct Cli {
    /// Project root containing config/, data/, and control/. Defaults to
    /// the current directory.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Path (or bare name resolved via `PATH`) to the `lf-worker` binary.
    #[arg(long, default_value = "lf-worker")]
    worker_binary: PathBuf,

    /// Maximum number of worker processes running at once.
    #[arg(long, default_value_t = 10)]
    max_concurrent_workers: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "failed to start tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "daemon exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), lifecycle::LifecycleError> {
    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };

    let daemon = lifecycle::startup(DaemonOptions {
        root,
        worker_binary: cli.worker_binary,
        max_concurrent_workers: cli.max_concurrent_workers,
    })
    .await?;

    let ctx = Arc::new(ListenCtx { store: Arc::clone(&daemon.store), manager: Arc::clone(&daemon.manager) });
    let listener = Listener::new(Arc::clone(&daemon.listener), ctx);
    let watchdog = Arc::clone(&daemon.watchdog);

    tokio::select! {
        () = listener.run() => {}
        () = watchdog.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }

    Ok(())
}
