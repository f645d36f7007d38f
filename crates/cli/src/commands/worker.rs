// SPDX-License-Identifier: MIT

//! `lfctl worker ...` command handlers.

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::client::DaemonClient;
use crate::color;
use lf_ipc::{Request, Response};

#[derive(Args)]
pub struct WorkerArgs {
    #[command(subcommand)]
    pub command: WorkerCommand,
}

#[derive(Subcommand)]
pub enum WorkerCommand {
    /// Spawn a worker process for (annotator, domain)
    Start { annotator: u32, domain: String },
    /// Signal a worker to stop and wait for it to exit
    Stop { annotator: u32, domain: String },
    /// Signal a worker to pause between samples
    Pause { annotator: u32, domain: String },
    /// Signal a paused worker to resume
    Resume { annotator: u32, domain: String },
    /// Stop then start a worker
    Restart { annotator: u32, domain: String },
    /// Show one worker's status
    Status { annotator: u32, domain: String },
}

pub async fn handle(command: WorkerCommand, client: &DaemonClient) -> Result<()> {
    match command {
        WorkerCommand::Start { annotator, domain } => {
            match client.send(&Request::WorkerStart { annotator, domain: domain.clone() }).await? {
                Response::WorkerStarted { pid } => {
                    println!("worker {} started ({})", color::header(&worker_label(annotator, &domain)), color::muted(&format!("pid {pid}")));
                }
                Response::WorkerAlreadyRunning { pid } => {
                    println!("worker {} already running ({})", color::header(&worker_label(annotator, &domain)), color::muted(&format!("pid {pid}")));
                }
                other => anyhow::bail!("unexpected response: {other:?}"),
            }
        }
        WorkerCommand::Stop { annotator, domain } => {
            match client.send(&Request::WorkerStop { annotator, domain: domain.clone() }).await? {
                Response::WorkerStopped { pid, forced, exit_code } => {
                    let how = if forced { "force-killed" } else { "stopped" };
                    let detail = match exit_code {
                        Some(code) => format!("pid {pid}, exit code {code}"),
                        None => format!("pid {pid}"),
                    };
                    println!("worker {} {how} ({})", color::header(&worker_label(annotator, &domain)), color::muted(&detail));
                }
                Response::WorkerNotRunning => println!("worker {} was not running", color::header(&worker_label(annotator, &domain))),
                other => anyhow::bail!("unexpected response: {other:?}"),
            }
        }
        WorkerCommand::Pause { annotator, domain } => {
            client.send(&Request::WorkerPause { annotator, domain: domain.clone() }).await?;
            println!("worker {} signalled to pause", color::header(&worker_label(annotator, &domain)));
        }
        WorkerCommand::Resume { annotator, domain } => {
            client.send(&Request::WorkerResume { annotator, domain: domain.clone() }).await?;
            println!("worker {} signalled to resume", color::header(&worker_label(annotator, &domain)));
        }
        WorkerCommand::Restart { annotator, domain } => {
            match client.send(&Request::WorkerRestart { annotator, domain: domain.clone() }).await? {
                Response::WorkerStarted { pid } => {
                    println!("worker {} restarted ({})", color::header(&worker_label(annotator, &domain)), color::muted(&format!("pid {pid}")));
                }
                other => anyhow::bail!("unexpected response: {other:?}"),
            }
        }
        WorkerCommand::Status { annotator, domain } => {
            match client.send(&Request::WorkerStatus { annotator, domain: domain.clone() }).await? {
                Response::WorkerStatus(view) => print_status_row(&view),
                Response::WorkerNotRunning => println!("worker {} is not registered", color::header(&worker_label(annotator, &domain))),
                other => anyhow::bail!("unexpected response: {other:?}"),
            }
        }
    }
    Ok(())
}

pub fn print_status_row(view: &lf_ipc::WorkerStatusView) {
    let s = &view.snapshot;
    println!(
        "{:<24} {:<10} {:>8}/{:<8} {:>6.1}% {}",
        worker_label(view.annotator, &view.domain),
        s.status.as_str(),
        s.total_completed + s.total_malformed,
        s.target_count,
        s.progress_percent(),
        color::muted(&format!("pid={:?}", s.pid)),
    );
}

fn worker_label(annotator: u32, domain: &str) -> String {
    format!("annotator_{annotator}/{domain}")
}
