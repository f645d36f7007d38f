// SPDX-License-Identifier: MIT

//! Fleet-wide commands: status across every configured worker, and
//! bulk start/stop.

use anyhow::Result;

use crate::client::DaemonClient;
use crate::color;
use crate::commands::worker::print_status_row;
use lf_ipc::{Request, Response};

pub async fn status_all(client: &DaemonClient) -> Result<()> {
    match client.send(&Request::StatusAll).await? {
        Response::Workers(workers) => {
            if workers.is_empty() {
                println!("no workers registered");
            }
            for view in &workers {
                print_status_row(view);
            }
        }
        other => anyhow::bail!("unexpected response: {other:?}"),
    }
    Ok(())
}

pub async fn start_all(client: &DaemonClient) -> Result<()> {
    match client.send(&Request::StartAll).await? {
        Response::StartAllSummary(summary) => {
            println!(
                "started={} already_running={} disabled={} concurrency_limited={} failed={}",
                color::header(&summary.started.to_string()),
                summary.already_running,
                summary.disabled,
                summary.concurrency_limited,
                summary.failed,
            );
        }
        other => anyhow::bail!("unexpected response: {other:?}"),
    }
    Ok(())
}

pub async fn stop_all(client: &DaemonClient) -> Result<()> {
    match client.send(&Request::StopAll).await? {
        Response::AllStopped { count } => println!("stopped {} worker(s)", color::header(&count.to_string())),
        other => anyhow::bail!("unexpected response: {other:?}"),
    }
    Ok(())
}
