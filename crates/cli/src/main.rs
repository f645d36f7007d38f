// SPDX-License-Identifier: MIT

//! `lfctl`: the command-line client for `lfd`. Every subcommand sends
//! one request over the control socket and prints the response.

mod client;
mod color;
mod commands;
mod exit_error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use exit_error::ExitError;

use client::DaemonClient;
use commands::worker::WorkerArgs;

#[derive(Debug, Parser)]
#[command(name = "lfctl")]
struct Cli {
    /// Project root containing config/, data/, control/, and run/.
    /// Defaults to the current directory.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the daemon is reachable
    Ping,
    /// Manage a single worker
    Worker(WorkerArgs),
    /// Show status for every configured worker
    StatusAll,
    /// Start every enabled worker that isn't already running
    StartAll,
    /// Stop every running worker
    StopAll,
    /// Wipe all durable state. Destructive; requires --confirm FACTORY_RESET.
    FactoryReset {
        #[arg(long, default_value = "")]
        confirm: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(exit_error) = err.downcast_ref::<ExitError>() {
                eprintln!("{exit_error}");
                return ExitCode::from(exit_error.code as u8);
            }
            eprintln!("{}", color::bad(&err.to_string()));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let client = DaemonClient::new(&root);

    let result = match cli.command {
        Command::Ping => commands::admin::ping(&client).await,
        Command::Worker(args) => commands::worker::handle(args.command, &client).await,
        Command::StatusAll => commands::fleet::status_all(&client).await,
        Command::StartAll => commands::fleet::start_all(&client).await,
        Command::StopAll => commands::fleet::stop_all(&client).await,
        Command::FactoryReset { confirm } => commands::admin::factory_reset(&client, confirm).await,
    };

    result.map_err(|err| match err.downcast::<client::ClientError>() {
        Ok(client::ClientError::Connect { path, .. }) => {
            ExitError::new(2, format!("lfd is not running (no socket at {})", path.display())).into()
        }
        Ok(other) => other.into(),
        Err(err) => err,
    })
}
