// SPDX-License-Identifier: MIT

//! `lf-worker`: spawned by `lf-supervisor::WorkerManager` as
//! `lf-worker <annotator_id> <domain>`, `current_dir` set to the project
//! root. Runs until it reaches a terminal state, then exits.

use clap::Parser;
use lf_core::{AnnotatorId, Credentials, SystemClock, WorkerKey};
use lf_modelclient::GeminiModelClient;
use lf_storage::StateStore;
use lf_worker::{Worker, WorkerLayout};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "lf-worker")]
struct Cli {
    /// Annotator credential id this worker annotates under.
    annotator: u32,
    /// Labeling domain this worker produces, e.g. `urgency`.
    domain: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let key = WorkerKey::new(AnnotatorId::new(cli.annotator), cli.domain);

    match run(key) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "worker exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn run(key: WorkerKey) -> Result<(), lf_worker::WorkerError> {
    let project_root = std::env::current_dir().map_err(lf_worker::WorkerError::ProjectRoot)?;
    let layout = WorkerLayout::new(project_root);

    let store = Arc::new(StateStore::open(layout.root(), SystemClock).map_err(|err| {
        tracing::error!(error = %err, "failed to open state store");
        err
    })?);

    let credentials = Credentials::load(&layout.credentials_path())?;
    let api_key = credentials.resolve(key.annotator)?;
    let mut client = GeminiModelClient::new(api_key)?;
    if let Ok(base_url) = std::env::var("LF_MODEL_BASE_URL") {
        client = client.with_base_url(base_url);
    }
    let model_client: Box<dyn lf_modelclient::ModelClient> = Box::new(client);

    let worker = Worker::init(&layout, key, store, SystemClock, model_client)?;
    worker.run()
}
