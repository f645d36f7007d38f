// SPDX-License-Identifier: MIT

//! Accepts connections on the control socket and dispatches each
//! request/response pair. One spawned task per connection, one request
//! read followed by one response write, no persistent per-client state.

use std::sync::Arc;
use std::time::Duration;

use lf_core::{AnnotatorId, Domain, SystemClock};
use lf_ipc::{Request, Response, StartAllSummary as WireStartAllSummary, WorkerStatusView, FACTORY_RESET_CONFIRMATION};
use lf_storage::StateStore;
use lf_supervisor::{StartOutcome, StopOutcome, WorkerManager};
use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] lf_ipc::ProtocolError),
}

pub struct ListenCtx {
    pub store: Arc<StateStore<SystemClock>>,
    pub manager: Arc<WorkerManager<SystemClock>>,
}

pub struct Listener {
    socket: Arc<UnixListener>,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub fn new(socket: Arc<UnixListener>, ctx: Arc<ListenCtx>) -> Self {
        Self { socket, ctx }
    }

    pub async fn run(self) {
        loop {
            match self.socket.accept().await {
                Ok((stream, _addr)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, &ctx).await {
                            debug!(error = %err, "connection ended with an error");
                        }
                    });
                }
                Err(err) => error!(error = %err, "accept error on control socket"),
            }
        }
    }
}

async fn handle_connection(mut stream: UnixStream, ctx: &ListenCtx) -> Result<(), ConnectionError> {
    let request: Request = lf_ipc::read_message(&mut stream).await?;
    info!(request = ?request, "received control request");
    let response = handle_request(request, ctx).await;
    lf_ipc::write_message(&mut stream, &response).await?;
    Ok(())
}

async fn handle_request(request: Request, ctx: &ListenCtx) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::WorkerStart { annotator, domain } => {
            let manager = Arc::clone(&ctx.manager);
            let key = (AnnotatorId::new(annotator), Domain::new(domain));
            let outcome = tokio::task::spawn_blocking(move || manager.start_worker(key.0, &key.1)).await;
            match outcome {
                Ok(Ok(outcome)) => start_outcome_to_response(outcome),
                Ok(Err(err)) => error_response(err),
                Err(err) => error_response_join(err),
            }
        }

        Request::WorkerStop { annotator, domain } => {
            let manager = Arc::clone(&ctx.manager);
            let key = (AnnotatorId::new(annotator), Domain::new(domain));
            let outcome = tokio::task::spawn_blocking(move || manager.stop_worker(key.0, &key.1, STOP_TIMEOUT)).await;
            match outcome {
                Ok(Ok(outcome)) => stop_outcome_to_response(outcome),
                Ok(Err(err)) => error_response(err),
                Err(err) => error_response_join(err),
            }
        }

        Request::WorkerPause { annotator, domain } => {
            let manager = Arc::clone(&ctx.manager);
            let key = (AnnotatorId::new(annotator), Domain::new(domain));
            let result = tokio::task::spawn_blocking(move || manager.pause_worker(key.0, &key.1)).await;
            match result {
                Ok(Ok(())) => Response::Ok,
                Ok(Err(err)) => error_response(err),
                Err(err) => error_response_join(err),
            }
        }

        Request::WorkerResume { annotator, domain } => {
            let manager = Arc::clone(&ctx.manager);
            let key = (AnnotatorId::new(annotator), Domain::new(domain));
            let result = tokio::task::spawn_blocking(move || manager.resume_worker(key.0, &key.1)).await;
            match result {
                Ok(Ok(())) => Response::Ok,
                Ok(Err(err)) => error_response(err),
                Err(err) => error_response_join(err),
            }
        }

        Request::WorkerRestart { annotator, domain } => {
            let manager = Arc::clone(&ctx.manager);
            let key = (AnnotatorId::new(annotator), Domain::new(domain));
            let result = tokio::task::spawn_blocking(move || {
                let _ = manager.stop_worker(key.0, &key.1, STOP_TIMEOUT);
                manager.start_worker(key.0, &key.1)
            })
            .await;
            match result {
                Ok(Ok(outcome)) => start_outcome_to_response(outcome),
                Ok(Err(err)) => error_response(err),
                Err(err) => error_response_join(err),
            }
        }

        Request::WorkerStatus { annotator, domain } => {
            let manager = Arc::clone(&ctx.manager);
            let annotator_id = AnnotatorId::new(annotator);
            let domain_value = Domain::new(domain.clone());
            let result = tokio::task::spawn_blocking(move || manager.get_worker_status(annotator_id, &domain_value)).await;
            match result {
                Ok(Ok(Some(snapshot))) => Response::WorkerStatus(WorkerStatusView { annotator, domain, snapshot }),
                Ok(Ok(None)) => Response::WorkerNotRunning,
                Ok(Err(err)) => error_response(err),
                Err(err) => error_response_join(err),
            }
        }

        Request::StatusAll => {
            let manager = Arc::clone(&ctx.manager);
            let result = tokio::task::spawn_blocking(move || manager.get_all_statuses()).await;
            match result {
                Ok(Ok(statuses)) => Response::Workers(
                    statuses
                        .into_iter()
                        .map(|(key, snapshot)| WorkerStatusView {
                            annotator: key.annotator.get(),
                            domain: key.domain.as_str().to_string(),
                            snapshot,
                        })
                        .collect(),
                ),
                Ok(Err(err)) => error_response(err),
                Err(err) => error_response_join(err),
            }
        }

        Request::StartAll => {
            let manager = Arc::clone(&ctx.manager);
            let result = tokio::task::spawn_blocking(move || manager.start_all_enabled()).await;
            match result {
                Ok(Ok(summary)) => Response::StartAllSummary(WireStartAllSummary {
                    started: summary.started,
                    already_running: summary.already_running,
                    concurrency_limited: summary.concurrency_limited,
                    failed: summary.failed,
                    disabled: summary.disabled,
                }),
                Ok(Err(err)) => error_response(err),
                Err(err) => error_response_join(err),
            }
        }

        Request::StopAll => {
            let manager = Arc::clone(&ctx.manager);
            let result = tokio::task::spawn_blocking(move || manager.stop_all_workers(STOP_TIMEOUT)).await;
            match result {
                Ok(Ok(count)) => Response::AllStopped { count },
                Ok(Err(err)) => error_response(err),
                Err(err) => error_response_join(err),
            }
        }

        Request::FactoryReset { confirm } => {
            if confirm != FACTORY_RESET_CONFIRMATION {
                return Response::Error { message: "factory reset requires the exact confirmation string".to_string() };
            }
            let manager = Arc::clone(&ctx.manager);
            let store = Arc::clone(&ctx.store);
            let result = tokio::task::spawn_blocking(move || {
                manager.stop_all_workers(STOP_TIMEOUT)?;
                store.factory_reset().map_err(lf_supervisor::SupervisorError::from)
            })
            .await;
            match result {
                Ok(Ok(())) => Response::FactoryResetDone,
                Ok(Err(err)) => error_response(err),
                Err(err) => error_response_join(err),
            }
        }
    }
}

fn start_outcome_to_response(outcome: StartOutcome) -> Response {
    match outcome {
        StartOutcome::Started { pid } => Response::WorkerStarted { pid },
        StartOutcome::AlreadyRunning { pid } => Response::WorkerAlreadyRunning { pid: pid.unwrap_or(0) },
        StartOutcome::ConcurrencyLimitReached => Response::Error { message: "concurrency limit reached".to_string() },
        StartOutcome::Disabled => Response::Error { message: "worker is disabled in configuration".to_string() },
        StartOutcome::SpawnFailed(err) => Response::Error { message: format!("failed to spawn worker: {err}") },
    }
}

fn stop_outcome_to_response(outcome: StopOutcome) -> Response {
    match outcome {
        StopOutcome::Stopped { pid, forced, exit_code } => Response::WorkerStopped { pid: pid.unwrap_or(0), forced, exit_code },
        StopOutcome::NotRunning => Response::WorkerNotRunning,
    }
}

fn error_response(err: lf_supervisor::SupervisorError) -> Response {
    Response::Error { message: err.to_string() }
}

fn error_response_join(err: tokio::task::JoinError) -> Response {
    Response::Error { message: format!("internal task failure: {err}") }
}
