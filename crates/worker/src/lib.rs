// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lf-worker: the per-`(annotator, domain)` execution unit. Runs as its
//! own OS process; `Worker::run` is the single-threaded, synchronous
//! main loop a `lf-supervisor::WorkerManager` spawns via
//! `std::process::Command`.

mod layout;
mod mirror;

pub use layout::WorkerLayout;

use lf_core::{
    control, AnnotationRecord, Clock, Config, ConfigError, Credentials, HeartbeatStatus, WorkerEventType, WorkerKey,
    WorkerStatus,
};
use lf_corpus::{Corpus, CorpusError, Sample};
use lf_modelclient::{ModelClient, ModelError};
use lf_parser::ParseOutcome;
use lf_prompts::{PromptError, PromptStore, PromptTemplate};
use lf_ratelimit::{RateLimiter, RateLimiterConfig};
use lf_storage::{StateStore, StoreError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Heartbeat emission cadence.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Rate-limit acquire deadline.
pub const RATE_LIMIT_DEADLINE: Duration = Duration::from_secs(300);
/// Samples-per-minute recompute cadence.
pub const SPEED_UPDATE_INTERVAL: u64 = 10;
/// Sleep between pause-loop polls.
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("prompt error: {0}")]
    Prompt(#[from] PromptError),
    #[error("corpus error: {0}")]
    Corpus(#[from] CorpusError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("model client error: {0}")]
    Model(#[from] ModelError),
    #[error("failed to write annotations mirror: {0}")]
    Mirror(#[source] std::io::Error),
    #[error("failed to determine the worker's project root: {0}")]
    ProjectRoot(#[source] std::io::Error),
}

/// Outcome of a pause-loop wait.
enum PauseOutcome {
    Resumed,
    Stopped,
}

/// The per-pair worker. Generic over [`Clock`] so tests can drive it
/// with a [`lf_core::FakeClock`] instead of real wall-clock sleeps for
/// every timestamp the store records.
pub struct Worker<C: Clock> {
    key: WorkerKey,
    store: Arc<StateStore<C>>,
    clock: C,
    config: Arc<Config>,
    rate_limiter: RateLimiter<C>,
    credential_id: String,
    template: PromptTemplate,
    corpus: Corpus,
    control_dir: PathBuf,
    mirror_path: Option<PathBuf>,
    model_client: Box<dyn ModelClient>,
    pid: u32,
}

impl<C: Clock> Worker<C> {
    /// Loads global configuration, resolves the credential, loads the
    /// prompt template (overlay order), and opens the sample corpus
    /// fail-fast. Does not yet
    /// register with the store or emit a heartbeat — [`Worker::run`]
    /// does that as its first act, matching the state machine's
    /// `NotStarted → Running` transition.
    pub fn init(
        layout: &WorkerLayout,
        key: WorkerKey,
        store: Arc<StateStore<C>>,
        clock: C,
        model_client: Box<dyn ModelClient>,
    ) -> Result<Self, WorkerError> {
        let config = Arc::new(Config::load(&layout.config_path())?);
        let credentials = Credentials::load(&layout.credentials_path())?;
        let _ = credentials.resolve(key.annotator)?;

        let prompt_store = PromptStore::new(layout.prompts_root());
        let template = prompt_store.resolve(&key)?;

        let corpus = Corpus::load(layout.corpus_path())?;

        let rate_limiter = RateLimiter::new(Arc::clone(&store), clock.clone(), RateLimiterConfig::default());
        let credential_id = key.credential_id();
        let mirror_path = Some(layout.annotations_path(&key));

        Ok(Self {
            key,
            store,
            clock,
            config,
            rate_limiter,
            credential_id,
            template,
            corpus,
            control_dir: layout.control_dir(),
            mirror_path,
            model_client,
            pid: std::process::id(),
        })
    }

    /// Main loop. Returns `Ok(())` on any of the state machine's
    /// terminal transitions (`Stopped`, `Completed`, or a `rate_limit`/
    /// `invalid_credential` exit); never returns `Err` for outcomes
    /// that are ordinary worker termination rather than a bug.
    pub fn run(mut self) -> Result<(), WorkerError> {
        self.store.update_worker_status(&self.key, WorkerStatus::Running, Some(self.pid), WorkerEventType::Started)?;
        self.send_heartbeat(0, HeartbeatStatus::Running)?;

        let mut iteration: u64 = 0;
        let mut last_heartbeat = Instant::now();
        let mut last_control_check = Instant::now();
        let start_time = Instant::now();

        loop {
            iteration += 1;

            if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                self.send_heartbeat(iteration, HeartbeatStatus::Running)?;
                last_heartbeat = Instant::now();
            }

            if self.should_check_control(iteration, last_control_check) {
                last_control_check = Instant::now();
                if let Some(signal) = control::read_signal(&self.control_dir, &self.key).unwrap_or(None) {
                    match signal.command {
                        lf_core::ControlCommand::Pause => match self.handle_pause()? {
                            PauseOutcome::Resumed => continue,
                            PauseOutcome::Stopped => return self.shutdown(WorkerStatus::Stopped, WorkerEventType::Stopped),
                        },
                        lf_core::ControlCommand::Stop => return self.shutdown(WorkerStatus::Stopped, WorkerEventType::Stopped),
                        lf_core::ControlCommand::Resume => {}
                    }
                }
            }

            let processed = self.total_processed()?;
            if processed >= self.target_count()? {
                return self.shutdown(WorkerStatus::Completed, WorkerEventType::Completed);
            }
            let Some(sample) = self.corpus.get(processed as usize).cloned() else {
                tracing::info!(worker = %self.key, "corpus exhausted before target reached");
                return self.shutdown(WorkerStatus::Completed, WorkerEventType::Completed);
            };

            if !self.rate_limiter.acquire(&self.credential_id, RATE_LIMIT_DEADLINE)? {
                tracing::warn!(worker = %self.key, "rate limit deadline elapsed or daily quota exhausted");
                return self.shutdown(WorkerStatus::Paused, WorkerEventType::Paused);
            }

            match self.annotate(&sample) {
                AnnotateOutcome::Terminal(status, event) => return self.shutdown(status, event),
                AnnotateOutcome::Recorded => {}
            }

            if iteration % SPEED_UPDATE_INTERVAL == 0 {
                let elapsed_minutes = start_time.elapsed().as_secs_f64() / 60.0;
                if elapsed_minutes > 0.0 {
                    let processed = self.total_processed()?;
                    self.store.update_speed(&self.key, f64::from(processed) / elapsed_minutes)?;
                }
            }

            std::thread::sleep(Duration::from_secs_f64(self.config.global.request_delay_seconds));
        }
    }

    fn should_check_control(&self, iteration: u64, last_check: Instant) -> bool {
        let iter_due = iteration % u64::from(self.config.global.control_check_iterations) == 0;
        let time_due = last_check.elapsed() >= Duration::from_secs(u64::from(self.config.global.control_check_seconds));
        iter_due || time_due
    }

    /// Tight wait loop: emit a `paused` heartbeat every 5s, poll the
    /// control signal, exit on `resume` or `stop`.
    fn handle_pause(&mut self) -> Result<PauseOutcome, WorkerError> {
        self.store.update_worker_status(&self.key, WorkerStatus::Paused, Some(self.pid), WorkerEventType::Paused)?;
        loop {
            std::thread::sleep(PAUSE_POLL_INTERVAL);
            self.send_heartbeat(0, HeartbeatStatus::Paused)?;
            let Some(signal) = control::read_signal(&self.control_dir, &self.key).unwrap_or(None) else {
                continue;
            };
            match signal.command {
                lf_core::ControlCommand::Resume => {
                    self.store.update_worker_status(&self.key, WorkerStatus::Running, Some(self.pid), WorkerEventType::Resumed)?;
                    control::clear_signal(&self.control_dir, &self.key);
                    return Ok(PauseOutcome::Resumed);
                }
                lf_core::ControlCommand::Stop => return Ok(PauseOutcome::Stopped),
                lf_core::ControlCommand::Pause => {}
            }
        }
    }

    /// Renders the prompt, calls the model, classifies the result, and
    /// records it. The crash-consistency-ordered store writes happen in
    /// `record`.
    fn annotate(&self, sample: &Sample) -> AnnotateOutcome {
        let prompt = self.template.render(&sample.text);
        match self.model_client.generate(&prompt) {
            Err(ModelError::RateLimit) => {
                tracing::warn!(worker = %self.key, sample = %sample.id, "model rate limit signaled mid-run");
                AnnotateOutcome::Terminal(WorkerStatus::Paused, WorkerEventType::Paused)
            }
            Err(ModelError::InvalidCredential) => {
                tracing::error!(worker = %self.key, "model credential rejected, stopping");
                AnnotateOutcome::Terminal(WorkerStatus::Stopped, WorkerEventType::Stopped)
            }
            Err(ModelError::Other(msg)) => {
                if let Err(err) = self.record(sample, "", "MALFORMED".to_string(), true, None, Some(msg)) {
                    tracing::error!(worker = %self.key, error = %err, "failed to record model-error annotation");
                }
                AnnotateOutcome::Recorded
            }
            Ok(response_text) => {
                let outcome = lf_parser::parse(&response_text, self.key.domain.as_str());
                let (label, malformed, parse_error, validity_error) = match outcome {
                    ParseOutcome::Ok(label) => (label, false, None, None),
                    ParseOutcome::ParseError(msg) => ("MALFORMED".to_string(), true, Some(msg), None),
                    ParseOutcome::ValidityError(msg) => ("MALFORMED".to_string(), true, None, Some(msg)),
                };
                if let Err(err) = self.record(sample, &response_text, label, malformed, parse_error, validity_error) {
                    tracing::error!(worker = %self.key, error = %err, "failed to record annotation");
                }
                AnnotateOutcome::Recorded
            }
        }
    }

    /// Writes the Annotation row, then the optional JSONL mirror, then
    /// `add_completed_sample` — in that order, so a crash between the
    /// first and last write reappears as a re-selectable sample on
    /// restart.
    fn record(
        &self,
        sample: &Sample,
        response: &str,
        label: String,
        malformed: bool,
        parse_error: Option<String>,
        validity_error: Option<String>,
    ) -> Result<(), WorkerError> {
        let now = self.clock.now();
        let record = AnnotationRecord {
            sample_id: sample.id.clone(),
            sample_text: sample.text.clone(),
            label: label.clone(),
            response: response.to_string(),
            is_malformed: malformed,
            parse_error: parse_error.clone(),
            validity_error: validity_error.clone(),
            created_at: now,
        };
        self.store.save_annotation(&self.key, record)?;

        if let Some(path) = &self.mirror_path {
            mirror::append(
                path,
                &mirror::MirrorRow {
                    id: &sample.id,
                    text: &sample.text,
                    response,
                    label: &label,
                    malformed,
                    parsing_error: parse_error.as_deref(),
                    validity_error: validity_error.as_deref(),
                    timestamp: now,
                },
            )
            .map_err(WorkerError::Mirror)?;
        }

        self.store.add_completed_sample(&self.key, &sample.id, &label, malformed)?;
        if malformed {
            tracing::warn!(worker = %self.key, sample = %sample.id, "sample recorded malformed");
        } else {
            tracing::info!(worker = %self.key, sample = %sample.id, label = %label, "sample annotated");
        }
        Ok(())
    }

    fn target_count(&self) -> Result<u32, WorkerError> {
        Ok(self.config.domain_config(self.key.annotator, &self.key.domain)?.target_count)
    }

    /// Samples already accounted for, whether clean or malformed, since
    /// both occupy a corpus position.
    fn total_processed(&self) -> Result<u32, WorkerError> {
        Ok(self
            .store
            .get_worker_status(&self.key)?
            .map(|snapshot| snapshot.total_completed + snapshot.total_malformed)
            .unwrap_or(0))
    }

    fn send_heartbeat(&self, iteration: u64, status: HeartbeatStatus) -> Result<(), WorkerError> {
        Ok(self.store.send_heartbeat(&self.key, self.pid, iteration, status)?)
    }

    /// Clears the heartbeat row, persists the terminal status, clears
    /// any pending control signal.
    /// Terminal statuses (`stopped`/`completed`/`crashed`) always clear
    /// `pid` regardless of what's passed here. `paused` is the one
    /// process-exiting status that keeps it — a daily-cap-paused worker
    /// records the pid of the process that just exited so the watchdog's
    /// liveness check can tell it apart from a still-running pause.
    fn shutdown(&self, status: WorkerStatus, event: WorkerEventType) -> Result<(), WorkerError> {
        self.store.clear_heartbeat(&self.key)?;
        self.store.update_worker_status(&self.key, status, Some(self.pid), event)?;
        control::clear_signal(&self.control_dir, &self.key);
        tracing::info!(worker = %self.key, status = %status, "worker loop exited");
        Ok(())
    }
}

enum AnnotateOutcome {
    Recorded,
    Terminal(WorkerStatus, WorkerEventType),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lf_core::{AnnotatorId, DomainConfig, FakeClock, GlobalConfig};
    use lf_modelclient::FakeModelClient;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    fn layout(root: &std::path::Path) -> WorkerLayout {
        WorkerLayout::new(root.to_path_buf())
    }

    fn write_project(root: &std::path::Path, target_count: u32, corpus_rows: &str) {
        let config = Config {
            global: GlobalConfig {
                model_name: "gemini-pro".into(),
                request_delay_seconds: 0.1,
                max_retries: 3,
                crash_detection_minutes: 5.0,
                control_check_iterations: 1,
                control_check_seconds: 1,
            },
            annotators: {
                let mut domains = HashMap::new();
                domains.insert("urgency".to_string(), DomainConfig { enabled: true, target_count });
                let mut annotators = HashMap::new();
                annotators.insert(1u32, domains);
                annotators
            },
        };
        let l = layout(root);
        fs::create_dir_all(l.config_path().parent().unwrap()).unwrap();
        fs::write(l.config_path(), serde_json::to_string(&config).unwrap()).unwrap();
        fs::write(l.credentials_path(), serde_json::json!({ "annotator_1": "secret" }).to_string()).unwrap();
        fs::create_dir_all(l.prompts_root().join("base")).unwrap();
        fs::write(l.prompts_root().join("base").join("urgency.txt"), "classify: {text}").unwrap();
        fs::create_dir_all(l.corpus_path().parent().unwrap()).unwrap();
        fs::write(l.corpus_path(), corpus_rows).unwrap();
        fs::create_dir_all(l.control_dir()).unwrap();
    }

    fn key() -> WorkerKey {
        WorkerKey::new(AnnotatorId::new(1), "urgency")
    }

    fn worker(
        root: &std::path::Path,
        responses: Vec<Result<String, ModelError>>,
    ) -> (Worker<FakeClock>, Arc<StateStore<FakeClock>>) {
        let clock = FakeClock::new();
        let store = Arc::new(StateStore::open(root, clock.clone()).unwrap());
        let config = Config::load(&layout(root).config_path()).unwrap();
        store.initialize_workers(&config).unwrap();
        let worker = Worker::init(
            &layout(root),
            key(),
            Arc::clone(&store),
            clock,
            Box::new(FakeModelClient::new(responses)),
        )
        .unwrap();
        (worker, store)
    }

    #[test]
    fn runs_to_completion_on_happy_path() {
        let dir = tempdir().unwrap();
        write_project(dir.path(), 3, "ID,Text\ns1,t1\ns2,t2\ns3,t3\n");
        let (worker, store) = worker(
            dir.path(),
            vec![Ok("<<LEVEL_1>>".into()), Ok("<<LEVEL_2>>".into()), Ok("<<LEVEL_3>>".into())],
        );
        worker.run().unwrap();
        let snapshot = store.get_worker_status(&key()).unwrap().unwrap();
        assert_eq!(snapshot.status, WorkerStatus::Completed);
        assert_eq!(snapshot.total_completed, 3);
        assert_eq!(snapshot.total_malformed, 0);
    }

    #[test]
    fn malformed_sample_still_counts_toward_target() {
        let dir = tempdir().unwrap();
        write_project(dir.path(), 2, "ID,Text\ns1,t1\ns2,t2\n");
        let (worker, store) = worker(dir.path(), vec![Ok("<<LEVEL_1>>".into()), Ok("no tags here".into())]);
        worker.run().unwrap();
        let snapshot = store.get_worker_status(&key()).unwrap().unwrap();
        assert_eq!(snapshot.status, WorkerStatus::Completed);
        assert_eq!(snapshot.total_completed, 1);
        assert_eq!(snapshot.total_malformed, 1);
    }

    #[test]
    fn invalid_credential_stops_the_worker() {
        let dir = tempdir().unwrap();
        write_project(dir.path(), 5, "ID,Text\ns1,t1\n");
        let (worker, store) = worker(dir.path(), vec![Err(ModelError::InvalidCredential)]);
        worker.run().unwrap();
        let snapshot = store.get_worker_status(&key()).unwrap().unwrap();
        assert_eq!(snapshot.status, WorkerStatus::Stopped);
        assert_eq!(snapshot.total_completed, 0);
    }

    #[test]
    fn rate_limit_from_model_pauses_the_worker() {
        let dir = tempdir().unwrap();
        write_project(dir.path(), 5, "ID,Text\ns1,t1\n");
        let (worker, store) = worker(dir.path(), vec![Err(ModelError::RateLimit)]);
        worker.run().unwrap();
        let snapshot = store.get_worker_status(&key()).unwrap().unwrap();
        assert_eq!(snapshot.status, WorkerStatus::Paused);
        assert_eq!(snapshot.pid, Some(std::process::id()), "paused row must keep the exiting process's pid for the watchdog's liveness check");
    }

    #[test]
    fn stop_signal_is_observed_between_samples() {
        let dir = tempdir().unwrap();
        write_project(dir.path(), 5, "ID,Text\ns1,t1\ns2,t2\ns3,t3\n");
        let l = layout(dir.path());
        control::write_signal(&l.control_dir(), &key(), lf_core::ControlCommand::Stop, Utc::now()).unwrap();
        let (worker, store) = worker(dir.path(), vec![Ok("<<LEVEL_1>>".into()); 3]);
        worker.run().unwrap();
        let snapshot = store.get_worker_status(&key()).unwrap().unwrap();
        assert_eq!(snapshot.status, WorkerStatus::Stopped);
        assert_eq!(snapshot.total_completed, 0);
    }

    #[test]
    fn crash_recovery_reselects_the_same_sample_index() {
        let dir = tempdir().unwrap();
        write_project(dir.path(), 3, "ID,Text\ns1,t1\ns2,t2\ns3,t3\n");
        let clock = FakeClock::new();
        let store = Arc::new(StateStore::open(dir.path(), clock.clone()).unwrap());
        let config = Config::load(&layout(dir.path()).config_path()).unwrap();
        store.initialize_workers(&config).unwrap();
        store.save_annotation(
            &key(),
            AnnotationRecord {
                sample_id: "s1".into(),
                sample_text: "t1".into(),
                label: "LEVEL_1".into(),
                response: "<<LEVEL_1>>".into(),
                is_malformed: false,
                parse_error: None,
                validity_error: None,
                created_at: clock.now(),
            },
        )
        .unwrap();
        // Simulated crash: Annotation written, CompletedSample not yet.
        let worker = Worker::init(
            &layout(dir.path()),
            key(),
            Arc::clone(&store),
            clock,
            Box::new(FakeModelClient::new(vec![Ok("<<LEVEL_1>>".into()), Ok("<<LEVEL_2>>".into()), Ok("<<LEVEL_3>>".into())])),
        )
        .unwrap();
        worker.run().unwrap();
        let snapshot = store.get_worker_status(&key()).unwrap().unwrap();
        assert_eq!(snapshot.status, WorkerStatus::Completed);
        assert_eq!(snapshot.total_completed, 3, "re-annotating s1 must not block reaching target");
    }
}
