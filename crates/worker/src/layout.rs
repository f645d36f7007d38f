// SPDX-License-Identifier: MIT

//! On-disk path conventions for a worker's project root. Generalizes the
//! original `AnnotationWorker`'s hardcoded `config/`/`data/` layout into
//! named accessors so a worker and the supervisor that spawns it agree
//! on where everything lives without either hardcoding paths twice.

use lf_core::WorkerKey;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct WorkerLayout {
    root: PathBuf,
}

impl WorkerLayout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config").join("settings.json")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.root.join("config").join("api_keys.json")
    }

    pub fn prompts_root(&self) -> PathBuf {
        self.root.join("config").join("prompts")
    }

    pub fn control_dir(&self) -> PathBuf {
        self.root.join("control")
    }

    /// Corpus source: `data/corpus.csv`, falling back to `data/corpus.xlsx`
    /// when no CSV is present, matching `lf-corpus`'s extension dispatch.
    pub fn corpus_path(&self) -> PathBuf {
        let csv = self.root.join("data").join("corpus.csv");
        if csv.is_file() {
            return csv;
        }
        self.root.join("data").join("corpus.xlsx")
    }

    /// Append-only human-readable mirror of a worker's annotations:
    /// `data/annotations/annotator_<i>/<domain>/annotations.jsonl`.
    pub fn annotations_path(&self, worker: &WorkerKey) -> PathBuf {
        self.root
            .join("data")
            .join("annotations")
            .join(format!("annotator_{}", worker.annotator.get()))
            .join(worker.domain.as_str())
            .join("annotations.jsonl")
    }
}
