// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lf-prompts: prompt template loading and the base/override/version
//! overlay resolution order.
//!
//! On disk, under a root directory (conventionally `config/prompts/`):
//!
//! ```text
//! base/<domain>.txt
//! overrides/annotator_<i>/<domain>.txt
//! versions/annotator_<i>/<domain>/<filename>
//! active_versions.json    { "annotator_<i>.<domain>": "<filename>" }
//! ```
//!
//! Resolution for a given `(annotator, domain)` tries, in order: the
//! file named by `active_versions.json` under `versions/`, then the
//! legacy `overrides/` file, then `base/`. The first that exists on
//! disk wins.

use lf_core::{Domain, WorkerKey};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("no prompt template found for {0} (checked active version, override, and base)")]
    NotFound(WorkerKey),
    #[error("failed to read prompt template {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("active_versions.json at {path} is not valid JSON: {source}")]
    InvalidActiveVersions { path: PathBuf, #[source] source: serde_json::Error },
    #[error("prompt template for {worker} must contain exactly one {{text}} interpolation site, found {count}")]
    InterpolationCount { worker: WorkerKey, count: usize },
}

/// A loaded, validated prompt template: exactly one `{text}` site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: PathBuf,
    body: String,
}

impl PromptTemplate {
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Substitutes the sample's text into the template's `{text}` site.
    pub fn render(&self, sample_text: &str) -> String {
        self.body.replacen("{text}", sample_text, 1)
    }
}

/// Resolves prompt templates for a deployment's `config/prompts/` tree.
pub struct PromptStore {
    root: PathBuf,
}

impl PromptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves and validates the template for `worker`, per the
    /// active-version → override → base order.
    pub fn resolve(&self, worker: &WorkerKey) -> Result<PromptTemplate, PromptError> {
        let path = self.resolve_path(worker)?.ok_or_else(|| PromptError::NotFound(worker.clone()))?;
        let body = std::fs::read_to_string(&path).map_err(|source| PromptError::Io { path: path.clone(), source })?;
        let count = body.matches("{text}").count();
        if count != 1 {
            return Err(PromptError::InterpolationCount { worker: worker.clone(), count });
        }
        Ok(PromptTemplate { source: path, body })
    }

    fn resolve_path(&self, worker: &WorkerKey) -> Result<Option<PathBuf>, PromptError> {
        if let Some(path) = self.active_version_path(worker)? {
            return Ok(Some(path));
        }
        let override_path = self.override_path(worker);
        if override_path.is_file() {
            return Ok(Some(override_path));
        }
        let base_path = self.base_path(&worker.domain);
        if base_path.is_file() {
            return Ok(Some(base_path));
        }
        Ok(None)
    }

    fn base_path(&self, domain: &Domain) -> PathBuf {
        self.root.join("base").join(format!("{}.txt", domain.as_str()))
    }

    fn override_path(&self, worker: &WorkerKey) -> PathBuf {
        self.root
            .join("overrides")
            .join(format!("annotator_{}", worker.annotator.get()))
            .join(format!("{}.txt", worker.domain.as_str()))
    }

    fn active_version_path(&self, worker: &WorkerKey) -> Result<Option<PathBuf>, PromptError> {
        let manifest_path = self.root.join("active_versions.json");
        if !manifest_path.is_file() {
            return Ok(None);
        }
        let body = std::fs::read_to_string(&manifest_path)
            .map_err(|source| PromptError::Io { path: manifest_path.clone(), source })?;
        let active: HashMap<String, String> = serde_json::from_str(&body)
            .map_err(|source| PromptError::InvalidActiveVersions { path: manifest_path.clone(), source })?;
        let key = format!("annotator_{}.{}", worker.annotator.get(), worker.domain.as_str());
        let Some(filename) = active.get(&key) else {
            return Ok(None);
        };
        let versioned = self
            .root
            .join("versions")
            .join(format!("annotator_{}", worker.annotator.get()))
            .join(worker.domain.as_str())
            .join(filename);
        if versioned.is_file() {
            Ok(Some(versioned))
        } else {
            tracing::warn!(worker = %worker, file = %filename, "active_versions.json references a missing file, falling back");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lf_core::AnnotatorId;
    use std::fs;
    use tempfile::tempdir;

    fn worker() -> WorkerKey {
        WorkerKey::new(AnnotatorId::new(1), "urgency")
    }

    #[test]
    fn falls_back_to_base_when_nothing_else_exists() {
        let dir = tempdir().unwrap();
        let base_dir = dir.path().join("base");
        fs::create_dir_all(&base_dir).unwrap();
        fs::write(base_dir.join("urgency.txt"), "classify: {text}").unwrap();

        let store = PromptStore::new(dir.path());
        let template = store.resolve(&worker()).unwrap();
        assert_eq!(template.render("hello"), "classify: hello");
        assert_eq!(template.source(), base_dir.join("urgency.txt"));
    }

    #[test]
    fn override_wins_over_base() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("base")).unwrap();
        fs::write(dir.path().join("base").join("urgency.txt"), "base: {text}").unwrap();
        let override_dir = dir.path().join("overrides").join("annotator_1");
        fs::create_dir_all(&override_dir).unwrap();
        fs::write(override_dir.join("urgency.txt"), "override: {text}").unwrap();

        let store = PromptStore::new(dir.path());
        let template = store.resolve(&worker()).unwrap();
        assert_eq!(template.render("x"), "override: x");
    }

    #[test]
    fn active_version_wins_over_override_and_base() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("base")).unwrap();
        fs::write(dir.path().join("base").join("urgency.txt"), "base: {text}").unwrap();
        let override_dir = dir.path().join("overrides").join("annotator_1");
        fs::create_dir_all(&override_dir).unwrap();
        fs::write(override_dir.join("urgency.txt"), "override: {text}").unwrap();
        let version_dir = dir.path().join("versions").join("annotator_1").join("urgency");
        fs::create_dir_all(&version_dir).unwrap();
        fs::write(version_dir.join("v2_refined_20260101T000000.txt"), "v2: {text}").unwrap();
        fs::write(
            dir.path().join("active_versions.json"),
            serde_json::json!({ "annotator_1.urgency": "v2_refined_20260101T000000.txt" }).to_string(),
        )
        .unwrap();

        let store = PromptStore::new(dir.path());
        let template = store.resolve(&worker()).unwrap();
        assert_eq!(template.render("x"), "v2: x");
    }

    #[test]
    fn active_version_referencing_a_missing_file_falls_back() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("base")).unwrap();
        fs::write(dir.path().join("base").join("urgency.txt"), "base: {text}").unwrap();
        fs::write(
            dir.path().join("active_versions.json"),
            serde_json::json!({ "annotator_1.urgency": "does_not_exist.txt" }).to_string(),
        )
        .unwrap();

        let store = PromptStore::new(dir.path());
        let template = store.resolve(&worker()).unwrap();
        assert_eq!(template.render("x"), "base: x");
    }

    #[test]
    fn missing_everywhere_is_not_found() {
        let dir = tempdir().unwrap();
        let store = PromptStore::new(dir.path());
        assert!(matches!(store.resolve(&worker()), Err(PromptError::NotFound(_))));
    }

    #[test]
    fn rejects_templates_without_exactly_one_interpolation_site() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("base")).unwrap();
        fs::write(dir.path().join("base").join("urgency.txt"), "no placeholder here").unwrap();

        let store = PromptStore::new(dir.path());
        assert!(matches!(store.resolve(&worker()), Err(PromptError::InterpolationCount { count: 0, .. })));

        fs::write(dir.path().join("base").join("urgency.txt"), "{text} and {text} again").unwrap();
        assert!(matches!(store.resolve(&worker()), Err(PromptError::InterpolationCount { count: 2, .. })));
    }
}
