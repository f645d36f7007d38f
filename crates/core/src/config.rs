// SPDX-License-Identifier: MIT

//! Global configuration, per-`(annotator, domain)` worker configuration,
//! and credential loading. Validation bounds are ported from the original
//! system's `config_validator.py` (a Pydantic model) into `Config::validate`.

use crate::error::ConfigError;
use crate::fsutil;
use crate::ids::{AnnotatorId, Domain};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Settings shared by every worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub model_name: String,
    pub request_delay_seconds: f64,
    pub max_retries: u32,
    pub crash_detection_minutes: f64,
    pub control_check_iterations: u32,
    pub control_check_seconds: u32,
}

/// Per-`(annotator, domain)` settings: whether the pair is active and how
/// many samples it should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub enabled: bool,
    pub target_count: u32,
}

/// The full `annotators.json`-shaped configuration tree: global settings
/// plus `annotators[annotator_id][domain] -> DomainConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub global: GlobalConfig,
    pub annotators: HashMap<u32, HashMap<String, DomainConfig>>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fsutil::atomic_read_text(path)
            .map_err(|e| ConfigError::Io { path: path.display().to_string(), source: to_io(e) })?
            .ok_or_else(|| ConfigError::Io {
                path: path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file missing"),
            })?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| ConfigError::Json { path: path.display().to_string(), source: e })?;
        config.validate()?;
        Ok(config)
    }

    /// Bounds ported verbatim from `config_validator.py`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.global;
        check_range("request_delay_seconds", g.request_delay_seconds, 0.1, 60.0)?;
        check_range("max_retries", g.max_retries as f64, 0.0, 10.0)?;
        check_range("crash_detection_minutes", g.crash_detection_minutes, 1.0, 60.0)?;
        check_range("control_check_iterations", g.control_check_iterations as f64, 1.0, 100.0)?;
        check_range("control_check_seconds", g.control_check_seconds as f64, 1.0, 300.0)?;
        if g.model_name.trim().is_empty() {
            return Err(ConfigError::Empty { field: "model_name" });
        }
        for domains in self.annotators.values() {
            for domain_config in domains.values() {
                check_range("target_count", domain_config.target_count as f64, 0.0, 100_000.0)?;
            }
        }
        Ok(())
    }

    /// Looks up the configuration for a single `(annotator, domain)` pair.
    pub fn domain_config(&self, annotator: AnnotatorId, domain: &Domain) -> Result<DomainConfig, ConfigError> {
        let domains = self
            .annotators
            .get(&annotator.get())
            .ok_or(ConfigError::MissingAnnotator(annotator.get()))?;
        domains
            .get(domain.as_str())
            .copied()
            .ok_or_else(|| ConfigError::MissingDomain { annotator: annotator.get(), domain: domain.as_str().to_string() })
    }

    /// Every `(annotator, domain)` pair this configuration names, in a
    /// stable order (annotator id ascending, then domain name ascending) so
    /// that worker startup order is deterministic across restarts.
    pub fn worker_keys(&self) -> Vec<(AnnotatorId, Domain)> {
        let mut keys: Vec<(AnnotatorId, Domain)> = self
            .annotators
            .iter()
            .flat_map(|(annotator, domains)| {
                domains.keys().map(move |domain| (AnnotatorId::new(*annotator), Domain::new(domain.clone())))
            })
            .collect();
        keys.sort();
        keys
    }
}

fn check_range(field: &'static str, actual: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if actual < min || actual > max {
        Err(ConfigError::OutOfRange { field, min, max, actual })
    } else {
        Ok(())
    }
}

fn to_io(e: fsutil::FsError) -> std::io::Error {
    match e {
        fsutil::FsError::Io { source, .. } => source,
    }
}

/// Per-annotator API credentials, loaded from a separate file so secrets
/// never sit alongside the rest of configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct Credentials {
    by_annotator: HashMap<String, String>,
}

impl Credentials {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fsutil::atomic_read_text(path)
            .map_err(|e| ConfigError::Io { path: path.display().to_string(), source: to_io(e) })?
            .ok_or_else(|| ConfigError::Io {
                path: path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "credentials file missing"),
            })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Json { path: path.display().to_string(), source: e })
    }

    /// Resolves the secret for `annotator_<id>`.
    pub fn resolve(&self, annotator: AnnotatorId) -> Result<&str, ConfigError> {
        self.by_annotator
            .get(&format!("annotator_{}", annotator.get()))
            .map(String::as_str)
            .ok_or(ConfigError::MissingCredential(annotator.get()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        let mut domains = HashMap::new();
        domains.insert("urgency".to_string(), DomainConfig { enabled: true, target_count: 10 });
        let mut annotators = HashMap::new();
        annotators.insert(1, domains);
        Config {
            global: GlobalConfig {
                model_name: "gemini-pro".to_string(),
                request_delay_seconds: 1.0,
                max_retries: 3,
                crash_detection_minutes: 5.0,
                control_check_iterations: 10,
                control_check_seconds: 5,
            },
            annotators,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn request_delay_out_of_range_rejected() {
        let mut config = sample_config();
        config.global.request_delay_seconds = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { field: "request_delay_seconds", .. })));
    }

    #[test]
    fn empty_model_name_rejected() {
        let mut config = sample_config();
        config.global.model_name = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Empty { field: "model_name" })));
    }

    #[test]
    fn target_count_above_bound_rejected() {
        let mut config = sample_config();
        config.annotators.get_mut(&1).unwrap().get_mut("urgency").unwrap().target_count = 200_000;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { field: "target_count", .. })));
    }

    #[test]
    fn worker_keys_are_sorted() {
        let mut domains_a = HashMap::new();
        domains_a.insert("urgency".to_string(), DomainConfig { enabled: true, target_count: 1 });
        domains_a.insert("intensity".to_string(), DomainConfig { enabled: true, target_count: 1 });
        let mut annotators = HashMap::new();
        annotators.insert(2, domains_a.clone());
        annotators.insert(1, domains_a);
        let config = Config {
            global: sample_config().global,
            annotators,
        };
        let keys = config.worker_keys();
        assert_eq!(keys[0].0, AnnotatorId::new(1));
        assert_eq!(keys[1].0, AnnotatorId::new(1));
        assert_eq!(keys[2].0, AnnotatorId::new(2));
    }

    #[test]
    fn missing_domain_reports_error() {
        let config = sample_config();
        let err = config.domain_config(AnnotatorId::new(1), &Domain::new("therapeutic")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDomain { annotator: 1, .. }));
    }
}
