// SPDX-License-Identifier: MIT

//! Error taxonomy shared by configuration loading and file utilities.
//! Component-specific errors (store, model client, parser, supervisor,
//! worker) live in their owning crates and wrap these where relevant.

use thiserror::Error;

/// `config_error` kind: missing or invalid configuration, credentials,
/// or prompts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },

    #[error("invalid JSON in {path}: {source}")]
    Json { path: String, #[source] source: serde_json::Error },

    #[error("{field} must be in range {min}..={max}, got {actual}")]
    OutOfRange { field: &'static str, min: f64, max: f64, actual: f64 },

    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    #[error("missing annotator config for annotator_{0}")]
    MissingAnnotator(u32),

    #[error("missing domain config for {annotator}/{domain}")]
    MissingDomain { annotator: u32, domain: String },

    #[error("missing credential for annotator_{0}")]
    MissingCredential(u32),
}
