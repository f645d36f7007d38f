// SPDX-License-Identifier: MIT

//! Worker identity: an `(annotator, domain)` pair.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for one of the `A` configured annotator credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AnnotatorId(pub u32);

impl AnnotatorId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for AnnotatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for one of the `D` labeling domains (e.g. `urgency`).
///
/// Domains are configuration-driven, not a closed Rust enum, so that
/// deployments can add a domain without a recompile of the core crates —
/// only the parser registry (`lf-parser`) needs a matching grammar.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Domain(pub String);

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Domain {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Domain {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identity of a single worker: `(annotator_id, domain)`.
///
/// This is the key every Worker, CompletedSample, Annotation, Heartbeat,
/// and WorkerEvent row is scoped under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerKey {
    pub annotator: AnnotatorId,
    pub domain: Domain,
}

impl WorkerKey {
    pub fn new(annotator: AnnotatorId, domain: impl Into<Domain>) -> Self {
        Self { annotator, domain: domain.into() }
    }

    /// Scoped name used for control-signal files and process arguments:
    /// `annotator_<a>_<domain>`.
    pub fn scoped_name(&self) -> String {
        format!("annotator_{}_{}", self.annotator.0, self.domain.0)
    }

    /// Credential id this worker's model calls are billed/rate-limited
    /// under: `annotator_<a>`.
    pub fn credential_id(&self) -> String {
        format!("annotator_{}", self.annotator.0)
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.annotator, self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_name_matches_control_file_convention() {
        let key = WorkerKey::new(AnnotatorId::new(3), "urgency");
        assert_eq!(key.scoped_name(), "annotator_3_urgency");
        assert_eq!(key.credential_id(), "annotator_3");
    }

    #[test]
    fn display_is_human_readable() {
        let key = WorkerKey::new(AnnotatorId::new(1), "therapeutic");
        assert_eq!(key.to_string(), "1/therapeutic");
    }
}
