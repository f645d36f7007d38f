// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lf-modelclient: the generative-model adapter — the
//! `generate(prompt) -> Result<String, ModelError>` capability a worker
//! calls once per sample, implemented over HTTP against a
//! Gemini-shaped `generateContent` endpoint, plus a `FakeModelClient`
//! for tests that never touch the network.

use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

/// Error taxonomy from the original `GeminiAnnotator.generate`: rate
/// limiting and bad credentials are distinguished because the worker
/// reacts to them differently — rate limit pauses and retries, an
/// invalid credential is a permanent worker-level failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("model rate limit hit")]
    RateLimit,
    #[error("model credential is invalid or lacks permission")]
    InvalidCredential,
    #[error("model error: {0}")]
    Other(String),
}

/// The capability a worker depends on. Implemented by `GeminiModelClient`
/// against the real API and by `FakeModelClient` in tests.
pub trait ModelClient {
    fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}

/// Classifies an error string the same way the original does: substring
/// matches on the lowercased text, rate limit checked before credential
/// errors.
fn classify_error(message: &str) -> ModelError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("quota") || lower.contains("rate limit") {
        return ModelError::RateLimit;
    }
    if lower.contains("403") || lower.contains("permission") || lower.contains("api key") {
        return ModelError::InvalidCredential;
    }
    if lower.contains("invalid") && lower.contains("key") {
        return ModelError::InvalidCredential;
    }
    ModelError::Other(message.to_string())
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

/// Parses a `generateContent` response body, concatenating every part's
/// text across every candidate — mirrors the original's streaming loop
/// that appended each chunk's text.
fn parse_generate_response(body: &str) -> Result<String, ModelError> {
    let parsed: GenerateContentResponse =
        serde_json::from_str(body).map_err(|err| classify_error(&format!("could not decode model response: {err}")))?;
    let mut text = String::new();
    for candidate in parsed.candidates {
        for part in candidate.content.parts {
            if let Some(chunk) = part.text {
                text.push_str(&chunk);
            }
        }
    }
    Ok(text)
}

/// HTTP client against a Gemini-shaped `generateContent` endpoint.
pub struct GeminiModelClient {
    api_key: String,
    model_name: String,
    base_url: String,
    http: reqwest::blocking::Client,
}

impl GeminiModelClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ModelError> {
        Self::with_model(api_key, DEFAULT_MODEL)
    }

    pub fn with_model(api_key: impl Into<String>, model_name: impl Into<String>) -> Result<Self, ModelError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ModelError::InvalidCredential);
        }
        Ok(Self {
            api_key,
            model_name: model_name.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            http: reqwest::blocking::Client::new(),
        })
    }

    /// Points this client at a different endpoint (tests, regional
    /// mirrors). Not exposed for normal operation.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl ModelClient for GeminiModelClient {
    fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let url = format!("{}/models/{}:generateContent?key={}", self.base_url, self.model_name, self.api_key);
        let body = serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }],
            }]
        });

        let response = self.http.post(&url).json(&body).send().map_err(|err| {
            tracing::error!(error = %err, "model request failed");
            classify_error(&err.to_string())
        })?;

        let status = response.status();
        let text = response.text().unwrap_or_default();
        if !status.is_success() {
            tracing::error!(%status, "model returned an error response");
            return Err(classify_error(&format!("{status} {text}")));
        }

        parse_generate_response(&text)
    }
}

/// Canned-response client for tests: consumes responses off a queue in
/// order, erroring if the queue runs dry.
pub struct FakeModelClient {
    responses: Mutex<VecDeque<Result<String, ModelError>>>,
}

impl FakeModelClient {
    pub fn new(responses: impl IntoIterator<Item = Result<String, ModelError>>) -> Self {
        Self { responses: Mutex::new(responses.into_iter().collect()) }
    }

    pub fn constant(response: Result<String, ModelError>) -> ConstantModelClient {
        ConstantModelClient { response }
    }
}

impl ModelClient for FakeModelClient {
    fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Other("fake model client exhausted".to_string())))
    }
}

/// Returns the same response (or error) for every call.
pub struct ConstantModelClient {
    response: Result<String, ModelError>,
}

impl ModelClient for ConstantModelClient {
    fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
        self.response.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_errors_classify_on_429() {
        assert_eq!(classify_error("Error 429: Too Many Requests"), ModelError::RateLimit);
        assert_eq!(classify_error("you have exceeded your quota"), ModelError::RateLimit);
        assert_eq!(classify_error("please slow down: rate limit exceeded"), ModelError::RateLimit);
    }

    #[test]
    fn credential_errors_classify_on_403_or_permission_or_api_key() {
        assert_eq!(classify_error("403 Forbidden"), ModelError::InvalidCredential);
        assert_eq!(classify_error("permission denied for this project"), ModelError::InvalidCredential);
        assert_eq!(classify_error("missing api key header"), ModelError::InvalidCredential);
        assert_eq!(classify_error("the provided key is invalid"), ModelError::InvalidCredential);
    }

    #[test]
    fn rate_limit_is_checked_before_credential_errors() {
        assert_eq!(classify_error("429: invalid api key and rate limit both apply"), ModelError::RateLimit);
    }

    #[test]
    fn everything_else_falls_through_to_other() {
        match classify_error("the server exploded") {
            ModelError::Other(msg) => assert!(msg.contains("exploded")),
            other => panic!("expected Other, got {other:?}"),
        }
    }

    #[test]
    fn empty_api_key_is_rejected_at_construction() {
        let result = GeminiModelClient::new("   ");
        assert_eq!(result.err(), Some(ModelError::InvalidCredential));
    }

    #[test]
    fn parses_and_concatenates_parts_across_candidates() {
        let body = serde_json::json!({
            "candidates": [
                { "content": { "parts": [{ "text": "hello " }, { "text": "world" }] } }
            ]
        })
        .to_string();
        assert_eq!(parse_generate_response(&body).unwrap(), "hello world");
    }

    #[test]
    fn missing_candidates_yields_empty_text() {
        let body = serde_json::json!({ "candidates": [] }).to_string();
        assert_eq!(parse_generate_response(&body).unwrap(), "");
    }

    #[test]
    fn fake_model_client_serves_responses_in_order_then_errors() {
        let fake = FakeModelClient::new([Ok("first".to_string()), Err(ModelError::RateLimit)]);
        assert_eq!(fake.generate("p").unwrap(), "first");
        assert_eq!(fake.generate("p"), Err(ModelError::RateLimit));
        assert!(matches!(fake.generate("p"), Err(ModelError::Other(_))));
    }

    #[test]
    fn constant_model_client_always_returns_the_same_value() {
        let constant = FakeModelClient::constant(Ok("steady".to_string()));
        assert_eq!(constant.generate("a").unwrap(), "steady");
        assert_eq!(constant.generate("b").unwrap(), "steady");
    }
}
