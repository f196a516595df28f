//! Model provider contract and OpenAI-compatible HTTP client.
//!
//! # Responsibility
//! - Define the narrow completion interface the interpreter consumes.
//! - Implement it against any `/chat/completions`-compatible endpoint.
//!
//! # Invariants
//! - Every request is timeout-bounded; the provider never blocks a unit
//!   of work indefinitely.
//! - Transport failures and endpoint failures are distinguishable, so
//!   the caller can retry only the former.

use crate::config::ModelConfig;
use serde_json::{json, Value};
use std::env;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Completion failures, split by retry safety.
#[derive(Debug)]
pub enum ProviderError {
    /// Connection-level failure (DNS, connect, timeout). Retryable once.
    Transport(String),
    /// The endpoint answered with an error or an unusable body.
    Api(String),
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "model transport failure: {message}"),
            Self::Api(message) => write!(f, "model endpoint failure: {message}"),
        }
    }
}

impl Error for ProviderError {}

/// Narrow completion interface consumed by the interpreter.
///
/// Implementations own endpoint, auth, and timeout concerns; the
/// interpreter only sees raw response text.
pub trait ModelProvider {
    /// Provider name used in diagnostics.
    fn name(&self) -> &str;

    /// Requests one completion for `utterance` under `system_prompt`.
    fn complete(&self, system_prompt: &str, utterance: &str) -> Result<String, ProviderError>;
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiCompatProvider {
    model: String,
    base_url: String,
    api_key_env: Option<String>,
    timeout: Duration,
}

impl OpenAiCompatProvider {
    /// Builds a provider from environment-driven configuration.
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key_env: config.api_key_env.clone(),
            timeout: config.timeout,
        }
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn auth_header(&self) -> Option<String> {
        self.api_key_env
            .as_ref()
            .and_then(|name| env::var(name).ok())
            .map(|key| format!("Bearer {key}"))
    }
}

impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai_compat"
    }

    fn complete(&self, system_prompt: &str, utterance: &str) -> Result<String, ProviderError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": utterance},
            ],
        });

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        let mut builder = client
            .post(self.url())
            .header("Content-Type", "application/json")
            .json(&payload);
        if let Some(auth) = self.auth_header() {
            builder = builder.header("Authorization", auth);
        }

        let response = builder
            .send()
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|value| {
                    value["error"]["message"]
                        .as_str()
                        .map(|text| text.to_string())
                })
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(ProviderError::Api(message));
        }

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|err| ProviderError::Api(format!("unparseable response body: {err}")))?;
        parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(|text| text.to_string())
            .ok_or_else(|| ProviderError::Api("response carries no message content".to_string()))
    }
}
