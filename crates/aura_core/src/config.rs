//! Environment-driven model provider configuration.
//!
//! # Responsibility
//! - Collect endpoint, model name, key source and timeout from the
//!   process environment with stable defaults.
//!
//! # Invariants
//! - The API key itself is never stored here; only the name of the
//!   environment variable that holds it.

use std::env;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Model provider settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// Endpoint base URL (`/chat/completions` is appended).
    pub base_url: String,
    /// Model name sent with every request.
    pub model: String,
    /// Name of the environment variable holding the API key, if auth is
    /// required.
    pub api_key_env: Option<String>,
    /// Hard bound on one model round trip.
    pub timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: Some(DEFAULT_API_KEY_ENV.to_string()),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ModelConfig {
    /// Reads configuration from `AURA_MODEL_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let timeout = env::var("AURA_MODEL_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);

        Self {
            base_url: env::var("AURA_MODEL_BASE_URL").unwrap_or(defaults.base_url),
            model: env::var("AURA_MODEL_NAME").unwrap_or(defaults.model),
            api_key_env: env::var("AURA_MODEL_API_KEY_ENV")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .or(defaults.api_key_env),
            timeout,
        }
    }
}
