//! Explicit configuration objects.
//!
//! The library never reads the process environment on its own; binaries call the
//! `from_env` constructors once at startup and pass the values down.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// API key that switches the HTTP client into offline mode.
pub const OFFLINE_API_KEY: &str = "dummy-api-key";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    /// Reads `OPENAI_API_KEY`, `OPENAI_MODEL`, `OPENAI_BASE_URL` and `OPENAI_TIMEOUT_SECS`.
    /// A missing key falls back to offline mode.
    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_else(|_| OFFLINE_API_KEY.to_string());
        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            config.model = model;
        }
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = env_parse::<u64>("OPENAI_TIMEOUT_SECS") {
            config.request_timeout_secs = secs;
        }
        config
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn is_offline(&self) -> bool {
        self.api_key == OFFLINE_API_KEY
    }
}

/// Knobs for a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Rows copied into the prompt preview.
    pub sample_rows: usize,
    /// Max characters kept from a non-JSON model reply.
    pub description_limit: usize,
    /// Upper bound on the single model round trip.
    pub model_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rows: 5,
            description_limit: 200,
            model_timeout: Duration::from_secs(60),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `TRANSFORM_SAMPLE_ROWS`, `TRANSFORM_DESCRIPTION_LIMIT`
    /// and `TRANSFORM_MODEL_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(rows) = env_parse::<usize>("TRANSFORM_SAMPLE_ROWS") {
            config.sample_rows = rows;
        }
        if let Some(limit) = env_parse::<usize>("TRANSFORM_DESCRIPTION_LIMIT") {
            config.description_limit = limit;
        }
        if let Some(secs) = env_parse::<u64>("TRANSFORM_MODEL_TIMEOUT_SECS") {
            config.model_timeout = Duration::from_secs(secs);
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={}", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.sample_rows, 5);
        assert_eq!(config.description_limit, 200);
        assert_eq!(config.model_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_llm_config_builders() {
        let config = LlmConfig::new("key")
            .with_model("gpt-4o-mini")
            .with_base_url("http://localhost:8000/v1/");
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.base_url, "http://localhost:8000/v1");
        assert!(!config.is_offline());
        assert!(LlmConfig::new(OFFLINE_API_KEY).is_offline());
    }
}
