use crate::config::llm_provider::LlmProvider;
use crate::error_handler::{ConfigError, Result, validate_http_endpoint};

/// Configuration for one model endpoint (embedding or completion).
///
/// # Fields
///
/// - `provider`: backend serving the model.
/// - `model`: model identifier (e.g. `"bge-m3"`, `"qwen3:14b"`).
/// - `endpoint`: base URL of the service, without the API path.
/// - `api_key`: bearer token for providers that require one.
/// - `max_tokens`, `temperature`, `top_p`: generation knobs (ignored for embeddings).
/// - `timeout_secs`: request-scoped deadline applied to every call.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmModelConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub timeout_secs: Option<u64>,
}

impl LlmModelConfig {
    /// Default per-request deadline when `timeout_secs` is unset.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

    /// Effective request deadline.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.unwrap_or(Self::DEFAULT_TIMEOUT_SECS))
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> String {
        self.endpoint.trim().trim_end_matches('/').to_string()
    }

    /// Checks the fields every provider needs.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::EmptyModel.into());
        }
        validate_http_endpoint("endpoint", &self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(endpoint: &str, model: &str) -> LlmModelConfig {
        LlmModelConfig {
            provider: LlmProvider::Ollama,
            model: model.into(),
            endpoint: endpoint.into(),
            api_key: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            timeout_secs: None,
        }
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        assert_eq!(cfg("http://h:1/", "m").base_url(), "http://h:1");
    }

    #[test]
    fn validate_rejects_empty_model_and_bad_scheme() {
        assert!(cfg("http://h:1", "").validate().is_err());
        assert!(cfg("h:1", "m").validate().is_err());
        assert!(cfg("https://h", "m").validate().is_ok());
        assert_eq!(cfg("https://h", "m").timeout().as_secs(), 60);
    }
}
