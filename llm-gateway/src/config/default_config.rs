//! Gateway configs loaded from environment variables.
//!
//! Two roles are resolved here:
//!
//! - **Embedding**  → deterministic embedding model, short deadline
//! - **Completion** → chat/completion model used to answer with RAG context
//!
//! # Environment variables
//!
//! Common:
//! - `LLM_KIND`               = `ollama` (default) or `openai`
//! - `EMBEDDING_MODEL`        = embedding model (mandatory)
//! - `COMPLETION_MODEL`       = completion model (mandatory)
//! - `LLM_MAX_TOKENS`         = optional max tokens (u32)
//! - `LLM_TIMEOUT_SECS`       = completion deadline (default 120)
//! - `EMBEDDING_TIMEOUT_SECS` = embedding deadline (default 30)
//!
//! Ollama:
//! - `OLLAMA_URL` or `OLLAMA_PORT`
//!
//! OpenAI-compatible:
//! - `OPENAI_URL` (default `https://api.openai.com`)
//! - `OPENAI_API_KEY` (mandatory)

use crate::{
    config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider},
    error_handler::{
        ConfigError, GatewayError, env_opt_u32, env_opt_u64, must_env, opt_env,
        validate_http_endpoint,
    },
};

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Resolves the Ollama endpoint.
///
/// Precedence:
/// 1. `OLLAMA_URL` if present and non-empty
/// 2. `OLLAMA_PORT` → `http://localhost:{port}`
fn ollama_endpoint() -> Result<String, GatewayError> {
    if let Some(url) = opt_env("OLLAMA_URL") {
        validate_http_endpoint("OLLAMA_URL", &url)?;
        return Ok(url);
    }
    if let Some(port) = opt_env("OLLAMA_PORT") {
        port.trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidNumber {
                var: "OLLAMA_PORT",
                reason: "expected u16 (1..=65535)",
            })?;
        return Ok(format!("http://localhost:{}", port.trim()));
    }
    Err(ConfigError::MissingVar("OLLAMA_URL or OLLAMA_PORT").into())
}

/// Provider plus endpoint and key shared by both roles.
fn provider_endpoint() -> Result<(LlmProvider, String, Option<String>), GatewayError> {
    let provider = match opt_env("LLM_KIND") {
        Some(kind) => kind.parse::<LlmProvider>()?,
        None => LlmProvider::Ollama,
    };

    match provider {
        LlmProvider::Ollama => Ok((provider, ollama_endpoint()?, None)),
        LlmProvider::OpenAI => {
            let url = opt_env("OPENAI_URL").unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
            validate_http_endpoint("OPENAI_URL", &url)?;
            let key = must_env("OPENAI_API_KEY")?;
            Ok((provider, url, Some(key)))
        }
    }
}

/// Config for the **embedding** model.
///
/// # Defaults
/// - `temperature = Some(0.0)`
/// - `timeout_secs = 30`
pub fn config_embedding() -> Result<LlmModelConfig, GatewayError> {
    let (provider, endpoint, api_key) = provider_endpoint()?;
    let model = must_env("EMBEDDING_MODEL")?;
    let timeout_secs = env_opt_u64("EMBEDDING_TIMEOUT_SECS")?.unwrap_or(30);

    Ok(LlmModelConfig {
        provider,
        model,
        endpoint,
        api_key,
        max_tokens: None,
        temperature: Some(0.0),
        top_p: None,
        timeout_secs: Some(timeout_secs),
    })
}

/// Config for the **completion** model.
///
/// # Defaults
/// - `temperature = Some(0.3)`
/// - `timeout_secs = 120`
pub fn config_completion() -> Result<LlmModelConfig, GatewayError> {
    let (provider, endpoint, api_key) = provider_endpoint()?;
    let model = must_env("COMPLETION_MODEL")?;
    let max_tokens = env_opt_u32("LLM_MAX_TOKENS")?;
    let timeout_secs = env_opt_u64("LLM_TIMEOUT_SECS")?.unwrap_or(120);

    Ok(LlmModelConfig {
        provider,
        model,
        endpoint,
        api_key,
        max_tokens,
        temperature: Some(0.3),
        top_p: None,
        timeout_secs: Some(timeout_secs),
    })
}
