//! Shared gateway over two model roles: `embedding` and `completion`.
//!
//! - Lives in the same Tokio runtime as the application.
//! - Construct once, wrap in `Arc`, and pass clones to dependents.
//! - Provider clients are built eagerly, so a bad config fails at startup.
//! - When both roles point at the same provider config, one client is shared.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use llm_gateway::gateway::LlmGateway;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gw = Arc::new(LlmGateway::from_env()?);
//!     let v = gw.embed("How do I reset my password?").await?;
//!     println!("dim = {}", v.len());
//!     Ok(())
//! }
//! ```

use std::{sync::Arc, time::Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::{
        default_config::{config_completion, config_embedding},
        llm_model_config::LlmModelConfig,
        llm_provider::LlmProvider,
    },
    error_handler::Result,
    services::{ollama_service::OllamaService, open_ai_service::OpenAiService},
};

/// One constructed provider client.
#[derive(Debug, Clone)]
enum ProviderClient {
    Ollama(Arc<OllamaService>),
    OpenAI(Arc<OpenAiService>),
}

impl ProviderClient {
    fn build(cfg: &LlmModelConfig) -> Result<Self> {
        Ok(match cfg.provider {
            LlmProvider::Ollama => Self::Ollama(Arc::new(OllamaService::new(cfg.clone())?)),
            LlmProvider::OpenAI => Self::OpenAI(Arc::new(OpenAiService::new(cfg.clone())?)),
        })
    }

    async fn ping(&self) -> Result<()> {
        match self {
            Self::Ollama(c) => c.ping().await,
            Self::OpenAI(c) => c.ping().await,
        }
    }
}

/// A serializable health snapshot for one role.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// `embedding` or `completion`.
    pub role: &'static str,
    /// Backend/provider (e.g., "Ollama", "OpenAI").
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    pub ok: bool,
    pub latency_ms: u128,
    /// Short human-readable message with details.
    pub message: String,
}

/// Embedding plus completion access behind one handle.
#[derive(Debug)]
pub struct LlmGateway {
    embedding_cfg: LlmModelConfig,
    completion_cfg: LlmModelConfig,
    embedding: ProviderClient,
    completion: ProviderClient,
}

impl LlmGateway {
    /// Builds the gateway from two role configs.
    ///
    /// # Errors
    /// Returns [`crate::error_handler::GatewayError`] if either client cannot be built.
    pub fn new(embedding_cfg: LlmModelConfig, completion_cfg: LlmModelConfig) -> Result<Self> {
        let embedding = ProviderClient::build(&embedding_cfg)?;
        let completion = if completion_cfg == embedding_cfg {
            embedding.clone()
        } else {
            ProviderClient::build(&completion_cfg)?
        };

        info!(
            provider = ?embedding_cfg.provider,
            embedding_model = %embedding_cfg.model,
            completion_model = %completion_cfg.model,
            "LLM gateway ready"
        );

        Ok(Self {
            embedding_cfg,
            completion_cfg,
            embedding,
            completion,
        })
    }

    /// Builds the gateway from environment variables
    /// (see [`crate::config::default_config`]).
    ///
    /// # Errors
    /// Propagates any config or client construction error.
    pub fn from_env() -> Result<Self> {
        Self::new(config_embedding()?, config_completion()?)
    }

    /// Computes one embedding vector with the **embedding** role.
    ///
    /// # Errors
    /// Transport, status and decode failures; status lines are kept in the message.
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>> {
        match &self.embedding {
            ProviderClient::Ollama(c) => c.embeddings(input).await,
            ProviderClient::OpenAI(c) => c.embeddings(input).await,
        }
    }

    /// Generates an answer with the **completion** role.
    ///
    /// # Errors
    /// Transport, status and decode failures.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        match &self.completion {
            ProviderClient::Ollama(c) => c.generate(prompt).await,
            ProviderClient::OpenAI(c) => c.generate(prompt).await,
        }
    }

    /// Probes both roles. Never fails; errors map to `ok = false`.
    pub async fn health(&self) -> Vec<HealthStatus> {
        let mut out = Vec::with_capacity(2);
        out.push(check_role("embedding", &self.embedding_cfg, &self.embedding).await);
        out.push(check_role("completion", &self.completion_cfg, &self.completion).await);
        out
    }

    /// True when every role answered its health check.
    pub async fn is_ready(&self) -> bool {
        self.health().await.iter().all(|h| h.ok)
    }

    pub fn embedding_config(&self) -> &LlmModelConfig {
        &self.embedding_cfg
    }

    pub fn completion_config(&self) -> &LlmModelConfig {
        &self.completion_cfg
    }
}

async fn check_role(
    role: &'static str,
    cfg: &LlmModelConfig,
    client: &ProviderClient,
) -> HealthStatus {
    let started = Instant::now();
    let res = client.ping().await;
    let latency_ms = started.elapsed().as_millis();

    let (ok, message) = match res {
        Ok(()) => {
            debug!(role, latency_ms, "health check ok");
            (true, "reachable".to_string())
        }
        Err(e) => {
            warn!(role, error = %e, "health check failed");
            (false, e.to_string())
        }
    };

    HealthStatus {
        role,
        provider: format!("{:?}", cfg.provider),
        endpoint: cfg.endpoint.clone(),
        model: cfg.model.clone(),
        ok,
        latency_ms,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ollama(model: &str) -> LlmModelConfig {
        LlmModelConfig {
            provider: LlmProvider::Ollama,
            model: model.into(),
            endpoint: "http://localhost:11434".into(),
            api_key: None,
            max_tokens: None,
            temperature: Some(0.0),
            top_p: None,
            timeout_secs: Some(5),
        }
    }

    #[test]
    fn identical_roles_share_client() {
        let cfg = ollama("qwen3:8b");
        let gw = LlmGateway::new(cfg.clone(), cfg).unwrap();
        match (&gw.embedding, &gw.completion) {
            (ProviderClient::Ollama(a), ProviderClient::Ollama(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected Ollama clients"),
        }
    }

    #[test]
    fn distinct_roles_keep_their_models() {
        let gw = LlmGateway::new(ollama("bge-m3"), ollama("qwen3:8b")).unwrap();
        assert_eq!(gw.embedding_config().model, "bge-m3");
        assert_eq!(gw.completion_config().model, "qwen3:8b");
    }

    #[tokio::test]
    async fn unreachable_backend_reports_not_ready() {
        let mut cfg = ollama("bge-m3");
        cfg.endpoint = "http://127.0.0.1:9".into();
        cfg.timeout_secs = Some(1);
        let gw = LlmGateway::new(cfg.clone(), cfg).unwrap();
        let health = gw.health().await;
        assert_eq!(health.len(), 2);
        assert!(health.iter().all(|h| !h.ok));
        assert!(!gw.is_ready().await);
    }
}
