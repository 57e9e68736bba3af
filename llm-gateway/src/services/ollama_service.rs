//! Thin Ollama client for completions and embeddings.
//!
//! - `POST {endpoint}/api/generate`: non-streaming completion
//! - `POST {endpoint}/api/embed`: embedding of a single input
//!
//! No retries here: callers decide how to back off, since bulk ingestion and
//! interactive queries want different budgets.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider};
use crate::error_handler::{
    GatewayError, HttpError, Provider, ProviderError, ProviderErrorKind, Result, make_snippet,
};

/// Ollama client bound to one model config.
#[derive(Debug)]
pub struct OllamaService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    url_generate: String,
    url_embed: String,
}

impl OllamaService {
    /// Builds a client with the config's request deadline.
    ///
    /// # Errors
    /// - `InvalidProvider` if `cfg.provider` is not Ollama
    /// - `InvalidEndpoint` if the endpoint is not http(s)
    /// - [`GatewayError::HttpTransport`] if the HTTP client cannot be built
    pub fn new(cfg: LlmModelConfig) -> Result<Self> {
        if cfg.provider != LlmProvider::Ollama {
            return Err(
                ProviderError::new(Provider::Ollama, ProviderErrorKind::InvalidProvider).into(),
            );
        }
        if cfg.validate().is_err() {
            return Err(ProviderError::new(
                Provider::Ollama,
                ProviderErrorKind::InvalidEndpoint(cfg.endpoint.clone()),
            )
            .into());
        }

        let client = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .brotli(true)
            .build()?;

        let base = cfg.base_url();
        Ok(Self {
            client,
            url_generate: format!("{base}/api/generate"),
            url_embed: format!("{base}/api/embed"),
            cfg,
        })
    }

    pub fn config(&self) -> &LlmModelConfig {
        &self.cfg
    }

    /// Non-streaming completion via `/api/generate`.
    #[instrument(skip_all, fields(model = %self.cfg.model, prompt_len = prompt.len()))]
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let started = Instant::now();
        let body = GenerateRequest {
            model: &self.cfg.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.cfg.temperature,
                top_p: self.cfg.top_p,
                num_predict: self.cfg.max_tokens,
            },
        };

        debug!("POST {}", self.url_generate);
        let resp = self.client.post(&self.url_generate).json(&body).send().await?;
        let resp = check_status(resp, &self.url_generate).await?;

        let out: GenerateResponse = resp.json().await.map_err(|e| {
            decode_error(format!("serde error: {e}; expected `{{ response: string }}`"))
        })?;

        debug!(latency_ms = started.elapsed().as_millis(), "generate completed");
        Ok(out.response)
    }

    /// Embeds one input via `/api/embed`.
    ///
    /// Accepts both the current `{ embeddings: [[..]] }` shape and the legacy
    /// `{ embedding: [..] }` one.
    #[instrument(skip_all, fields(model = %self.cfg.model, input_len = input.len()))]
    pub async fn embeddings(&self, input: &str) -> Result<Vec<f32>> {
        let body = EmbedRequest {
            model: &self.cfg.model,
            input,
        };

        debug!("POST {}", self.url_embed);
        let resp = self.client.post(&self.url_embed).json(&body).send().await?;
        let resp = check_status(resp, &self.url_embed).await?;

        let out: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| decode_error(format!("serde error: {e}; expected `embeddings`")))?;

        if let Some(v) = out.embedding {
            return Ok(v);
        }
        out.embeddings
            .and_then(|vs| vs.into_iter().next())
            .ok_or_else(|| decode_error("empty embeddings in response".to_string()))
    }

    /// Readiness check: `GET {endpoint}/api/tags` must answer 2xx.
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.cfg.base_url());
        let resp = self.client.get(&url).send().await?;
        check_status(resp, &url).await.map(|_| ())
    }
}

async fn check_status(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let snippet = make_snippet(&resp.text().await.unwrap_or_default());
    error!(%status, %url, %snippet, "Ollama returned non-success status");
    Err(ProviderError::new(
        Provider::Ollama,
        ProviderErrorKind::HttpStatus(HttpError {
            status,
            url: url.to_string(),
            snippet,
        }),
    )
    .into())
}

fn decode_error(msg: String) -> GatewayError {
    ProviderError::new(Provider::Ollama, ProviderErrorKind::Decode(msg)).into()
}

/* ==========================
HTTP payloads
========================== */

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Default, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Option<Vec<f32>>,
    embeddings: Option<Vec<Vec<f32>>>,
}
