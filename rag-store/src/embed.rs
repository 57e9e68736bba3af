//! Embedding Gateway: one text in, one vector out.
//!
//! Implementations make a single call and never retry; the callers own the
//! retry budget (bulk ingestion and interactive queries want different ones).

use std::{future::Future, pin::Pin, sync::Arc};

use llm_gateway::LlmGateway;
use tracing::warn;

use crate::errors::RagError;

/// Asynchronous embedding provider.
///
/// Implement this trait to plug in your own embedding backend.
pub trait EmbeddingsProvider: Send + Sync {
    fn embed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, RagError>> + Send + 'a>>;
}

/// [`EmbeddingsProvider`] over the shared [`LlmGateway`], with a dimension check.
#[derive(Clone, Debug)]
pub struct GatewayEmbedder {
    gateway: Arc<LlmGateway>,
    dim: usize,
}

impl GatewayEmbedder {
    pub fn new(gateway: Arc<LlmGateway>, dim: usize) -> Self {
        Self { gateway, dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl EmbeddingsProvider for GatewayEmbedder {
    fn embed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, RagError>> + Send + 'a>> {
        Box::pin(async move {
            let v = self.gateway.embed(text).await?;
            if v.len() != self.dim {
                warn!(got = v.len(), want = self.dim, "embedding dimension mismatch");
                return Err(RagError::VectorSizeMismatch {
                    got: v.len(),
                    want: self.dim,
                });
            }
            Ok(v)
        })
    }
}
