//! Unified error types for the crate.

use std::time::Duration;

use llm_gateway::GatewayError;
use thiserror::Error;

/// Top-level error for rag-store operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// I/O or filesystem errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing / serialization errors.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid or unsupported configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Embedding length differs from the collection dimension.
    #[error("vector size mismatch: got {got}, want {want}")]
    VectorSizeMismatch { got: usize, want: usize },

    /// Embedding service failure (status line kept verbatim).
    #[error("embedding error: {0}")]
    Embedding(#[from] GatewayError),

    /// Qdrant client errors (wrapped).
    #[error("qdrant error: {0}")]
    Qdrant(String),

    /// A single external call exceeded its deadline.
    #[error("deadline exceeded after {0:?}")]
    Timeout(Duration),

    /// Record could not be turned into a document.
    #[error("malformed record #{ordinal}: {reason}")]
    MalformedRecord { ordinal: u64, reason: String },

    /// Some batches exhausted their retries; the rest were ingested.
    #[error("ingestion incomplete: {succeeded} records stored, failed batches: {failed}")]
    PartialIngest { succeeded: usize, failed: String },

    /// Both the advanced and the baseline search failed.
    #[error("search failed: advanced: {advanced}; baseline: {baseline}")]
    SearchFailed {
        advanced: Box<RagError>,
        baseline: Box<RagError>,
    },

    /// Background worker died without reporting.
    #[error("worker error: {0}")]
    Worker(String),
}

impl RagError {
    /// Configuration-class errors are never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RagError::Config(_) | RagError::VectorSizeMismatch { .. }
        ) || matches!(self, RagError::Embedding(GatewayError::Config(_)))
    }
}

impl From<serde_json::Error> for RagError {
    fn from(e: serde_json::Error) -> Self {
        RagError::Parse(e.to_string())
    }
}

impl From<qdrant_client::QdrantError> for RagError {
    fn from(e: qdrant_client::QdrantError) -> Self {
        RagError::Qdrant(e.to_string())
    }
}
