//! Error type for the session layer.

use llm_gateway::GatewayError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Durable store failure.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The store's connection lock was poisoned by a panicking writer.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Stored data could not be decoded (timestamps, roles).
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Completion service failure.
    #[error("completion failed: {0}")]
    Completion(#[from] GatewayError),

    /// Rejected request (empty topic or content).
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("config error: {0}")]
    Config(String),

    /// Blocking task or background worker failed to report.
    #[error("worker error: {0}")]
    Worker(String),
}
