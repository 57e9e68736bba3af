//! Provider gateway (Ollama / OpenAI-compatible) for embeddings and completions.

pub mod config;
pub mod error_handler;
pub mod gateway;
pub mod services;
pub mod telemetry;

pub use error_handler::{GatewayError, Result};
pub use gateway::{HealthStatus, LlmGateway};
