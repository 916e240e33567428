//! Hosted LLM access
//!
//! The pipeline stages talk to the model through [`LlmClient`], so tests can
//! substitute scripted responses. [`GeminiClient`] is the production
//! implementation.

pub mod backoff;
pub mod gemini;

use async_trait::async_trait;
use thiserror::Error;

pub use backoff::RetryPolicy;
pub use gemini::{GeminiClient, GeminiConfig};

/// LLM client errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Rate limited by provider (HTTP 429)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Model returned no text")]
    EmptyResponse,

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Client configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Network(_) | LlmError::RateLimited { .. } => true,
            LlmError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Text-completion interface used by the pipeline stages
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one prompt, return the model's text reply
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// Model identifier, recorded in the audit logs
    fn model_name(&self) -> &str;
}
