//! Error types for the LLM backends.

use sbx_core::CoreError;
use thiserror::Error;

/// Result type alias for LLM calls.
pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM not configured. Set OPENAI_API_KEY or ANTHROPIC_API_KEY")]
    NotConfigured,

    #[error("Unknown LLM provider: {0}")]
    UnknownProvider(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Failed to parse response: {0}")]
    InvalidResponse(String),

    #[error("Empty response from {0}")]
    EmptyResponse(String),

    #[error("Max retries exceeded")]
    RetriesExhausted,
}

impl LlmError {
    /// Network failures, rate limits and server errors are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<LlmError> for CoreError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::NotConfigured | LlmError::UnknownProvider(_) => CoreError::Config(err.to_string()),
            other => CoreError::Generation(other.to_string()),
        }
    }
}
