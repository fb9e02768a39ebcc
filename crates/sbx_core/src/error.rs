//! Error types for the core module.

use thiserror::Error;

use crate::types::SandboxStatus;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while running the pipeline.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Sandbox not found: {0}")]
    SandboxNotFound(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: SandboxStatus,
        to: SandboxStatus,
    },

    #[error("Sandbox {0} is in a terminal state")]
    Finalized(String),

    #[error("Retry count {count} exceeds the limit of {max}")]
    RetryLimitExceeded { count: u32, max: u32 },

    #[error("No generated source recorded for tool {0}")]
    SourceNotFound(String),

    #[error("Sandbox setup failed: {0}")]
    Setup(String),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Provider error: {0}")]
    Provider(#[from] sbx_runner::RunnerError),

    #[error("Text generation failed: {0}")]
    Generation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Errors no amount of repair or retrying will fix.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::Provider(e) => e.is_configuration(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbx_runner::RunnerError;

    #[test]
    fn test_configuration_errors() {
        assert!(CoreError::Config("bad".into()).is_configuration());
        assert!(CoreError::Provider(RunnerError::NoProviderAvailable("none".into())).is_configuration());
        assert!(!CoreError::Provider(RunnerError::Timeout(5)).is_configuration());
        assert!(!CoreError::Cancelled.is_configuration());
    }
}
