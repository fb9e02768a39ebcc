//! Error types for the runner module.

use thiserror::Error;

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur while provisioning or driving a sandbox.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("No sandbox provider available: {0}")]
    NoProviderAvailable(String),

    #[error("Provider {provider} is not configured: {reason}")]
    NotConfigured { provider: String, reason: String },

    #[error("Sandbox creation failed: {0}")]
    CreateFailed(String),

    #[error("Sandbox has not been created yet")]
    NotCreated,

    #[error("File operation failed on {path}: {message}")]
    FileOperation { path: String, message: String },

    #[error("Dev server failed to start: {0}")]
    DevServer(String),

    #[error("Image pull failed: {0}")]
    ImagePullFailed(String),

    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunnerError {
    /// Configuration errors are not worth repairing or retrying automatically.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoProviderAvailable(_) | Self::NotConfigured { .. }
        )
    }
}
