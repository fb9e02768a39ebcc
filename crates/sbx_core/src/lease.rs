//! Ownership of a live sandbox handed back to the caller.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sbx_runner::SandboxProvider;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CoreResult;

/// A running sandbox that must be terminated.
///
/// Dropping an unreleased lease schedules termination on the current Tokio
/// runtime.
pub struct SandboxLease {
    sandbox_id: String,
    url: String,
    expires_at: DateTime<Utc>,
    provider: Option<Arc<dyn SandboxProvider>>,
}

impl SandboxLease {
    pub fn new(
        sandbox_id: impl Into<String>,
        url: impl Into<String>,
        expires_at: DateTime<Utc>,
        provider: Arc<dyn SandboxProvider>,
    ) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            url: url.into(),
            expires_at,
            provider: Some(provider),
        }
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn provider(&self) -> Option<&dyn SandboxProvider> {
        self.provider.as_deref()
    }

    /// Release the sandbox now.
    pub async fn terminate(mut self) -> CoreResult<()> {
        if let Some(provider) = self.provider.take() {
            info!("Terminating sandbox {}", self.sandbox_id);
            provider.terminate().await?;
        }
        Ok(())
    }

    /// Keep the sandbox running until it expires or `cancel` fires.
    pub async fn hold(self, cancel: CancellationToken) -> CoreResult<()> {
        let remaining = (self.expires_at - Utc::now()).to_std().unwrap_or_default();
        info!(
            "Holding sandbox {} at {} for up to {}s",
            self.sandbox_id,
            self.url,
            remaining.as_secs()
        );
        tokio::select! {
            _ = tokio::time::sleep(remaining) => info!("Sandbox {} reached its lifetime", self.sandbox_id),
            _ = cancel.cancelled() => info!("Sandbox {} released", self.sandbox_id),
        }
        self.terminate().await
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        let Some(provider) = self.provider.take() else {
            return;
        };
        let sandbox_id = self.sandbox_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = provider.terminate().await {
                        warn!("Terminating dropped sandbox {} failed: {}", sandbox_id, e);
                    }
                });
            }
            Err(_) => warn!("Sandbox {} dropped outside a runtime and was not terminated", sandbox_id),
        }
    }
}

impl fmt::Debug for SandboxLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxLease")
            .field("sandbox_id", &self.sandbox_id)
            .field("url", &self.url)
            .field("expires_at", &self.expires_at)
            .field("live", &self.provider.is_some())
            .finish()
    }
}
