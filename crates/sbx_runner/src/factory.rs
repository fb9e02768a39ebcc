//! Provider selection with ordered fallback.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cli::CliProvider;
use crate::config::{
    CliSettings, DockerSettings, ProviderKind, ProviderPreference, ProviderSettings, SandboxConfig,
};
use crate::docker::DockerProvider;
use crate::error::{RunnerError, RunnerResult};
use crate::mock::MockProvider;
use crate::provider::{SandboxInfo, SandboxProvider};

/// Constructs providers of one kind.
pub trait ProviderDriver: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Cheap, static check that the driver could be used at all.
    fn is_configured(&self) -> bool;

    /// Build an (uncreated) provider.
    fn instantiate(&self, config: &SandboxConfig) -> RunnerResult<Box<dyn SandboxProvider>>;
}

/// Docker Engine API driver.
pub struct DockerDriver {
    settings: DockerSettings,
}

impl DockerDriver {
    pub fn new(settings: DockerSettings) -> Self {
        Self { settings }
    }
}

impl ProviderDriver for DockerDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Docker
    }

    fn is_configured(&self) -> bool {
        DockerProvider::is_configured(&self.settings)
    }

    fn instantiate(&self, config: &SandboxConfig) -> RunnerResult<Box<dyn SandboxProvider>> {
        Ok(Box::new(DockerProvider::connect(&self.settings, config.clone())?))
    }
}

/// Docker/Podman CLI driver.
pub struct CliDriver {
    settings: CliSettings,
}

impl CliDriver {
    pub fn new(settings: CliSettings) -> Self {
        Self { settings }
    }
}

impl ProviderDriver for CliDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Cli
    }

    fn is_configured(&self) -> bool {
        CliProvider::is_configured(&self.settings)
    }

    fn instantiate(&self, config: &SandboxConfig) -> RunnerResult<Box<dyn SandboxProvider>> {
        Ok(Box::new(CliProvider::from_settings(&self.settings, config.clone())?))
    }
}

/// Driver handing out clones of a prepared [`MockProvider`].
pub struct MockDriver {
    provider: MockProvider,
    configured: bool,
}

impl MockDriver {
    pub fn new(provider: MockProvider) -> Self {
        Self {
            provider,
            configured: true,
        }
    }

    /// A driver that reports itself as not configured.
    pub fn unconfigured(provider: MockProvider) -> Self {
        Self {
            provider,
            configured: false,
        }
    }
}

impl ProviderDriver for MockDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    fn instantiate(&self, _config: &SandboxConfig) -> RunnerResult<Box<dyn SandboxProvider>> {
        Ok(Box::new(self.provider.clone()))
    }
}

/// A created sandbox together with the provider that owns it.
pub struct Provisioned {
    pub provider: Box<dyn SandboxProvider>,
    pub info: SandboxInfo,
}

impl std::fmt::Debug for Provisioned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioned").field("info", &self.info).finish()
    }
}

/// Selects a driver and creates a sandbox, falling back across drivers.
pub struct ProviderFactory {
    drivers: Vec<Arc<dyn ProviderDriver>>,
    preference: ProviderPreference,
    config: SandboxConfig,
}

impl ProviderFactory {
    /// An empty factory; register drivers with [`ProviderFactory::with_driver`].
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            drivers: Vec::new(),
            preference: ProviderPreference::Auto,
            config,
        }
    }

    /// The Docker and CLI drivers in their fixed priority order.
    pub fn from_settings(settings: &ProviderSettings, config: SandboxConfig) -> Self {
        Self::new(config)
            .with_driver(Arc::new(DockerDriver::new(settings.docker.clone())))
            .with_driver(Arc::new(CliDriver::new(settings.cli.clone())))
            .preference(settings.preference)
    }

    pub fn with_driver(mut self, driver: Arc<dyn ProviderDriver>) -> Self {
        self.drivers.push(driver);
        self
    }

    pub fn preference(mut self, preference: ProviderPreference) -> Self {
        self.preference = preference;
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Drivers in the order they will be attempted.
    pub fn candidates(&self) -> Vec<Arc<dyn ProviderDriver>> {
        match self.preference.kind() {
            Some(kind) => {
                let (mut preferred, rest): (Vec<_>, Vec<_>) =
                    self.drivers.iter().cloned().partition(|d| d.kind() == kind);
                preferred.extend(rest);
                preferred
            }
            None => self.drivers.clone(),
        }
    }

    /// Create a sandbox with the first driver that is configured and succeeds.
    pub async fn provision(&self) -> RunnerResult<Provisioned> {
        let mut attempts = Vec::new();

        for driver in self.candidates() {
            let kind = driver.kind();
            if !driver.is_configured() {
                debug!("Provider {} is not configured, skipping", kind);
                continue;
            }

            let provider = match driver.instantiate(&self.config) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Provider {} could not be initialized: {}", kind, e);
                    attempts.push(format!("{}: {}", kind, e));
                    continue;
                }
            };

            match provider.create().await {
                Ok(info) => {
                    info!("Provisioned sandbox {} via {}", info.id, kind);
                    return Ok(Provisioned { provider, info });
                }
                Err(e) => {
                    warn!("Provider {} failed to create a sandbox: {}", kind, e);
                    attempts.push(format!("{}: {}", kind, e));
                    if let Err(cleanup) = provider.terminate().await {
                        warn!("Cleanup after failed create on {} failed: {}", kind, cleanup);
                    }
                }
            }
        }

        if attempts.is_empty() {
            Err(RunnerError::NoProviderAvailable(
                "no sandbox provider is configured".to_string(),
            ))
        } else {
            Err(RunnerError::NoProviderAvailable(format!(
                "all providers failed ({})",
                attempts.join("; ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Driver that always fails to initialize, tagged with a kind.
    struct BrokenDriver(ProviderKind);

    impl ProviderDriver for BrokenDriver {
        fn kind(&self) -> ProviderKind {
            self.0
        }

        fn is_configured(&self) -> bool {
            true
        }

        fn instantiate(&self, _config: &SandboxConfig) -> RunnerResult<Box<dyn SandboxProvider>> {
            Err(RunnerError::CreateFailed("daemon unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_first_configured_driver_wins() {
        let mock = MockProvider::new();
        let factory = ProviderFactory::new(SandboxConfig::default())
            .with_driver(Arc::new(MockDriver::unconfigured(MockProvider::new())))
            .with_driver(Arc::new(BrokenDriver(ProviderKind::Docker)))
            .with_driver(Arc::new(BrokenDriver(ProviderKind::Cli)));

        let err = factory.provision().await.unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("docker: "));
        assert!(err.to_string().contains("cli: "));

        let factory = ProviderFactory::new(SandboxConfig::default())
            .with_driver(Arc::new(BrokenDriver(ProviderKind::Docker)))
            .with_driver(Arc::new(MockDriver::new(mock.clone())));
        let provisioned = factory.provision().await.unwrap();
        assert_eq!(provisioned.info.provider, ProviderKind::Mock);
        assert!(mock.was_called("create"));
    }

    #[tokio::test]
    async fn test_create_failure_falls_back_and_cleans_up() {
        let failing = MockProvider::new().fail_create("quota exceeded");
        let healthy = MockProvider::new();

        let factory = ProviderFactory::new(SandboxConfig::default())
            .with_driver(Arc::new(MockDriver::new(failing.clone())))
            .with_driver(Arc::new(BrokenDriver(ProviderKind::Cli)))
            .preference(ProviderPreference::Cli);

        // Preferred CLI fails to initialize, mock fails to create.
        let err = factory.provision().await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert!(failing.was_called("terminate"));

        let factory = ProviderFactory::new(SandboxConfig::default())
            .with_driver(Arc::new(BrokenDriver(ProviderKind::Docker)))
            .with_driver(Arc::new(MockDriver::new(healthy.clone())));
        assert!(factory.provision().await.is_ok());
        assert!(healthy.is_alive().await);
    }

    #[tokio::test]
    async fn test_nothing_configured_is_configuration_error() {
        let factory = ProviderFactory::new(SandboxConfig::default())
            .with_driver(Arc::new(MockDriver::unconfigured(MockProvider::new())));
        let err = factory.provision().await.unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("no sandbox provider is configured"));
    }

    #[test]
    fn test_preference_moves_driver_first() {
        let factory = ProviderFactory::new(SandboxConfig::default())
            .with_driver(Arc::new(BrokenDriver(ProviderKind::Docker)))
            .with_driver(Arc::new(BrokenDriver(ProviderKind::Cli)))
            .preference(ProviderPreference::Cli);
        let kinds: Vec<_> = factory.candidates().iter().map(|d| d.kind()).collect();
        assert_eq!(kinds, vec![ProviderKind::Cli, ProviderKind::Docker]);

        let auto = ProviderFactory::new(SandboxConfig::default())
            .with_driver(Arc::new(BrokenDriver(ProviderKind::Docker)))
            .with_driver(Arc::new(BrokenDriver(ProviderKind::Cli)));
        let kinds: Vec<_> = auto.candidates().iter().map(|d| d.kind()).collect();
        assert_eq!(kinds, vec![ProviderKind::Docker, ProviderKind::Cli]);
    }

    #[test]
    fn test_disabled_drivers_are_not_configured() {
        let settings = ProviderSettings {
            docker: DockerSettings {
                enabled: false,
                host: None,
            },
            cli: CliSettings {
                enabled: false,
                runtime: None,
            },
            ..Default::default()
        };
        let factory = ProviderFactory::from_settings(&settings, SandboxConfig::default());
        assert!(factory.candidates().iter().all(|d| !d.is_configured()));
    }
}
