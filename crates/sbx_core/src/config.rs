//! Pipeline settings loaded from `sbx.toml` or `sbx.yaml`.

use std::path::Path;
use std::time::Duration;

use sbx_runner::{ProviderPreference, ProviderSettings, SandboxConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CoreError, CoreResult};

/// Health probe policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub attempts: u32,
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval_ms: 2000,
            timeout_ms: 5000,
        }
    }
}

impl HealthSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Smoke test policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSettings {
    pub enabled: bool,
    /// Sources shorter than this many non-blank lines skip the smoke test
    pub min_lines: usize,
    pub timeout_secs: u64,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_lines: 20,
            timeout_secs: 120,
        }
    }
}

/// Everything a pipeline run is configured by.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_retries: u32,
    pub health: HealthSettings,
    pub tests: TestSettings,
    pub sandbox: SandboxConfig,
    pub providers: ProviderSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            health: HealthSettings::default(),
            tests: TestSettings::default(),
            sandbox: SandboxConfig::default(),
            providers: ProviderSettings::default(),
        }
    }
}

impl PipelineSettings {
    /// Load from a TOML or YAML file, chosen by extension.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))?,
            Some("toml") | None => toml::from_str(&content)
                .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))?,
            Some(other) => {
                return Err(CoreError::Config(format!(
                    "Unsupported config format '.{}' for {}",
                    other,
                    path.display()
                )))
            }
        };
        Ok(settings)
    }

    /// Look for `sbx.toml`, then `sbx.yaml`, in `dir`.
    pub fn discover(dir: &Path) -> CoreResult<Self> {
        for name in ["sbx.toml", "sbx.yaml", "sbx.yml"] {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Self::load(&candidate);
            }
        }
        Ok(Self::default())
    }

    /// Apply `SBX_PROVIDER` and `SBX_MAX_RETRIES`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(provider) = std::env::var("SBX_PROVIDER") {
            match provider.parse::<ProviderPreference>() {
                Ok(preference) => self.providers.preference = preference,
                Err(e) => warn!("Ignoring SBX_PROVIDER: {}", e),
            }
        }
        if let Ok(retries) = std::env::var("SBX_MAX_RETRIES") {
            match retries.parse::<u32>() {
                Ok(value) => self.max_retries = value,
                Err(_) => warn!("Ignoring SBX_MAX_RETRIES: '{}' is not a number", retries),
            }
        }
        self
    }
}
