//! Sandbox and provider configuration types.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cli::ContainerRuntime;

/// Identifies a provider driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Docker Engine API (bollard)
    Docker,
    /// Docker or Podman command-line client
    Cli,
    /// In-memory scripted driver
    Mock,
}

impl ProviderKind {
    /// Fixed priority order used in auto mode.
    pub const AUTO_ORDER: [ProviderKind; 2] = [ProviderKind::Docker, ProviderKind::Cli];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Cli => "cli",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "cli" | "podman" => Ok(Self::Cli),
            "mock" => Ok(Self::Mock),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Which driver the factory should try first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPreference {
    #[default]
    Auto,
    Docker,
    Cli,
    Mock,
}

impl ProviderPreference {
    /// The preferred driver, if one was named explicitly.
    pub fn kind(&self) -> Option<ProviderKind> {
        match self {
            Self::Auto => None,
            Self::Docker => Some(ProviderKind::Docker),
            Self::Cli => Some(ProviderKind::Cli),
            Self::Mock => Some(ProviderKind::Mock),
        }
    }
}

impl FromStr for ProviderPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        Ok(match s.parse::<ProviderKind>()? {
            ProviderKind::Docker => Self::Docker,
            ProviderKind::Cli => Self::Cli,
            ProviderKind::Mock => Self::Mock,
        })
    }
}

/// Docker API driver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    pub enabled: bool,
    /// Explicit daemon address; falls back to `DOCKER_HOST` and the local socket.
    pub host: Option<String>,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: None,
        }
    }
}

/// CLI driver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliSettings {
    pub enabled: bool,
    /// Force a runtime instead of auto-detecting one.
    pub runtime: Option<ContainerRuntime>,
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            runtime: None,
        }
    }
}

/// Provider selection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub preference: ProviderPreference,
    pub docker: DockerSettings,
    pub cli: CliSettings,
}

/// Configuration shared by every driver when creating a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container image
    pub image: String,
    /// Image tag
    pub tag: String,
    /// Working directory; relative file paths resolve against it
    pub workdir: String,
    /// Port the dev server listens on inside the sandbox
    pub dev_port: u16,
    /// Container name prefix
    pub name_prefix: String,
    /// Memory limit in bytes
    pub memory_limit: Option<i64>,
    /// CPU limit (number of CPUs)
    pub cpu_limit: Option<f64>,
    /// Per-command timeout in seconds
    pub command_timeout_secs: u64,
    /// Seconds to wait for the dev server to answer after a (re)start
    pub dev_server_wait_secs: u64,
    /// Hard lifetime of a sandbox in seconds
    pub lifetime_secs: u64,
    /// Extra environment variables
    pub env: HashMap<String, String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "node".to_string(),
            tag: "20-slim".to_string(),
            workdir: "/app".to_string(),
            dev_port: 5173,
            name_prefix: "sbx".to_string(),
            memory_limit: Some(2 * 1024 * 1024 * 1024),
            cpu_limit: Some(2.0),
            command_timeout_secs: 300,
            dev_server_wait_secs: 60,
            lifetime_secs: 1800,
            env: HashMap::new(),
        }
    }
}

impl SandboxConfig {
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = dir.into();
        self
    }

    pub fn dev_port(mut self, port: u16) -> Self {
        self.dev_port = port;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn command_timeout(mut self, seconds: u64) -> Self {
        self.command_timeout_secs = seconds;
        self
    }

    pub fn lifetime(mut self, seconds: u64) -> Self {
        self.lifetime_secs = seconds;
        self
    }

    /// Get the full image name with tag.
    pub fn full_image(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    /// Resolve a sandbox path against the working directory.
    pub fn resolve_path(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.workdir.trim_end_matches('/'),
                path.trim_start_matches("./")
            )
        }
    }

    /// Generate a unique container name.
    pub fn container_name(&self) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", self.name_prefix, &id[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_config_builder() {
        let config = SandboxConfig::default()
            .image("node")
            .tag("22-slim")
            .workdir("/workspace")
            .env("CI", "1");

        assert_eq!(config.full_image(), "node:22-slim");
        assert_eq!(config.workdir, "/workspace");
        assert_eq!(config.env.get("CI"), Some(&"1".to_string()));
    }

    #[test]
    fn test_resolve_path() {
        let config = SandboxConfig::default();
        assert_eq!(config.resolve_path("src/App.jsx"), "/app/src/App.jsx");
        assert_eq!(config.resolve_path("./index.html"), "/app/index.html");
        assert_eq!(config.resolve_path("/tmp/dev.log"), "/tmp/dev.log");
    }

    #[test]
    fn test_container_name_prefix() {
        let config = SandboxConfig::default();
        let name = config.container_name();
        assert!(name.starts_with("sbx-"));
        assert_ne!(name, config.container_name());
    }

    #[test]
    fn test_provider_preference_parsing() {
        assert_eq!("auto".parse::<ProviderPreference>(), Ok(ProviderPreference::Auto));
        assert_eq!("Docker".parse::<ProviderPreference>(), Ok(ProviderPreference::Docker));
        assert_eq!("podman".parse::<ProviderPreference>(), Ok(ProviderPreference::Cli));
        assert!("e2b".parse::<ProviderPreference>().is_err());
        assert_eq!(ProviderPreference::Cli.kind(), Some(ProviderKind::Cli));
        assert_eq!(ProviderPreference::Auto.kind(), None);
    }
}
