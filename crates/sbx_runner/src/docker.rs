//! Docker Engine API implementation of [`SandboxProvider`].

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::service::{HostConfig, PortBinding};
use bollard::Docker;
use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{DockerSettings, ProviderKind, SandboxConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::provider::{parent_dir, shell_quote, CommandResult, SandboxInfo, SandboxProvider};

const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Docker-API-backed sandbox.
pub struct DockerProvider {
    client: Docker,
    config: SandboxConfig,
    info: RwLock<Option<SandboxInfo>>,
    /// Id of a container that exists, even if `create` did not finish.
    created: RwLock<Option<String>>,
}

impl DockerProvider {
    /// Connect to the daemon named by the settings, `DOCKER_HOST`, or the local socket.
    pub fn connect(settings: &DockerSettings, config: SandboxConfig) -> RunnerResult<Self> {
        let client = match &settings.host {
            Some(host) => Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION)?,
            None => Docker::connect_with_local_defaults()?,
        };
        Ok(Self {
            client,
            config,
            info: RwLock::new(None),
            created: RwLock::new(None),
        })
    }

    /// Static availability check; does not contact the daemon.
    pub fn is_configured(settings: &DockerSettings) -> bool {
        settings.enabled
            && (settings.host.is_some()
                || std::env::var("DOCKER_HOST").map(|h| !h.is_empty()).unwrap_or(false)
                || Path::new(DEFAULT_SOCKET).exists())
    }

    fn container_id(&self) -> RunnerResult<String> {
        self.info
            .read()
            .as_ref()
            .map(|i| i.id.clone())
            .ok_or(RunnerError::NotCreated)
    }

    fn port_key(&self) -> String {
        format!("{}/tcp", self.config.dev_port)
    }

    async fn ensure_image(&self) -> RunnerResult<()> {
        let full_image = self.config.full_image();
        match self.client.inspect_image(&full_image).await {
            Ok(_) => return Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(e.into()),
        }

        info!("Pulling image {}", full_image);
        let options = CreateImageOptions {
            from_image: self.config.image.as_str(),
            tag: self.config.tag.as_str(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => return Err(RunnerError::ImagePullFailed(e.to_string())),
            }
        }
        Ok(())
    }

    async fn published_url(&self, container_id: &str) -> RunnerResult<String> {
        let inspect = self
            .client
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await?;
        let host_port = inspect
            .network_settings
            .and_then(|n| n.ports)
            .and_then(|ports| ports.get(&self.port_key()).cloned().flatten())
            .and_then(|bindings| bindings.into_iter().find_map(|b| b.host_port))
            .ok_or_else(|| {
                RunnerError::CreateFailed(format!(
                    "port {} was not published",
                    self.config.dev_port
                ))
            })?;
        Ok(format!("http://127.0.0.1:{}", host_port))
    }

    /// Start a created container, publish its URL and prepare the workdir.
    async fn start(&self, container_id: &str) -> RunnerResult<SandboxInfo> {
        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;

        let info = SandboxInfo {
            id: container_id.to_string(),
            url: self.published_url(container_id).await?,
            provider: ProviderKind::Docker,
        };
        *self.info.write() = Some(info.clone());

        let mkdir = self
            .exec(&format!("mkdir -p {}", shell_quote(&self.config.workdir)), None)
            .await?;
        if !mkdir.success {
            warn!("Could not create workdir: {}", mkdir.stderr.trim());
        }
        Ok(info)
    }

    /// Run a command through the exec API, optionally feeding stdin.
    async fn exec(&self, command: &str, stdin: Option<&str>) -> RunnerResult<CommandResult> {
        let container_id = self.container_id()?;
        let started = Instant::now();

        let options = CreateExecOptions {
            cmd: Some(vec!["sh", "-c", command]),
            working_dir: Some(self.config.workdir.as_str()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            attach_stdin: Some(stdin.is_some()),
            ..Default::default()
        };
        let exec_id = self.client.create_exec(&container_id, options).await?.id;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, mut input } =
            self.client.start_exec(&exec_id, None).await?
        {
            if let Some(content) = stdin {
                input.write_all(content.as_bytes()).await?;
                input.shutdown().await?;
            }
            drop(input);

            // The exec API multiplexes both streams; flatten them here.
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdIn { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let exit_code = self
            .client
            .inspect_exec(&exec_id)
            .await?
            .exit_code
            .unwrap_or(-1);

        Ok(CommandResult::from_exit(
            stdout,
            stderr,
            exit_code,
            started.elapsed().as_millis() as u64,
        ))
    }
}

#[async_trait]
impl SandboxProvider for DockerProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Docker
    }

    fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn info(&self) -> Option<SandboxInfo> {
        self.info.read().clone()
    }

    async fn create(&self) -> RunnerResult<SandboxInfo> {
        self.client.ping().await?;
        self.ensure_image().await?;

        let name = self.config.container_name();
        debug!("Creating container {} from {}", name, self.config.full_image());

        let port_key = self.port_key();
        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(String::new()),
            }]),
        );
        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key, HashMap::new());

        let env: Vec<String> = self
            .config
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            memory: self.config.memory_limit,
            nano_cpus: self.config.cpu_limit.map(|c| (c * 1_000_000_000.0) as i64),
            auto_remove: Some(false),
            ..Default::default()
        };

        let mut labels = HashMap::new();
        labels.insert("sbx.managed".to_string(), "true".to_string());

        let container_config = Config {
            image: Some(self.config.full_image()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            working_dir: Some(self.config.workdir.clone()),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        let container = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                container_config,
            )
            .await?;

        *self.created.write() = Some(container.id.clone());

        match self.start(&container.id).await {
            Ok(info) => {
                info!("Container {} ready at {}", name, info.url);
                Ok(info)
            }
            Err(e) => {
                if let Err(cleanup) = self.terminate().await {
                    warn!("Could not remove container {}: {}", name, cleanup);
                }
                Err(e)
            }
        }
    }

    async fn run_command(&self, command: &str) -> CommandResult {
        debug!("docker exec: {}", command);
        let limit = self.config.command_timeout_secs;
        match timeout(Duration::from_secs(limit), self.exec(command, None)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => CommandResult::aborted(e.to_string()),
            Err(_) => CommandResult::aborted(RunnerError::Timeout(limit).to_string()),
        }
    }

    async fn write_file(&self, path: &str, content: &str) -> RunnerResult<()> {
        let resolved = self.config.resolve_path(path);
        let script = match parent_dir(&resolved) {
            Some(dir) => format!(
                "mkdir -p {} && cat > {}",
                shell_quote(dir),
                shell_quote(&resolved)
            ),
            None => format!("cat > {}", shell_quote(&resolved)),
        };
        let result = self.exec(&script, Some(content)).await?;
        if result.success {
            Ok(())
        } else {
            Err(RunnerError::FileOperation {
                path: resolved,
                message: result.stderr.trim().to_string(),
            })
        }
    }

    async fn terminate(&self) -> RunnerResult<()> {
        self.info.write().take();
        let Some(container_id) = self.created.write().take() else {
            return Ok(());
        };
        info!("Removing container {}", container_id);
        self.client
            .remove_container(
                &container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        let Ok(container_id) = self.container_id() else {
            return false;
        };
        match self
            .client
            .inspect_container(&container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect.state.and_then(|s| s.running).unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_docker_is_not_configured() {
        let settings = DockerSettings {
            enabled: false,
            host: Some("tcp://127.0.0.1:2375".to_string()),
        };
        assert!(!DockerProvider::is_configured(&settings));
    }

    #[test]
    fn test_explicit_host_is_configured() {
        let settings = DockerSettings {
            enabled: true,
            host: Some("tcp://127.0.0.1:2375".to_string()),
        };
        assert!(DockerProvider::is_configured(&settings));
    }

    #[tokio::test]
    async fn test_terminate_without_container_is_noop() {
        let settings = DockerSettings {
            enabled: true,
            host: Some("tcp://127.0.0.1:1".to_string()),
        };
        let provider = DockerProvider::connect(&settings, SandboxConfig::default()).unwrap();
        assert!(provider.info().is_none());
        provider.terminate().await.unwrap();
        assert!(!provider.is_alive().await);
    }
}
