//! CLI-based sandbox provider supporting Docker and Podman.
//!
//! Drives the container runtime through its command-line client, with
//! automatic runtime detection (Docker first, then Podman).

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{CliSettings, ProviderKind, SandboxConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::provider::{parent_dir, shell_quote, CommandResult, SandboxInfo, SandboxProvider};

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    Docker,
    Podman,
}

impl ContainerRuntime {
    /// Get the CLI command name.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    /// Locate the runtime binary on `PATH`.
    pub fn find_on_path(&self) -> Option<PathBuf> {
        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .map(|dir| dir.join(self.command()))
            .find(|candidate| candidate.is_file())
    }
}

impl std::fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command())
    }
}

/// Container-CLI-backed sandbox.
pub struct CliProvider {
    runtime: ContainerRuntime,
    program: PathBuf,
    config: SandboxConfig,
    info: RwLock<Option<SandboxInfo>>,
    /// Name of a container that may exist, even if `create` did not finish.
    created: RwLock<Option<String>>,
}

impl CliProvider {
    /// Create a provider for a specific runtime.
    pub fn with_runtime(runtime: ContainerRuntime, config: SandboxConfig) -> Self {
        Self {
            runtime,
            program: PathBuf::from(runtime.command()),
            config,
            info: RwLock::new(None),
            created: RwLock::new(None),
        }
    }

    /// Invoke a specific client binary instead of the one on `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Create a provider using the configured or detected runtime.
    pub fn from_settings(settings: &CliSettings, config: SandboxConfig) -> RunnerResult<Self> {
        let runtime = Self::detect_runtime(settings)?;
        info!("Using container runtime: {}", runtime);
        Ok(Self::with_runtime(runtime, config))
    }

    /// Static availability check: a usable runtime binary is on `PATH`.
    pub fn is_configured(settings: &CliSettings) -> bool {
        settings.enabled && Self::detect_runtime(settings).is_ok()
    }

    /// Pick the runtime: preferred one if present, then Docker, then Podman.
    pub fn detect_runtime(settings: &CliSettings) -> RunnerResult<ContainerRuntime> {
        if let Some(preferred) = settings.runtime {
            if preferred.find_on_path().is_some() {
                return Ok(preferred);
            }
            warn!(
                "Preferred runtime {} not available, trying alternatives",
                preferred
            );
        }

        [ContainerRuntime::Docker, ContainerRuntime::Podman]
            .into_iter()
            .find(|r| r.find_on_path().is_some())
            .ok_or_else(|| RunnerError::NotConfigured {
                provider: ProviderKind::Cli.to_string(),
                reason: "neither docker nor podman found on PATH".to_string(),
            })
    }

    /// Get the current runtime.
    pub fn runtime(&self) -> ContainerRuntime {
        self.runtime
    }

    fn container_name(&self) -> RunnerResult<String> {
        self.info
            .read()
            .as_ref()
            .map(|i| i.id.clone())
            .ok_or(RunnerError::NotCreated)
    }

    /// Build the `run` arguments for a detached sandbox container.
    fn build_run_args(&self, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--label".to_string(),
            "sbx.managed=true".to_string(),
            "-p".to_string(),
            format!("127.0.0.1::{}", self.config.dev_port),
            "-w".to_string(),
            self.config.workdir.clone(),
        ];

        let mut env: Vec<_> = self.config.env.iter().collect();
        env.sort();
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        if let Some(memory) = self.config.memory_limit {
            args.push("-m".to_string());
            args.push(format!("{}b", memory));
        }

        if let Some(cpus) = self.config.cpu_limit {
            args.push("--cpus".to_string());
            args.push(format!("{:.2}", cpus));
        }

        args.push(self.config.full_image());
        args.push("sleep".to_string());
        args.push("infinity".to_string());
        args
    }

    /// Format command for logging.
    fn format_command(&self, args: &[String]) -> String {
        let mut cmd = self.runtime.command().to_string();
        for arg in args {
            cmd.push(' ');
            cmd.push_str(&shell_quote(arg));
        }
        cmd
    }

    /// Run the runtime client with a timeout, optionally feeding stdin.
    async fn invoke(&self, args: &[String], stdin: Option<&str>) -> RunnerResult<CommandResult> {
        debug!("Executing: {}", self.format_command(args));
        let started = Instant::now();

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let (Some(content), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(content.as_bytes()).await?;
            pipe.shutdown().await?;
        }

        let limit = self.config.command_timeout_secs;
        let output = match timeout(Duration::from_secs(limit), child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => return Err(RunnerError::Timeout(limit)),
        };

        Ok(CommandResult::from_exit(
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
            output.status.code().unwrap_or(-1) as i64,
            started.elapsed().as_millis() as u64,
        ))
    }

    /// Start the container and resolve its published dev port.
    async fn start(&self, name: &str) -> RunnerResult<SandboxInfo> {
        let run = self.invoke(&self.build_run_args(name), None).await?;
        if !run.success {
            return Err(RunnerError::CreateFailed(format!(
                "{} run failed: {}",
                self.runtime,
                run.stderr.trim()
            )));
        }

        let port_args = vec![
            "port".to_string(),
            name.to_string(),
            format!("{}/tcp", self.config.dev_port),
        ];
        let port = self.invoke(&port_args, None).await?;
        let host_port = match parse_host_port(&port.stdout) {
            Some(p) if port.success => p,
            _ => {
                return Err(RunnerError::CreateFailed(format!(
                    "could not resolve published port: {}",
                    port.combined_output().trim()
                )))
            }
        };

        Ok(SandboxInfo {
            id: name.to_string(),
            url: format!("http://127.0.0.1:{}", host_port),
            provider: ProviderKind::Cli,
        })
    }

    fn exec_args(&self, name: &str, command: &str, interactive: bool) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if interactive {
            args.push("-i".to_string());
        }
        args.extend([
            "-w".to_string(),
            self.config.workdir.clone(),
            name.to_string(),
            "sh".to_string(),
            "-c".to_string(),
            command.to_string(),
        ]);
        args
    }
}

/// Parse `docker port` output such as `127.0.0.1:49153` or `[::]:49153`.
fn parse_host_port(output: &str) -> Option<u16> {
    output
        .lines()
        .filter_map(|line| line.trim().rsplit(':').next())
        .find_map(|port| port.trim().parse().ok())
}

#[async_trait]
impl SandboxProvider for CliProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Cli
    }

    fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn info(&self) -> Option<SandboxInfo> {
        self.info.read().clone()
    }

    async fn create(&self) -> RunnerResult<SandboxInfo> {
        let name = self.config.container_name();
        // `run -d` can start the container even when the client call times out.
        *self.created.write() = Some(name.clone());

        match self.start(&name).await {
            Ok(info) => {
                *self.info.write() = Some(info.clone());
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
        let name = match self.container_name() {
            Ok(name) => name,
            Err(e) => return CommandResult::aborted(e.to_string()),
        };
        match self.invoke(&self.exec_args(&name, command, false), None).await {
            Ok(result) => result,
            Err(e) => CommandResult::aborted(e.to_string()),
        }
    }

    async fn write_file(&self, path: &str, content: &str) -> RunnerResult<()> {
        let name = self.container_name()?;
        let resolved = self.config.resolve_path(path);
        let script = match parent_dir(&resolved) {
            Some(dir) => format!(
                "mkdir -p {} && cat > {}",
                shell_quote(dir),
                shell_quote(&resolved)
            ),
            None => format!("cat > {}", shell_quote(&resolved)),
        };
        let result = self
            .invoke(&self.exec_args(&name, &script, true), Some(content))
            .await?;
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
        let Some(name) = self.created.write().take() else {
            return Ok(());
        };
        info!("Removing container {}", name);
        let result = self
            .invoke(&["rm".to_string(), "-f".to_string(), name], None)
            .await?;
        if !result.success {
            warn!("{} rm failed: {}", self.runtime, result.stderr.trim());
        }
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        let Ok(name) = self.container_name() else {
            return false;
        };
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Running}}".to_string(),
            name,
        ];
        match self.invoke(&args, None).await {
            Ok(result) => result.success && result.stdout.trim() == "true",
            Err(_) => false,
        }
    }
}
