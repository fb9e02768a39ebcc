//! Sandbox provider contract and shared driver behavior.
//!
//! Every driver normalizes its output to plain strings before returning; a
//! failed command is a [`CommandResult`] with `success == false`, never an
//! error.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ProviderKind, SandboxConfig};
use crate::error::{RunnerError, RunnerResult};

const DEV_LOG: &str = "/tmp/sbx-dev.log";
const DEV_PID: &str = "/tmp/sbx-dev.pid";

/// Result of a command executed inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub success: bool,
    pub duration_ms: u64,
}

impl CommandResult {
    /// Build a result from a finished process.
    pub fn from_exit(
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: i64,
        duration_ms: u64,
    ) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            success: exit_code == 0,
            duration_ms,
        }
    }

    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::from_exit(stdout, String::new(), 0, 0)
    }

    /// A failed command with the given exit code and stderr.
    pub fn failed(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self::from_exit(String::new(), stderr, exit_code, 0)
    }

    /// The command never ran or never finished (transport error, timeout).
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::from_exit(String::new(), message, -1, 0)
    }

    /// Get combined output (stdout + stderr).
    pub fn combined_output(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Identity of a created sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxInfo {
    /// Provider-native identifier (container id, name, ...)
    pub id: String,
    /// Public URL of the dev server
    pub url: String,
    pub provider: ProviderKind,
}

/// Capability set of one sandbox driver.
///
/// One provider value backs exactly one sandbox. Commands are executed one at
/// a time by the owner; drivers do not need to be safe under concurrent
/// command execution.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Which driver this is.
    fn kind(&self) -> ProviderKind;

    /// Configuration the sandbox was created with.
    fn config(&self) -> &SandboxConfig;

    /// Identity of the sandbox once created.
    fn info(&self) -> Option<SandboxInfo>;

    /// Allocate the remote resource.
    async fn create(&self) -> RunnerResult<SandboxInfo>;

    /// Run a shell command in the working directory.
    async fn run_command(&self, command: &str) -> CommandResult;

    /// Write a file, creating parent directories.
    async fn write_file(&self, path: &str, content: &str) -> RunnerResult<()>;

    /// Release the remote resource.
    async fn terminate(&self) -> RunnerResult<()>;

    /// Whether the sandbox is still running.
    async fn is_alive(&self) -> bool;

    /// Read a file.
    async fn read_file(&self, path: &str) -> RunnerResult<String> {
        let resolved = self.config().resolve_path(path);
        let result = self.run_command(&format!("cat {}", shell_quote(&resolved))).await;
        if result.success {
            Ok(result.stdout)
        } else {
            Err(RunnerError::FileOperation {
                path: resolved,
                message: result.stderr.trim().to_string(),
            })
        }
    }

    /// List regular files below a directory, skipping `node_modules`.
    async fn list_files(&self, dir: &str) -> RunnerResult<Vec<String>> {
        let resolved = self.config().resolve_path(dir);
        let result = self
            .run_command(&format!(
                "find {} -type f -not -path '*/node_modules/*'",
                shell_quote(&resolved)
            ))
            .await;
        if !result.success {
            return Err(RunnerError::FileOperation {
                path: resolved,
                message: result.stderr.trim().to_string(),
            });
        }
        let mut files: Vec<String> = result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        files.sort();
        Ok(files)
    }

    /// Install runtime dependencies.
    async fn install_packages(&self, packages: &[String]) -> CommandResult {
        if packages.is_empty() {
            return CommandResult::ok("");
        }
        info!("Installing packages: {}", packages.join(", "));
        self.run_command(&npm_install_command(packages, false)).await
    }

    /// Install development dependencies.
    async fn install_dev_packages(&self, packages: &[String]) -> CommandResult {
        if packages.is_empty() {
            return CommandResult::ok("");
        }
        info!("Installing dev packages: {}", packages.join(", "));
        self.run_command(&npm_install_command(packages, true)).await
    }

    /// Start the dev server in the background and wait until it answers.
    async fn start_dev_server(&self) -> RunnerResult<()> {
        let port = self.config().dev_port;
        let launch = format!(
            "nohup npm run dev -- --host 0.0.0.0 --port {port} > {DEV_LOG} 2>&1 & echo $! > {DEV_PID}"
        );
        let result = self.run_command(&launch).await;
        if !result.success {
            return Err(RunnerError::DevServer(result.combined_output()));
        }
        wait_for_dev_server(self, self.config().dev_server_wait_secs).await
    }

    /// Stop the running dev server (if any) and start it again.
    async fn restart_dev_server(&self) -> RunnerResult<()> {
        let stop = format!(
            "if [ -f {DEV_PID} ]; then kill $(cat {DEV_PID}) 2>/dev/null; rm -f {DEV_PID}; fi; true"
        );
        let result = self.run_command(&stop).await;
        if !result.success {
            warn!("Stopping dev server failed: {}", result.stderr.trim());
        }
        self.start_dev_server().await
    }
}

/// Poll the dev server port from inside the sandbox, one probe per second.
async fn wait_for_dev_server<P: SandboxProvider + ?Sized>(
    provider: &P,
    max_wait_secs: u64,
) -> RunnerResult<()> {
    let port = provider.config().dev_port;
    let probe = format!(
        "node -e \"fetch('http://127.0.0.1:{port}').then(r=>process.exit(r.status<500?0:1)).catch(()=>process.exit(1))\""
    );
    let attempts = max_wait_secs.max(1);

    for attempt in 1..=attempts {
        if provider.run_command(&probe).await.success {
            debug!("Dev server answered after {} probe(s)", attempt);
            return Ok(());
        }
        if attempt < attempts {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    let log = provider
        .run_command(&format!("tail -n 20 {DEV_LOG}"))
        .await
        .stdout;
    Err(RunnerError::DevServer(format!(
        "no response on port {} after {}s\n{}",
        port, attempts, log
    )))
}

fn npm_install_command(packages: &[String], dev: bool) -> String {
    let names: Vec<String> = packages.iter().map(|p| shell_quote(p)).collect();
    format!(
        "npm install --no-audit --no-fund --loglevel=error{} {}",
        if dev { " --save-dev" } else { "" },
        names.join(" ")
    )
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Parent directory of an absolute sandbox path.
pub(crate) fn parent_dir(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&path[..idx]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_result_success_tracks_exit_code() {
        assert!(CommandResult::from_exit("out", "", 0, 10).success);
        assert!(!CommandResult::from_exit("", "err", 2, 10).success);
        let aborted = CommandResult::aborted("connection reset");
        assert!(!aborted.success);
        assert_eq!(aborted.exit_code, -1);
        assert_eq!(aborted.stderr, "connection reset");
    }

    #[test]
    fn test_combined_output() {
        assert_eq!(CommandResult::ok("a").combined_output(), "a");
        assert_eq!(CommandResult::failed(1, "b").combined_output(), "b");
        let both = CommandResult::from_exit("a", "b", 1, 0);
        assert_eq!(both.combined_output(), "a\nb");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("left-pad"), "left-pad");
        assert_eq!(shell_quote("@scope/pkg"), "@scope/pkg");
        assert_eq!(shell_quote("/app/src/App.jsx"), "/app/src/App.jsx");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_npm_install_command() {
        let cmd = npm_install_command(&["left-pad".to_string(), "@scope/x".to_string()], false);
        assert_eq!(
            cmd,
            "npm install --no-audit --no-fund --loglevel=error left-pad @scope/x"
        );
        let dev = npm_install_command(&["vitest".to_string()], true);
        assert!(dev.contains("--save-dev vitest"));
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/app/src/App.jsx"), Some("/app/src"));
        assert_eq!(parent_dir("/file"), None);
        assert_eq!(parent_dir("file"), None);
    }
}
