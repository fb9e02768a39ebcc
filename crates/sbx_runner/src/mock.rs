//! Mock sandbox provider for testing.
//!
//! Provides a scriptable implementation of the [`SandboxProvider`] trait with
//! an in-memory file system, for use in tests without Docker or Podman.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::config::{ProviderKind, SandboxConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::provider::{CommandResult, SandboxInfo, SandboxProvider};

/// Captured call information for verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedCall {
    pub method: String,
    pub argument: Option<String>,
}

/// Scripted responses for commands containing a given substring.
///
/// Responses are consumed in order; the last one repeats once the script is
/// exhausted.
#[derive(Debug, Clone)]
struct CommandScript {
    pattern: String,
    responses: Vec<CommandResult>,
    served: usize,
}

impl CommandScript {
    fn next(&mut self) -> CommandResult {
        let index = self.served.min(self.responses.len().saturating_sub(1));
        self.served += 1;
        self.responses
            .get(index)
            .cloned()
            .unwrap_or_else(|| CommandResult::ok(""))
    }
}

/// Mock sandbox provider.
///
/// Clones share state, so a test can keep one handle while the code under
/// test owns another.
#[derive(Clone)]
pub struct MockProvider {
    config: SandboxConfig,
    files: Arc<RwLock<BTreeMap<String, String>>>,
    scripts: Arc<RwLock<Vec<CommandScript>>>,
    calls: Arc<RwLock<Vec<CapturedCall>>>,
    info: Arc<RwLock<Option<SandboxInfo>>>,
    create_failure: Arc<RwLock<Option<String>>>,
    url: Arc<RwLock<String>>,
    alive: Arc<AtomicBool>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a new mock provider.
    pub fn new() -> Self {
        Self::with_config(SandboxConfig::default())
    }

    pub fn with_config(config: SandboxConfig) -> Self {
        Self {
            config,
            files: Arc::new(RwLock::new(BTreeMap::new())),
            scripts: Arc::new(RwLock::new(Vec::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            info: Arc::new(RwLock::new(None)),
            create_failure: Arc::new(RwLock::new(None)),
            url: Arc::new(RwLock::new("http://127.0.0.1:5173".to_string())),
            alive: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Script the response for every command containing `pattern`.
    pub fn on_command(self, pattern: impl Into<String>, response: CommandResult) -> Self {
        self.on_command_seq(pattern, vec![response])
    }

    /// Script a sequence of responses for commands containing `pattern`.
    pub fn on_command_seq(self, pattern: impl Into<String>, responses: Vec<CommandResult>) -> Self {
        self.scripts.write().push(CommandScript {
            pattern: pattern.into(),
            responses,
            served: 0,
        });
        self
    }

    /// Make `create` fail with the given message.
    pub fn fail_create(self, message: impl Into<String>) -> Self {
        *self.create_failure.write() = Some(message.into());
        self
    }

    /// Set the URL reported on creation.
    pub fn url(self, url: impl Into<String>) -> Self {
        *self.url.write() = url.into();
        self
    }

    /// Seed a file.
    pub fn with_file(self, path: &str, content: impl Into<String>) -> Self {
        let resolved = self.config.resolve_path(path);
        self.files.write().insert(resolved, content.into());
        self
    }

    /// Current content of a file, if present.
    pub fn file(&self, path: &str) -> Option<String> {
        self.files.read().get(&self.config.resolve_path(path)).cloned()
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.calls.read().clone()
    }

    /// Check if a specific method was called.
    pub fn was_called(&self, method: &str) -> bool {
        self.calls.read().iter().any(|c| c.method == method)
    }

    /// Get calls to a specific method.
    pub fn get_method_calls(&self, method: &str) -> Vec<CapturedCall> {
        self.calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    /// Commands passed to `run_command`, in order.
    pub fn commands(&self) -> Vec<String> {
        self.get_method_calls("run_command")
            .into_iter()
            .filter_map(|c| c.argument)
            .collect()
    }

    /// Number of commands containing `pattern`.
    pub fn command_count(&self, pattern: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(pattern)).count()
    }

    fn record(&self, method: &str, argument: Option<String>) {
        self.calls.write().push(CapturedCall {
            method: method.to_string(),
            argument,
        });
    }
}

#[async_trait]
impl SandboxProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn info(&self) -> Option<SandboxInfo> {
        self.info.read().clone()
    }

    async fn create(&self) -> RunnerResult<SandboxInfo> {
        self.record("create", None);
        if let Some(msg) = self.create_failure.read().clone() {
            return Err(RunnerError::CreateFailed(msg));
        }
        let info = SandboxInfo {
            id: format!("mock-{}", uuid::Uuid::new_v4()),
            url: self.url.read().clone(),
            provider: ProviderKind::Mock,
        };
        *self.info.write() = Some(info.clone());
        self.alive.store(true, Ordering::SeqCst);
        Ok(info)
    }

    async fn run_command(&self, command: &str) -> CommandResult {
        self.record("run_command", Some(command.to_string()));
        if !self.alive.load(Ordering::SeqCst) {
            return CommandResult::aborted("sandbox is not running");
        }
        let mut scripts = self.scripts.write();
        match scripts.iter_mut().find(|s| command.contains(&s.pattern)) {
            Some(script) => script.next(),
            None => CommandResult::ok(""),
        }
    }

    async fn write_file(&self, path: &str, content: &str) -> RunnerResult<()> {
        let resolved = self.config.resolve_path(path);
        self.record("write_file", Some(resolved.clone()));
        if !self.alive.load(Ordering::SeqCst) {
            return Err(RunnerError::NotCreated);
        }
        self.files.write().insert(resolved, content.to_string());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> RunnerResult<String> {
        let resolved = self.config.resolve_path(path);
        self.record("read_file", Some(resolved.clone()));
        self.files
            .read()
            .get(&resolved)
            .cloned()
            .ok_or_else(|| RunnerError::FileOperation {
                path: resolved,
                message: "No such file or directory".to_string(),
            })
    }

    async fn list_files(&self, dir: &str) -> RunnerResult<Vec<String>> {
        let resolved = self.config.resolve_path(dir);
        self.record("list_files", Some(resolved.clone()));
        let prefix = format!("{}/", resolved.trim_end_matches('/'));
        Ok(self
            .files
            .read()
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn terminate(&self) -> RunnerResult<()> {
        self.record("terminate", None);
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_lifecycle() {
        let provider = MockProvider::new().url("http://127.0.0.1:9999");
        assert!(!provider.is_alive().await);

        let info = provider.create().await.unwrap();
        assert_eq!(info.url, "http://127.0.0.1:9999");
        assert_eq!(info.provider, ProviderKind::Mock);
        assert!(provider.is_alive().await);

        provider.terminate().await.unwrap();
        assert!(!provider.is_alive().await);
        assert!(provider.was_called("terminate"));
    }

    #[tokio::test]
    async fn test_mock_provider_scripted_commands() {
        let provider = MockProvider::new().on_command_seq(
            "npm run build",
            vec![
                CommandResult::failed(1, "first"),
                CommandResult::ok("second"),
            ],
        );
        provider.create().await.unwrap();

        assert_eq!(provider.run_command("npm run build").await.stderr, "first");
        assert_eq!(provider.run_command("npm run build").await.stdout, "second");
        // Last response repeats.
        assert_eq!(provider.run_command("npm run build").await.stdout, "second");
        assert!(provider.run_command("ls").await.success);
        assert_eq!(provider.command_count("npm run build"), 3);
    }

    #[tokio::test]
    async fn test_mock_provider_files() {
        let provider = MockProvider::new().with_file("package.json", "{}");
        provider.create().await.unwrap();

        provider.write_file("src/App.jsx", "export default 1").await.unwrap();
        assert_eq!(provider.read_file("/app/src/App.jsx").await.unwrap(), "export default 1");
        assert_eq!(provider.file("package.json").as_deref(), Some("{}"));

        let files = provider.list_files("src").await.unwrap();
        assert_eq!(files, vec!["/app/src/App.jsx".to_string()]);
        assert!(provider.read_file("missing.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_provider_create_failure() {
        let provider = MockProvider::new().fail_create("quota exceeded");
        let err = provider.create().await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert!(!provider.run_command("ls").await.success);
    }

    #[tokio::test]
    async fn test_mock_provider_dev_server_uses_commands() {
        let provider = MockProvider::new();
        provider.create().await.unwrap();
        provider.start_dev_server().await.unwrap();
        provider.restart_dev_server().await.unwrap();
        assert_eq!(provider.command_count("npm run dev"), 2);
        assert_eq!(provider.command_count("kill"), 1);
        assert_eq!(provider.command_count("npm run dev -- --host 0.0.0.0 --port 5173 "), 2);
    }
}
