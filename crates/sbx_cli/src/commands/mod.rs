//! CLI command definitions.
//!
//! Each subcommand maps to one inbound entrypoint of the pipeline or to an
//! offline diagnostic.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sbx_core::{CoreError, FileStore, Orchestrator, PipelineResult, PipelineRun, PipelineSettings};
use sbx_llm::LlmAdapter;
use sbx_runner::ProviderPreference;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod classify;
pub mod detect;
pub mod retry;
pub mod run;
pub mod status;

/// sbx - sandbox validation and repair for generated apps
#[derive(Parser)]
#[command(name = "sbx")]
#[command(version, about = "sbx - provision, validate and repair generated apps in sandboxes")]
#[command(long_about = r#"
sbx runs a generated React component inside a disposable sandbox, builds it,
probes it over HTTP, smoke tests it, and repairs what it can.

COMMANDS:
  run       → Provision a sandbox for a generation and validate it
  retry     → Re-run a failed or terminated sandbox with the latest source
  status    → Show one sandbox record, or list all of them
  detect    → List the npm packages a source file imports
  classify  → Classify an error message the way the pipeline does

EXIT CODES:
  0 - Success
  1 - General error
  2 - Configuration error
  3 - Validation failure
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Pipeline settings file (TOML or YAML); defaults to ./sbx.toml or ./sbx.yaml
    #[arg(short, long, global = true, env = "SBX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory that holds the .sbx record store; defaults to the current directory
    #[arg(long, global = true, env = "SBX_STORE")]
    pub store: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn globals(&self) -> GlobalArgs {
        GlobalArgs {
            config: self.config.clone(),
            store: self.store.clone(),
            json: self.json,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision, validate and repair a generated app
    Run(run::RunArgs),

    /// Retry a sandbox that ended failed or terminated
    Retry(retry::RetryArgs),

    /// Show sandbox records
    Status(status::StatusArgs),

    /// Detect npm packages imported by a source file
    Detect(detect::DetectArgs),

    /// Classify an error message
    Classify(classify::ClassifyArgs),
}

/// Options shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub store: Option<PathBuf>,
    pub json: bool,
}

impl GlobalArgs {
    /// Explicit `--config`, else discovery in the current directory, then env overrides.
    pub fn settings(&self) -> Result<PipelineSettings> {
        let settings = match &self.config {
            Some(path) => PipelineSettings::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => PipelineSettings::discover(&std::env::current_dir()?)?,
        }
        .with_env_overrides();

        // Only the Docker and CLI drivers are registered by the binary.
        if settings.providers.preference == ProviderPreference::Mock {
            return Err(CoreError::Config(
                "provider preference 'mock' is not available; use auto, docker or cli".to_string(),
            )
            .into());
        }
        Ok(settings)
    }

    pub fn store_root(&self) -> Result<PathBuf> {
        match &self.store {
            Some(path) => Ok(path.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    pub fn file_store(&self) -> Result<Arc<FileStore>> {
        Ok(Arc::new(FileStore::new(self.store_root()?)))
    }
}

/// A run finished without reaching `ready`.
#[derive(Debug, Error)]
#[error("Validation failed: {0}")]
pub struct ValidationFailed(pub String);

/// Wire the orchestrator to the file store and, when keys are present, an LLM.
pub fn build_orchestrator(settings: PipelineSettings, store: Arc<FileStore>) -> Orchestrator {
    let orchestrator = Orchestrator::new(settings, store);
    match LlmAdapter::from_env() {
        Ok(adapter) => {
            info!("AI repair enabled ({} {})", adapter.provider(), adapter.model());
            orchestrator.with_generator(Arc::new(adapter))
        }
        Err(e) => {
            info!("AI repair disabled: {}", e);
            orchestrator
        }
    }
}

/// Token cancelled on Ctrl-C.
pub fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, shutting down sandbox");
            trigger.cancel();
        }
    });
    token
}

/// Report a run and either hold or release its sandbox.
pub async fn finish(run: PipelineRun, hold: bool, globals: &GlobalArgs, cancel: CancellationToken) -> Result<()> {
    let PipelineRun { result, lease } = run;

    if globals.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if let Some(lease) = lease {
        if hold {
            println!("⏳ Holding sandbox until {} (Ctrl-C to stop)", lease.expires_at().to_rfc3339());
            lease.hold(cancel).await?;
        } else {
            lease.terminate().await?;
        }
    }

    if result.success {
        return Ok(());
    }
    let error = result.error.unwrap_or_else(|| "unknown error".to_string());
    if !result.can_retry {
        return Err(CoreError::Config(error).into());
    }
    Err(ValidationFailed(error).into())
}

fn print_result(result: &PipelineResult) {
    if result.success {
        println!("✅ Sandbox {} is ready", result.sandbox_id);
        if let Some(url) = &result.sandbox_url {
            println!("   URL: {}", url);
        }
    } else {
        println!("❌ Sandbox {} failed", result.sandbox_id);
        if let Some(message) = &result.user_message {
            println!("   {}", message);
        }
        if let Some(error) = &result.error {
            println!("   Error: {}", error);
        }
        if result.can_retry {
            println!("   Retry with: sbx retry {}", result.sandbox_id);
        }
    }
    println!("   Took {:.1}s", result.duration_ms as f64 / 1000.0);
}

/// Read a source file, refusing empty ones.
pub fn read_source(path: &Path) -> Result<String> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read source file {}", path.display()))?;
    if source.trim().is_empty() {
        anyhow::bail!("Source file {} is empty", path.display());
    }
    Ok(source)
}
