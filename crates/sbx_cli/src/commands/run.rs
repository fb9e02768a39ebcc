//! Run command - Provision, validate and repair a generated app.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use sbx_runner::ProviderPreference;
use tracing::info;

use super::{build_orchestrator, ctrl_c_token, finish, read_source, GlobalArgs};

#[derive(Args)]
pub struct RunArgs {
    /// Tool the generation belongs to
    #[arg(short, long)]
    pub tool: String,

    /// Generation attempt identifier
    #[arg(short, long)]
    pub generation: String,

    /// Generated component source (becomes src/App.jsx)
    #[arg(short, long)]
    pub source: PathBuf,

    /// Provider to try first: auto, docker or cli
    #[arg(short, long, value_parser = parse_provider)]
    pub provider: Option<ProviderPreference>,

    /// Keep a ready sandbox running until it expires or Ctrl-C
    #[arg(long)]
    pub hold: bool,
}

/// The mock driver is never registered outside tests.
fn parse_provider(value: &str) -> Result<ProviderPreference, String> {
    match value.parse()? {
        ProviderPreference::Mock => Err("the mock provider is not available here; use auto, docker or cli".to_string()),
        preference => Ok(preference),
    }
}

pub async fn execute(args: RunArgs, globals: &GlobalArgs) -> Result<()> {
    let source = read_source(&args.source)?;
    let mut settings = globals.settings()?;
    if let Some(preference) = args.provider {
        settings.providers.preference = preference;
    }

    info!(
        "Running pipeline for tool {} generation {} ({} lines)",
        args.tool,
        args.generation,
        source.lines().count()
    );

    let orchestrator = build_orchestrator(settings, globals.file_store()?);
    let cancel = ctrl_c_token();
    let run = orchestrator
        .run_pipeline_with_cancel(&args.tool, &args.generation, &source, cancel.clone())
        .await;

    finish(run, args.hold, globals, cancel).await
}
