//! Retry command - Re-run a finished sandbox.

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use super::{build_orchestrator, ctrl_c_token, finish, GlobalArgs};

#[derive(Args)]
pub struct RetryArgs {
    /// Sandbox record to retry
    pub sandbox_id: String,

    /// Keep a ready sandbox running until it expires or Ctrl-C
    #[arg(long)]
    pub hold: bool,
}

pub async fn execute(args: RetryArgs, globals: &GlobalArgs) -> Result<()> {
    info!("Retrying sandbox {}", args.sandbox_id);

    let orchestrator = build_orchestrator(globals.settings()?, globals.file_store()?);
    let cancel = ctrl_c_token();
    let run = orchestrator
        .retry_sandbox_with_cancel(&args.sandbox_id, cancel.clone())
        .await
        .with_context(|| format!("Cannot retry sandbox {}", args.sandbox_id))?;

    finish(run, args.hold, globals, cancel).await
}
