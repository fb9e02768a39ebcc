//! sbx CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Configuration error
//! - 3: Validation failure

use std::process::ExitCode;

use clap::Parser;
use sbx_core::CoreError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands, ValidationFailed};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const CONFIG_ERROR: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "sbx=debug,warn" } else { "sbx=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact().with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }

    let globals = cli.globals();
    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, &globals).await,
        Commands::Retry(args) => commands::retry::execute(args, &globals).await,
        Commands::Status(args) => commands::status::execute(args, &globals).await,
        Commands::Detect(args) => commands::detect::execute(args, &globals).await,
        Commands::Classify(args) => commands::classify::execute(args, &globals).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    if e.downcast_ref::<ValidationFailed>().is_some() {
        return ExitCodes::VALIDATION_FAILURE;
    }
    if let Some(core) = e.downcast_ref::<CoreError>() {
        if core.is_configuration() {
            return ExitCodes::CONFIG_ERROR;
        }
    }
    if e.downcast_ref::<sbx_runner::RunnerError>()
        .is_some_and(|r| r.is_configuration())
    {
        return ExitCodes::CONFIG_ERROR;
    }
    ExitCodes::GENERAL_ERROR
}
