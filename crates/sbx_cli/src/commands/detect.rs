//! Detect command - List npm packages a source file imports.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use sbx_core::PackageDetector;

use super::{read_source, GlobalArgs};

#[derive(Args)]
pub struct DetectArgs {
    /// Source file to scan
    pub file: PathBuf,
}

pub async fn execute(args: DetectArgs, globals: &GlobalArgs) -> Result<()> {
    let source = read_source(&args.file)?;
    let packages = PackageDetector::new().detect(&source);

    if globals.json {
        println!("{}", serde_json::to_string_pretty(&packages)?);
    } else if packages.is_empty() {
        println!("No packages to install");
    } else {
        println!("📦 {} package(s) to install:", packages.len());
        for package in &packages {
            println!("   - {}", package);
        }
    }
    Ok(())
}
