//! Classify command - Classify error output the way the pipeline does.

use anyhow::Result;
use clap::Args;
use sbx_core::{prioritize_errors, ClassifiedError, ErrorClassifier};

use super::GlobalArgs;

#[derive(Args)]
pub struct ClassifyArgs {
    /// Error message; several arguments are joined with spaces
    #[arg(required = true)]
    pub message: Vec<String>,

    /// Classify every non-empty line separately
    #[arg(long)]
    pub lines: bool,
}

pub async fn execute(args: ClassifyArgs, globals: &GlobalArgs) -> Result<()> {
    let errors = classify(&args);

    if globals.json {
        println!("{}", serde_json::to_string_pretty(&errors)?);
    } else {
        for error in &errors {
            println!("{}", render(error));
        }
    }
    Ok(())
}

fn classify(args: &ClassifyArgs) -> Vec<ClassifiedError> {
    let classifier = ErrorClassifier::new();
    let message = args.message.join(" ");
    if args.lines {
        let lines: Vec<&str> = message.lines().filter(|l| !l.trim().is_empty()).collect();
        prioritize_errors(&classifier.classify_all(&lines))
    } else {
        vec![classifier.classify(&message)]
    }
}

fn render(error: &ClassifiedError) -> String {
    let mut out = format!("[{}/{}] {}", error.category, error.fixable, error.message);
    if let Some(suggestion) = &error.suggestion {
        out.push_str(&format!("\n   → {}", suggestion));
    }
    out
}
