//! Status command - Show sandbox records.

use anyhow::Result;
use clap::Args;
use sbx_core::{SandboxRecord, SandboxStore};

use super::GlobalArgs;

#[derive(Args)]
pub struct StatusArgs {
    /// Sandbox to show; lists every record when omitted
    pub id: Option<String>,

    /// Only list records for this tool
    #[arg(short, long)]
    pub tool: Option<String>,
}

pub async fn execute(args: StatusArgs, globals: &GlobalArgs) -> Result<()> {
    let store = globals.file_store()?;

    if let Some(id) = &args.id {
        let record = store.get(id).await?;
        if globals.json {
            println!("{}", serde_json::to_string_pretty(&record)?);
        } else {
            println!("{}", render_record(&record));
        }
        return Ok(());
    }

    let records: Vec<SandboxRecord> = store
        .list()
        .await?
        .into_iter()
        .filter(|r| args.tool.as_ref().map_or(true, |t| &r.tool_id == t))
        .collect();

    if globals.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if records.is_empty() {
        println!("No sandboxes recorded in {}", store.root().display());
    } else {
        for record in &records {
            println!("{}", render_line(record));
        }
    }
    Ok(())
}

fn render_line(record: &SandboxRecord) -> String {
    format!(
        "{:<36}  {:<20}  {:<12}  retries {}/{}  {}",
        record.id,
        record.tool_id,
        record.status,
        record.retry_count,
        record.max_retries,
        record.updated_at.format("%Y-%m-%d %H:%M:%S")
    )
}

fn flag(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "passed",
        Some(false) => "failed",
        None => "-",
    }
}

fn render_record(record: &SandboxRecord) -> String {
    let mut lines = vec![
        format!("Sandbox:     {}", record.id),
        format!("Tool:        {} (generation {})", record.tool_id, record.generation_id),
        format!("Status:      {}", record.status),
        format!(
            "Provider:    {}",
            record.provider.map(|p| p.to_string()).unwrap_or_else(|| "-".into())
        ),
        format!("URL:         {}", record.url.as_deref().unwrap_or("-")),
        format!("Retries:     {}/{}", record.retry_count, record.max_retries),
        format!(
            "Checks:      build {}, tests {}, health {}",
            flag(record.build_passed),
            flag(record.tests_passed),
            flag(record.health_check_passed)
        ),
        format!("Expires:     {}", record.expires_at.to_rfc3339()),
    ];
    if let Some(error) = &record.last_error {
        lines.push(format!("Last error:  {}", error));
    }
    if !record.error_history.is_empty() {
        lines.push(format!("History ({}):", record.error_history.len()));
        for entry in &record.error_history {
            lines.push(format!(
                "  {}  [{}/{}] {}",
                entry.timestamp.format("%H:%M:%S"),
                entry.category,
                entry.fixable,
                entry.message
            ));
        }
    }
    lines.join("\n")
}
