//! Collector status CLI commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, format_timestamp, print_json, print_table, OutputFormat};

/// Row for health components table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Row for sources table
#[derive(Tabled)]
struct SourceRow {
    #[tabled(rename = "Source")]
    source_id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Last Success")]
    last_success: String,
    #[tabled(rename = "Last Fetch")]
    last_elapsed: String,
    #[tabled(rename = "Failures")]
    consecutive_failures: String,
    #[tabled(rename = "Last Error")]
    last_error: String,
}

fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

/// Show collector health
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;

    match format {
        OutputFormat::Json => print_json(&health)?,
        OutputFormat::Table => {
            println!("{}", "Collector Health".bold());
            println!("{}", "=".repeat(50));
            println!("Overall: {}", color_status(&health.status));
            println!();

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&component.status),
                    message: or_dash(component.message.as_deref()),
                })
                .collect();
            print_table(rows, "No components registered");
        }
    }

    Ok(())
}

/// Show the fetch status of every source
pub async fn show_sources(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let sources = client.sources().await?;

    match format {
        OutputFormat::Json => print_json(&sources)?,
        OutputFormat::Table => {
            let rows: Vec<SourceRow> = sources
                .iter()
                .map(|s| SourceRow {
                    source_id: s.source_id.clone(),
                    kind: s.kind.clone(),
                    last_success: s
                        .last_success
                        .as_deref()
                        .map(format_timestamp)
                        .unwrap_or_else(|| "never".to_string()),
                    last_elapsed: s
                        .last_elapsed_ms
                        .map(|ms| format!("{ms} ms"))
                        .unwrap_or_else(|| "-".to_string()),
                    consecutive_failures: if s.consecutive_failures > 0 {
                        s.consecutive_failures.to_string().red().to_string()
                    } else {
                        "0".to_string()
                    },
                    last_error: or_dash(s.last_error.as_deref()),
                })
                .collect();
            print_table(rows, "No sources have reported yet");
        }
    }

    Ok(())
}
