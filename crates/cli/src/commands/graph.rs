//! Graph browsing CLI commands

use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::{BTreeMap, HashMap};
use tabled::Tabled;

use crate::client::{ApiClient, Graph, RelationView};
use crate::output::{format_timestamp, print_info, print_json, print_success, print_table, OutputFormat};

/// Row for the per-type summary table
#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Count")]
    count: usize,
}

/// Row for resources table
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Observed")]
    timestamp: String,
}

/// Row for relations table
#[derive(Tabled)]
struct RelationRow {
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Observed")]
    timestamp: String,
}

fn count_rows<'a>(kinds: impl Iterator<Item = &'a str>) -> Vec<CountRow> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for kind in kinds {
        *counts.entry(kind).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(kind, count)| CountRow {
            kind: kind.to_string(),
            count,
        })
        .collect()
}

/// Show a per-type summary of the graph
pub async fn show_graph(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let graph = client.graph().await?;

    match format {
        OutputFormat::Json => print_json(&graph)?,
        OutputFormat::Table => {
            println!("{}", "Context Graph".bold());
            println!("{}", "=".repeat(50));
            println!("Snapshot:   {}", format_timestamp(&graph.timestamp).cyan());
            println!("Resources:  {}", graph.resources.len());
            println!("Relations:  {}", graph.relations.len());
            println!();

            println!("{}", "Resources by Type".bold());
            print_table(
                count_rows(graph.resources.iter().map(|r| r.kind.as_str())),
                "No resources in the graph",
            );
            println!();

            println!("{}", "Relations by Type".bold());
            print_table(
                count_rows(graph.relations.iter().map(|r| r.kind.as_str())),
                "No relations in the graph",
            );
        }
    }

    Ok(())
}

/// List the resources of one type
pub async fn list_resources(client: &ApiClient, kind: &str, format: OutputFormat) -> Result<()> {
    let list = client.resources(kind).await?;

    match format {
        OutputFormat::Json => print_json(&list)?,
        OutputFormat::Table => {
            let total = list.resources.len();
            let rows: Vec<ResourceRow> = list
                .resources
                .iter()
                .map(|r| ResourceRow {
                    id: r.id.clone(),
                    label: r.label().to_string(),
                    timestamp: format_timestamp(&r.timestamp),
                })
                .collect();

            print_table(rows, &format!("No {} found", kind));
            if total > 0 {
                println!("\nTotal: {} resources", total);
            }
        }
    }

    Ok(())
}

/// Relations to show, optionally restricted to one type (case-insensitive)
fn filter_relations<'a>(graph: &'a Graph, kind: Option<&str>) -> Vec<&'a RelationView> {
    graph
        .relations
        .iter()
        .filter(|r| kind.map_or(true, |k| r.kind.eq_ignore_ascii_case(k)))
        .collect()
}

/// List inferred relations, with endpoint labels resolved from the graph
pub async fn list_relations(
    client: &ApiClient,
    kind: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let graph = client.graph().await?;
    let relations = filter_relations(&graph, kind);

    match format {
        OutputFormat::Json => print_json(&relations)?,
        OutputFormat::Table => {
            let labels: HashMap<&str, String> = graph
                .resources
                .iter()
                .map(|r| (r.id.as_str(), format!("{} {}", r.kind, r.label())))
                .collect();
            let describe = |id: &str| labels.get(id).cloned().unwrap_or_else(|| id.to_string());

            let total = relations.len();
            let rows: Vec<RelationRow> = relations
                .into_iter()
                .map(|r| RelationRow {
                    kind: r.kind.clone(),
                    source: describe(&r.source),
                    target: describe(&r.target),
                    timestamp: format_timestamp(&r.timestamp),
                })
                .collect();

            print_table(rows, "No relations found");
            if total > 0 {
                println!("\nTotal: {} relations", total);
            }
        }
    }

    Ok(())
}

/// Export the graph as Graphviz DOT
pub async fn export_dot(client: &ApiClient, output: Option<&str>) -> Result<()> {
    let dot = client.dot().await?;

    match output {
        Some(path) => {
            std::fs::write(path, &dot).context("Failed to write output file")?;
            print_success(&format!("Graph written to {}", path));
            print_info(&format!("Render it with: dot -Tsvg {} -o graph.svg", path));
        }
        None => print!("{}", dot),
    }

    Ok(())
}
