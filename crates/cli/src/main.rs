//! Context Graph CLI
//!
//! A command-line tool for browsing the cluster context graph served by
//! the collector: resources, inferred relations, and collector status.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{graph, status};

/// Context Graph CLI
#[derive(Parser)]
#[command(name = "ctxg")]
#[command(author, version, about = "CLI for the Context Graph collector", long_about = None)]
pub struct Cli {
    /// Collector endpoint URL (can also be set via CTXG_API_URL env var)
    #[arg(long, env = "CTXG_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Summarize the current graph
    Graph,

    /// List resources of one type
    Resources {
        /// Resource type (e.g. pods, Node, containers)
        resource_type: String,
    },

    /// List inferred relations
    Relations {
        /// Filter by relation type (contains, runs, createdFrom, loadBalances, monitors)
        #[arg(long = "type", short = 't')]
        relation_type: Option<String>,
    },

    /// Export the graph in Graphviz DOT format
    Dot {
        /// Output file path (prints to stdout if not specified)
        #[arg(long, short)]
        output: Option<String>,
    },

    /// Show collector health
    Health,

    /// Show the status of every fetch source
    Sources,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    let format = match cli.format {
        Some(format) => format,
        None => config
            .default_format
            .as_deref()
            .and_then(|f| f.parse().ok())
            .unwrap_or_default(),
    };

    // Initialize client
    let api_url = config.resolve_api_url(cli.api_url.as_deref());
    let client = client::ApiClient::new(&api_url)?;

    // Execute command
    match cli.command {
        Commands::Graph => graph::show_graph(&client, format).await?,
        Commands::Resources { resource_type } => {
            graph::list_resources(&client, &resource_type, format).await?
        }
        Commands::Relations { relation_type } => {
            graph::list_relations(&client, relation_type.as_deref(), format).await?
        }
        Commands::Dot { output } => graph::export_dot(&client, output.as_deref()).await?,
        Commands::Health => status::show_health(&client, format).await?,
        Commands::Sources => status::show_sources(&client, format).await?,
    }

    Ok(())
}
