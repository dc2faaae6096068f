//! # Command Line Interface
//!
//! - `gantry translate`: translate a gateway document and print the snapshot
//!   one proxy would receive, with the status reports
//! - `gantry validate-config`: load and validate the configuration

pub mod output;
pub mod translate;

use crate::config::AppConfig;
use crate::ir::{GatewayDocument, Locality};
use crate::observability::{init_observability, log_config_info};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use output::OutputFormat;
use std::path::PathBuf;
use translate::ClientArgs;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Gantry gateway control plane")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate a gateway document into the snapshot of one client
    Translate {
        /// Gateway document (YAML)
        #[arg(short, long)]
        input: PathBuf,

        /// Client role, defaults to the role serving the document's gateway
        #[arg(long)]
        client_role: Option<String>,

        /// Client namespace, defaults to the gateway namespace
        #[arg(long)]
        client_namespace: Option<String>,

        /// Client label as key=value, repeatable
        #[arg(long = "label", value_parser = translate::parse_label)]
        labels: Vec<(String, String)>,

        #[arg(long, default_value = "")]
        region: String,

        #[arg(long, default_value = "")]
        zone: String,

        #[arg(long, default_value = "")]
        subzone: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "json")]
        output: OutputFormat,
    },

    /// Load and validate the configuration, then print it
    ValidateConfig {
        /// Output format
        #[arg(short, long, value_enum, default_value = "yaml")]
        output: OutputFormat,
    },
}

/// Run CLI commands
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.verbose {
        config.observability.log_level = "debug".to_string();
    }
    init_observability(&config.observability).await?;
    log_config_info(&config);

    match cli.command {
        Commands::Translate {
            input,
            client_role,
            client_namespace,
            labels,
            region,
            zone,
            subzone,
            output,
        } => {
            let document = GatewayDocument::load(&input)
                .with_context(|| format!("Failed to load {}", input.display()))?;
            let client = ClientArgs {
                role: client_role,
                namespace: client_namespace,
                labels: labels.into_iter().collect(),
                locality: Locality::new(region, zone, subzone),
            };
            let result = translate::translate_document(document, client, &config).await?;
            output::print_output(&result, output)?;
        }

        Commands::ValidateConfig { output } => {
            tracing::info!("Configuration is valid");
            output::print_output(&config, output)?;
        }
    }

    Ok(())
}
