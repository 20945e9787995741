//! synthview CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: load the project TOML and validate it before
//!    any model call is made.
//! 2. **Wire observability**: configure `tracing-subscriber` (text or JSON)
//!    and, when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, an OpenTelemetry OTLP
//!    exporter. Every `tracing` span and event in the workspace flows through
//!    this layer.
//! 3. **Construct infrastructure**: the HTTP completion backend behind the
//!    retrying [`llm::CompletionClient`], and the file stores from [`store`].
//! 4. **Run a command**: `interview`, `analyze`, or `status`.

mod commands;
mod config;
mod progress;
mod telemetry;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use crate::config::DEFAULT_CONFIG_PATH;
use crate::telemetry::{LogFormat, Telemetry};

// ============================================================================
// CLI Types
// ============================================================================

/// synthview - run synthetic user interviews and analyse the transcripts
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the project configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH, env = "SYNTHVIEW_CONFIG")]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interview every persona that has no stored session yet
    Interview {
        /// Persona list (JSON array); overrides the config file
        #[arg(short, long)]
        personas: Option<PathBuf>,

        /// Maximum concurrent sessions; overrides the config file
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Analyse every stored session that has no analysis record yet
    Analyze {
        /// Maximum concurrent analyses; overrides the config file
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Show how far the study has progressed
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let telemetry = Telemetry::init(cli.log_format)?;

    let result = run(cli).await;
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "command failed");
    }

    telemetry.shutdown();
    result
}

async fn run(cli: Cli) -> Result<()> {
    let show_bar = cli.log_format == LogFormat::Text;
    match cli.command {
        Commands::Interview {
            personas,
            concurrency,
        } => commands::interview(&cli.config, personas, concurrency, show_bar).await,
        Commands::Analyze { concurrency } => {
            commands::analyze(&cli.config, concurrency, show_bar).await
        }
        Commands::Status => commands::status(&cli.config).await,
    }
}
