//! CLI module for Tierflow
//!
//! Command-line interface definitions and handlers.
//!
//! # Commands
//!
//! - `run` - Execute a workflow definition
//! - `history` - List recorded runs
//! - `stats` - Aggregate cost and savings statistics
//! - `quality` - Stage quality report and underperformers
//! - `import` - Import a legacy JSON history file
//! - `config` - Configuration utilities (init)
//!
//! # Example
//!
//! ```bash
//! # Run a workflow with the default config
//! tierflow run workflows/audit.toml --input-file src/login.rs
//!
//! # Last 5 successful runs of one workflow as JSON
//! tierflow history --workflow security_audit --success-only -n 5 --json
//! ```

pub mod config;
pub mod history;
pub mod output;
pub mod quality;
pub mod run;

pub use config::handle_config_init;

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::TierflowConfig;

/// Tierflow - cost-aware multi-stage workflow engine
#[derive(Parser, Debug)]
#[command(
    name = "tierflow",
    version,
    about = "Cost-aware multi-stage LLM workflow engine"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a workflow definition
    Run(RunArgs),
    /// List recorded workflow runs
    History(HistoryArgs),
    /// Show aggregate cost statistics
    Stats(StatsArgs),
    /// Show stage quality and underperforming stages
    Quality(QualityArgs),
    /// Import a legacy JSON history file
    Import(ImportArgs),
    /// Configuration utilities
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Workflow definition (TOML)
    pub workflow: PathBuf,

    /// Workflow input text
    #[arg(short, long, conflicts_with = "input_file")]
    pub input: Option<String>,

    /// Read workflow input from a file
    #[arg(short = 'f', long)]
    pub input_file: Option<PathBuf>,

    /// Override the routing policy (cost_optimized, performance_optimized, budget_aware, explicit)
    #[arg(short, long, env = "TIERFLOW_ROUTING_POLICY")]
    pub policy: Option<String>,

    /// Override the run budget in USD
    #[arg(short, long)]
    pub budget: Option<f64>,

    /// Bypass the fingerprint cache
    #[arg(long)]
    pub no_cache: bool,

    /// Print the final stage output after the report
    #[arg(long)]
    pub show_output: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "TIERFLOW_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Path to configuration file
    #[arg(short, long, default_value = "tierflow.toml")]
    pub config: PathBuf,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Filter by workflow name
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Filter by provider
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Only runs started at or after this RFC 3339 timestamp
    #[arg(short, long)]
    pub since: Option<String>,

    /// Only successful runs
    #[arg(long)]
    pub success_only: bool,

    /// Maximum number of runs
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Path to configuration file
    #[arg(short, long, default_value = "tierflow.toml")]
    pub config: PathBuf,
}

#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Path to configuration file
    #[arg(short, long, default_value = "tierflow.toml")]
    pub config: PathBuf,
}

#[derive(Args, Debug)]
pub struct QualityArgs {
    /// Underperforming threshold (defaults to quality.underperforming_threshold)
    #[arg(short, long)]
    pub threshold: Option<f64>,

    /// Only samples recorded at or after this RFC 3339 timestamp
    #[arg(short, long)]
    pub since: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Path to configuration file
    #[arg(short, long, default_value = "tierflow.toml")]
    pub config: PathBuf,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Legacy JSON history file
    pub path: PathBuf,

    /// Path to configuration file
    #[arg(short, long, default_value = "tierflow.toml")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Initialize a new configuration file
    Init(ConfigInitArgs),
}

#[derive(Args, Debug)]
pub struct ConfigInitArgs {
    /// Output file path
    #[arg(short, long, default_value = "tierflow.toml")]
    pub output: PathBuf,

    /// Overwrite existing file
    #[arg(short, long)]
    pub force: bool,
}

/// Load configuration for a command.
///
/// A missing file at the default path falls back to defaults so commands
/// work in a fresh directory; an explicitly named file must exist.
pub fn load_config(path: &Path) -> Result<TierflowConfig, Box<dyn std::error::Error>> {
    let config = if !path.exists() && path == Path::new("tierflow.toml") {
        TierflowConfig::default()
    } else {
        TierflowConfig::load(Some(path))?
    };
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Parse an RFC 3339 `--since` argument.
pub fn parse_since(
    since: Option<&str>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, Box<dyn std::error::Error>> {
    since
        .map(|s| {
            chrono::DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&chrono::Utc))
                .map_err(|e| format!("Invalid --since timestamp '{}': {}", s, e).into())
        })
        .transpose()
}
