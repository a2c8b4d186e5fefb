//! CLI command implementations

use crate::extractor::config::{DEFAULT_REQUESTS_PER_MINUTE, MAX_CONCURRENCY};
use crate::extractor::SchemaErrorPolicy;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub mod auth;
pub mod checkpoints;
pub mod error;
pub mod extract;

pub use auth::AuthCommand;
pub use checkpoints::CheckpointsCommand;
pub use error::CliError;
pub use extract::ExtractArgs;

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!("concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"));
    }
    Ok(value)
}

/// Jira extractor CLI
#[derive(Parser, Debug)]
#[command(name = "jira-extractor")]
#[command(about = "Extract Jira work items into resumable local CSV datasets", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Credentials TOML file ([authentication] and [service] tables)
    #[arg(long, global = true, env = "JIRA_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    /// Directory receiving the CSV datasets
    #[arg(long, global = true, default_value = "data")]
    pub output_dir: PathBuf,

    /// Directory holding per-query checkpoints
    #[arg(long, global = true, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Maximum number of retries for failed requests (default: 5, range: 1-20)
    #[arg(long, global = true, default_value = "5", value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_retries: u32,

    /// Request budget per minute shared by all concurrent queries
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_REQUESTS_PER_MINUTE,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub requests_per_minute: u32,

    /// Number of queries extracted concurrently (default: 4, max: 32)
    ///
    /// Only independent queries run in parallel; the pages of one query are always
    /// fetched in order. The rate limiter coordinates all concurrent requests.
    #[arg(long, global = true, default_value = "4", value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Restart from the first page even when a checkpoint exists
    #[arg(long, global = true, default_value_t = false)]
    pub force: bool,

    /// Handling of records that violate the schema: fail or skip
    #[arg(long, global = true, default_value = "fail")]
    pub on_schema_error: SchemaErrorPolicy,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract one query, or every query in a file
    Extract(ExtractArgs),

    /// Inspect, verify or purge stored checkpoints
    Checkpoints(CheckpointsCommand),

    /// Check credentials against the Jira instance
    Auth(AuthCommand),
}

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}
