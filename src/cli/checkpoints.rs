//! Checkpoints command implementation

use super::{Cli, OutputFormat};
use crate::resume::{CheckpointRecord, CheckpointStore};
use anyhow::{anyhow, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Args, Subcommand};

/// Checkpoints command arguments
#[derive(Args, Debug, Clone)]
pub struct CheckpointsCommand {
    /// Checkpoints subcommand
    #[command(subcommand)]
    pub command: CheckpointsSubcommand,
}

/// Checkpoints subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum CheckpointsSubcommand {
    /// List stored checkpoints
    List,

    /// Show one checkpoint
    Show {
        /// Query hash, or a unique prefix of it
        hash: String,
    },

    /// Delete a checkpoint so the next run starts from the first page
    Purge {
        /// Query hash, or a unique prefix of it
        hash: String,
    },

    /// Check that every checkpoint file loads and matches its query
    Verify,
}

impl CheckpointsCommand {
    /// Execute the checkpoints command
    pub fn execute(&self, cli: &Cli) -> Result<()> {
        let store = CheckpointStore::new(&cli.checkpoint_dir)
            .with_context(|| format!("failed to open {}", cli.checkpoint_dir.display()))?;

        match &self.command {
            CheckpointsSubcommand::List => list(&store, cli.output_format),
            CheckpointsSubcommand::Show { hash } => {
                let record = resolve(&store, hash)?;
                show(&record, cli.output_format)
            }
            CheckpointsSubcommand::Purge { hash } => {
                let record = resolve(&store, hash)?;
                store.purge(record.query_hash())?;
                println!("Purged checkpoint {} ({})", record.query_hash(), record.query());
                Ok(())
            }
            CheckpointsSubcommand::Verify => verify(&store),
        }
    }
}

/// Find the single checkpoint whose hash starts with `prefix`
fn resolve(store: &CheckpointStore, prefix: &str) -> Result<CheckpointRecord> {
    let prefix = prefix.trim().to_lowercase();
    if prefix.is_empty() {
        return Err(anyhow!("checkpoint hash cannot be empty"));
    }

    let mut matches: Vec<CheckpointRecord> = store
        .list()?
        .into_iter()
        .filter(|r| r.query_hash().starts_with(&prefix))
        .collect();

    match matches.len() {
        0 => Err(anyhow!("no checkpoint matches '{}'", prefix)),
        1 => Ok(matches.remove(0)),
        n => Err(anyhow!("'{}' matches {} checkpoints; use a longer prefix", prefix, n)),
    }
}

fn format_millis(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn list(store: &CheckpointStore, format: OutputFormat) -> Result<()> {
    let records = store.list()?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        OutputFormat::Human => {
            if records.is_empty() {
                println!("No checkpoints in {}", store.root().display());
                return Ok(());
            }
            println!("{:<14} {:<12} {:>8} {:>10}  QUERY", "HASH", "STATUS", "PAGES", "RECORDS");
            for record in &records {
                let entry = record.entry();
                println!(
                    "{:<14} {:<12} {:>8} {:>10}  {}",
                    &record.query_hash()[..record.query_hash().len().min(12)],
                    entry.status(),
                    entry.pages_committed(),
                    entry.records_written(),
                    record.query()
                );
            }
        }
    }
    Ok(())
}

fn show(record: &CheckpointRecord, format: OutputFormat) -> Result<()> {
    let entry = record.entry();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(record)?);
        }
        OutputFormat::Human => {
            println!("Checkpoint {}", record.query_hash());
            println!("  Query:    {}", record.query().jql());
            println!("  Type:     {}", record.query().record_type());
            println!("  Status:   {}", entry.status());
            println!(
                "  Cursor:   {}",
                entry.cursor().map(|c| c.to_string()).unwrap_or_else(|| "-".to_string())
            );
            println!("  Pages:    {}", entry.pages_committed());
            println!("  Written:  {}", entry.records_written());
            println!("  Skipped:  {}", entry.records_skipped());
            println!("  Created:  {}", format_millis(record.created_at()));
            println!("  Updated:  {}", format_millis(record.updated_at()));
            if let Some(error) = entry.last_error() {
                println!("  Error:    {}", error);
            }
        }
    }
    Ok(())
}

fn verify(store: &CheckpointStore) -> Result<()> {
    let reports = store.verify()?;
    let mut invalid = 0;

    for report in &reports {
        match &report.error {
            None => println!("OK       {}", report.path.display()),
            Some(err) => {
                invalid += 1;
                println!("INVALID  {}: {}", report.path.display(), err);
            }
        }
    }

    println!("{} checkpoint(s) checked, {} invalid", reports.len(), invalid);
    if invalid > 0 {
        return Err(anyhow!("{} invalid checkpoint(s) in {}", invalid, store.root().display()));
    }
    Ok(())
}
