//! Outcome of one extraction run

use super::state::RunState;
use super::ErrorKind;
use crate::fetcher::Cursor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Every page was persisted and the checkpoint marked complete
    Complete,
    /// The run stopped on an error; the checkpoint still points at the last committed page
    Failed,
    /// Shutdown was requested; the checkpoint is resumable
    Cancelled,
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionStatus::Complete => f.write_str("complete"),
            ExtractionStatus::Failed => f.write_str("failed"),
            ExtractionStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Error that stopped a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionFailure {
    /// Error class
    pub kind: ErrorKind,
    /// Error message
    pub message: String,
    /// Cursor of the page being processed
    pub cursor: Option<Cursor>,
    /// Page number being processed, 0 before the first page
    pub page_number: u64,
}

/// Report of one run of one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Hash keying the checkpoint
    pub query_hash: String,
    /// Human-readable query description
    pub query: String,
    /// Final status
    pub status: ExtractionStatus,
    /// Records upserted, cumulative across resumed runs
    pub records_written: u64,
    /// Records dropped by the skip schema policy, cumulative
    pub records_skipped: u64,
    /// Pages committed, cumulative
    pub pages_fetched: u64,
    /// Cursor of the next page after the last committed one
    pub last_cursor: Option<Cursor>,
    /// Error that stopped the run
    pub last_error: Option<ExtractionFailure>,
    /// Whether the run continued from a stored checkpoint
    pub resumed: bool,
    /// Dataset file
    pub destination: PathBuf,
    /// States entered, in order
    pub state_history: Vec<RunState>,
}

impl ExtractionResult {
    /// Whether the query finished
    pub fn is_complete(&self) -> bool {
        self.status == ExtractionStatus::Complete
    }

    /// One-line summary for terminal output
    pub fn summary(&self) -> String {
        let short_hash = self.query_hash.get(..12).unwrap_or(&self.query_hash);
        let mut line = format!(
            "[{}] {} ({}): {} records, {} pages -> {}",
            self.status.to_string().to_uppercase(),
            self.query,
            short_hash,
            self.records_written,
            self.pages_fetched,
            self.destination.display()
        );
        if self.records_skipped > 0 {
            line.push_str(&format!(", {} skipped", self.records_skipped));
        }
        if self.resumed {
            line.push_str(", resumed");
        }
        if let Some(failure) = &self.last_error {
            line.push_str(&format!("\n  {} error on page {}: {}", failure.kind, failure.page_number, failure.message));
        }
        line
    }
}
