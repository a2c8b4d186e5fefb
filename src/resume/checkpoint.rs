//! Checkpoint entries
//!
//! A checkpoint records the cursor of the next page to fetch after a page has been durably
//! persisted, together with cumulative counters for the query.

use crate::fetcher::Cursor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a query's checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Pages remain to be fetched
    #[default]
    InProgress,
    /// Every page was persisted
    Complete,
    /// The last run stopped on an error; rerunning resumes from the cursor
    Failed,
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CheckpointStatus::InProgress => "in_progress",
            CheckpointStatus::Complete => "complete",
            CheckpointStatus::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Progress of one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    /// Cursor of the next page; `None` once the result set is exhausted
    cursor: Option<Cursor>,
    pages_committed: u64,
    records_written: u64,
    #[serde(default)]
    records_skipped: u64,
    status: CheckpointStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    updated_at: i64,
}

impl CheckpointEntry {
    /// Entry for a query whose next page is at `cursor`
    pub fn new(cursor: Option<Cursor>, pages_committed: u64, records_written: u64) -> Self {
        Self {
            cursor,
            pages_committed,
            records_written,
            records_skipped: 0,
            status: CheckpointStatus::InProgress,
            last_error: None,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Set the number of records skipped under the lenient schema policy
    pub fn with_skipped(mut self, records_skipped: u64) -> Self {
        self.records_skipped = records_skipped;
        self
    }

    /// Cursor of the next page to fetch
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Pages durably persisted so far
    pub fn pages_committed(&self) -> u64 {
        self.pages_committed
    }

    /// Records upserted so far
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Records dropped by the lenient schema policy
    pub fn records_skipped(&self) -> u64 {
        self.records_skipped
    }

    /// Current status
    pub fn status(&self) -> CheckpointStatus {
        self.status
    }

    /// Message of the error that stopped the last run
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Milliseconds since the epoch of the last update
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Whether the query finished
    pub fn is_complete(&self) -> bool {
        self.status == CheckpointStatus::Complete
    }

    /// Every page was committed but completion was never recorded
    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_none() && self.pages_committed > 0
    }

    pub(crate) fn set_status(&mut self, status: CheckpointStatus, last_error: Option<String>) {
        self.status = status;
        self.last_error = last_error;
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}
