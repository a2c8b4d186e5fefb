//! Checkpoint persistence
//!
//! One JSON file per query hash under the checkpoint directory. Every write goes to a
//! temporary file in the same directory which is synced and renamed over the target, so a
//! crash leaves either the old or the new checkpoint, never a torn one.

use super::checkpoint::{CheckpointEntry, CheckpointStatus};
use super::lock::{with_exclusive_lock, with_shared_lock, LockError};
use crate::QueryDescriptor;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current checkpoint file schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed checkpoint file size (10 MB) to prevent memory exhaustion
pub const MAX_STATE_FILE_SIZE: u64 = 10 * 1024 * 1024;

const CHECKPOINT_EXTENSION: &str = "json";

/// Persisted checkpoint for one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    schema_version: String,
    query_hash: String,
    query: QueryDescriptor,
    entry: CheckpointEntry,
    created_at: i64,
    updated_at: i64,
}

impl CheckpointRecord {
    fn new(query: &QueryDescriptor, entry: CheckpointEntry) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            query_hash: query.query_hash(),
            query: query.clone(),
            entry,
            created_at: now,
            updated_at: now,
        }
    }

    /// Hash of the query this checkpoint belongs to
    pub fn query_hash(&self) -> &str {
        &self.query_hash
    }

    /// Query this checkpoint belongs to
    pub fn query(&self) -> &QueryDescriptor {
        &self.query
    }

    /// Latest entry
    pub fn entry(&self) -> &CheckpointEntry {
        &self.entry
    }

    /// Schema version of the file
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Milliseconds since the epoch of the first commit
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Milliseconds since the epoch of the last commit
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn validate(&self, expected_hash: &str) -> Result<(), ResumeError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        if self.query_hash != expected_hash {
            return Err(ResumeError::HashMismatch {
                expected: expected_hash.to_string(),
                found: self.query_hash.clone(),
            });
        }
        let recomputed = self.query.query_hash();
        if recomputed != self.query_hash {
            return Err(ResumeError::HashMismatch {
                expected: self.query_hash.clone(),
                found: recomputed,
            });
        }
        Ok(())
    }
}

/// Errors related to checkpoint persistence
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Checkpoint file belongs to a different query
    #[error("query hash mismatch: expected {expected}, found {found}")]
    HashMismatch {
        /// Hash the file was looked up by
        expected: String,
        /// Hash recorded in (or recomputed from) the file
        found: String,
    },

    /// State file too large
    #[error("state file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// No checkpoint exists for the hash
    #[error("no checkpoint for query {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(#[from] LockError),
}

/// Outcome of verifying one checkpoint file
#[derive(Debug)]
pub struct VerifyReport {
    /// File that was checked
    pub path: PathBuf,
    /// Failure, if the file is unusable
    pub error: Option<ResumeError>,
}

impl VerifyReport {
    /// Whether the file loaded cleanly
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Directory of per-query checkpoint files
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ResumeError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| ResumeError::IoError(format!("{}: {e}", root.display())))?;
        Ok(Self { root })
    }

    /// Checkpoint directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the checkpoint for `query_hash`
    pub fn path_for(&self, query_hash: &str) -> PathBuf {
        self.root.join(format!("{query_hash}.{CHECKPOINT_EXTENSION}"))
    }

    /// Latest entry for `query_hash`, or `None` when the query never committed a page
    pub fn load(&self, query_hash: &str) -> Result<Option<CheckpointEntry>, ResumeError> {
        Ok(self.load_record(query_hash)?.map(|record| record.entry))
    }

    /// Full checkpoint record for `query_hash`
    pub fn load_record(&self, query_hash: &str) -> Result<Option<CheckpointRecord>, ResumeError> {
        let path = self.path_for(query_hash);
        if !path.exists() {
            debug!(query_hash, "No checkpoint found");
            return Ok(None);
        }
        let record = with_shared_lock(&path, || read_record(&path))?;
        record.validate(query_hash)?;
        debug!(
            query_hash,
            cursor = ?record.entry.cursor(),
            pages_committed = record.entry.pages_committed(),
            status = %record.entry.status(),
            "Checkpoint loaded"
        );
        Ok(Some(record))
    }

    /// Durably replace the checkpoint for `query`
    ///
    /// Returns only after the new entry has been synced to disk.
    pub fn commit(&self, query: &QueryDescriptor, entry: CheckpointEntry) -> Result<(), ResumeError> {
        let query_hash = query.query_hash();
        let path = self.path_for(&query_hash);

        with_exclusive_lock(&path, || {
            let created_at = match read_record(&path) {
                Ok(existing) => Some(existing.created_at),
                Err(ResumeError::NotFound(_)) => None,
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "Replacing unreadable checkpoint");
                    None
                }
            };
            let mut record = CheckpointRecord::new(query, entry);
            if let Some(created_at) = created_at {
                record.created_at = created_at;
            }
            write_record(&path, &record)?;
            debug!(
                query_hash = %query_hash,
                cursor = ?record.entry.cursor(),
                pages_committed = record.entry.pages_committed(),
                records_written = record.entry.records_written(),
                status = %record.entry.status(),
                "Checkpoint committed"
            );
            Ok(())
        })
    }

    /// Record that every page of the query was persisted
    pub fn mark_complete(&self, query: &QueryDescriptor) -> Result<CheckpointEntry, ResumeError> {
        self.update_status(query, CheckpointStatus::Complete, None)
    }

    /// Record that the last run stopped on `error`; the cursor is left unchanged
    pub fn mark_failed(&self, query: &QueryDescriptor, error: &str) -> Result<CheckpointEntry, ResumeError> {
        self.update_status(query, CheckpointStatus::Failed, Some(error.to_string()))
    }

    fn update_status(
        &self,
        query: &QueryDescriptor,
        status: CheckpointStatus,
        last_error: Option<String>,
    ) -> Result<CheckpointEntry, ResumeError> {
        let query_hash = query.query_hash();
        let mut entry = self
            .load(&query_hash)?
            .unwrap_or_else(|| CheckpointEntry::new(None, 0, 0));
        entry.set_status(status, last_error);
        self.commit(query, entry.clone())?;
        info!(query_hash = %query_hash, status = %status, "Checkpoint status updated");
        Ok(entry)
    }

    /// Delete the checkpoint for `query_hash`; returns whether one existed
    pub fn purge(&self, query_hash: &str) -> Result<bool, ResumeError> {
        let path = self.path_for(query_hash);
        let removed = with_exclusive_lock(&path, || match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ResumeError::IoError(format!("{}: {e}", path.display()))),
        })?;
        let _ = std::fs::remove_file(super::lock::lock_path(&path));
        if removed {
            info!(query_hash, "Checkpoint purged");
        }
        Ok(removed)
    }

    /// Every readable checkpoint, ordered by query hash
    ///
    /// Unreadable files are logged and skipped; use [`CheckpointStore::verify`] to report them.
    pub fn list(&self) -> Result<Vec<CheckpointRecord>, ResumeError> {
        let mut records = Vec::new();
        for (hash, path) in self.checkpoint_files()? {
            match self.load_record(&hash) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(error = %e, path = %path.display(), "Skipping unreadable checkpoint"),
            }
        }
        Ok(records)
    }

    /// Load every checkpoint file and report which ones are unusable
    pub fn verify(&self) -> Result<Vec<VerifyReport>, ResumeError> {
        Ok(self
            .checkpoint_files()?
            .into_iter()
            .map(|(hash, path)| VerifyReport {
                error: self.load_record(&hash).err(),
                path,
            })
            .collect())
    }

    fn checkpoint_files(&self) -> Result<Vec<(String, PathBuf)>, ResumeError> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| ResumeError::IoError(format!("{}: {e}", self.root.display())))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| ResumeError::IoError(e.to_string()))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CHECKPOINT_EXTENSION) {
                continue;
            }
            if let Some(hash) = path.file_stem().and_then(|s| s.to_str()) {
                files.push((hash.to_string(), path.clone()));
            }
        }
        files.sort();
        Ok(files)
    }
}

fn read_record(path: &Path) -> Result<CheckpointRecord, ResumeError> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ResumeError::NotFound(path.display().to_string()))
        }
        Err(e) => return Err(ResumeError::IoError(e.to_string())),
    };
    if metadata.len() > MAX_STATE_FILE_SIZE {
        return Err(ResumeError::StateTooLarge {
            size: metadata.len(),
            max: MAX_STATE_FILE_SIZE,
        });
    }

    let contents = std::fs::read_to_string(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
    serde_json::from_str(&contents).map_err(|e| {
        warn!(error = %e, path = %path.display(), "Failed to deserialize checkpoint");
        ResumeError::DeserializationError(e.to_string())
    })
}

fn write_record(path: &Path, record: &CheckpointRecord) -> Result<(), ResumeError> {
    let json =
        serde_json::to_string_pretty(record).map_err(|e| ResumeError::SerializationError(e.to_string()))?;

    let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
        .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;

    temp_file
        .write_all(json.as_bytes())
        .map_err(|e| ResumeError::IoError(format!("Failed to write to temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| ResumeError::IoError(format!("Failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| ResumeError::IoError(format!("Failed to sync temp file: {e}")))?;

    temp_file
        .persist(path)
        .map_err(|e| ResumeError::IoError(format!("Failed to persist temp file: {e}")))?;

    if let Ok(dir) = std::fs::File::open(parent_dir) {
        let _ = dir.sync_all();
    }
    Ok(())
}
