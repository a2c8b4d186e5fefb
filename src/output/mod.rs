//! Dataset writers

use crate::NormalizedRecord;
use std::path::Path;
use std::sync::Arc;

pub mod csv;

pub use self::csv::CsvDatasetWriter;

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV read or write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Existing dataset has no `id` column
    #[error("dataset {path} is missing the id column")]
    MissingIdColumn {
        /// Dataset path
        path: String,
    },

    /// Lock error
    #[error("lock error: {0}")]
    LockError(#[from] crate::resume::LockError),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Upserting writer for normalized records
///
/// `write` returns only after the records are durably stored; a record whose id is already
/// present replaces the stored copy.
pub trait DatasetWriter: Send {
    /// Upsert `records`, returning how many were written
    fn write(&mut self, records: &[NormalizedRecord]) -> OutputResult<u64>;

    /// File the writer persists to
    fn destination(&self) -> &Path;
}

/// Opens a writer for a destination path
pub type WriterFactory = Arc<dyn Fn(&Path) -> OutputResult<Box<dyn DatasetWriter>> + Send + Sync>;

/// Factory producing [`CsvDatasetWriter`]s
pub fn csv_writer_factory() -> WriterFactory {
    Arc::new(|path: &Path| {
        CsvDatasetWriter::open(path).map(|writer| Box::new(writer) as Box<dyn DatasetWriter>)
    })
}
