//! CSV dataset writer
//!
//! The dataset is a CSV table keyed on `id` and kept sorted by id. Each `write` upserts into
//! the in-memory table and rewrites the whole file through a synced temporary file, so a
//! crash mid-write leaves the previous table intact and repeated runs are byte-identical.

use crate::resume::{with_exclusive_lock, with_shared_lock};
use crate::NormalizedRecord;
use chrono::SecondsFormat;
use csv::{ReaderBuilder, Writer};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{DatasetWriter, OutputError, OutputResult};

/// Identifier column
pub const ID_COLUMN: &str = "id";
/// Record type column
pub const RECORD_TYPE_COLUMN: &str = "record_type";
/// Last-modified column
pub const LAST_MODIFIED_COLUMN: &str = "last_modified";
/// Catch-all column holding `extra` as canonical JSON
pub const EXTRA_COLUMN: &str = "_extra";

const RESERVED_COLUMNS: &[&str] = &[ID_COLUMN, RECORD_TYPE_COLUMN, LAST_MODIFIED_COLUMN, EXTRA_COLUMN];

type Row = BTreeMap<String, String>;

/// Column name for a field, moving names that collide with fixed columns under `fields.`
pub fn field_column(name: &str) -> String {
    if RESERVED_COLUMNS.contains(&name) {
        format!("fields.{name}")
    } else {
        name.to_string()
    }
}

fn render_row(record: &NormalizedRecord) -> Row {
    let mut row = Row::new();
    row.insert(ID_COLUMN.to_string(), record.id.clone());
    row.insert(RECORD_TYPE_COLUMN.to_string(), record.record_type.to_string());
    row.insert(
        LAST_MODIFIED_COLUMN.to_string(),
        record.last_modified.to_rfc3339_opts(SecondsFormat::Millis, true),
    );
    for (name, value) in &record.fields {
        row.insert(field_column(name), value.render());
    }
    row.insert(EXTRA_COLUMN.to_string(), record.render_extra());
    row
}

/// Upserting CSV writer for one dataset file
#[derive(Debug)]
pub struct CsvDatasetWriter {
    path: PathBuf,
    rows: BTreeMap<String, Row>,
}

impl CsvDatasetWriter {
    /// Open the dataset at `path`, loading any rows already stored there
    pub fn open<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OutputError::IoError(format!("Failed to create directory: {}", e)))?;
        }

        let rows = if path.exists() {
            with_shared_lock(&path, || read_rows(&path))?
        } else {
            BTreeMap::new()
        };

        info!(path = %path.display(), existing_rows = rows.len(), "Opened CSV dataset");
        Ok(Self { path, rows })
    }

    /// Number of distinct records stored
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the dataset holds no records
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Stored row for `id`, keyed by column name
    pub fn row(&self, id: &str) -> Option<&BTreeMap<String, String>> {
        self.rows.get(id)
    }

    /// Header of the table as it would be written now
    pub fn columns(&self) -> Vec<String> {
        columns_for(&self.rows)
    }
}

impl DatasetWriter for CsvDatasetWriter {
    fn write(&mut self, records: &[NormalizedRecord]) -> OutputResult<u64> {
        let mut rows = self.rows.clone();
        for record in records {
            rows.insert(record.id.clone(), render_row(record));
        }

        with_exclusive_lock(&self.path, || persist_rows(&self.path, &rows))?;

        debug!(
            path = %self.path.display(),
            upserted = records.len(),
            total_rows = rows.len(),
            "CSV dataset rewritten"
        );
        self.rows = rows;
        Ok(records.len() as u64)
    }

    fn destination(&self) -> &Path {
        &self.path
    }
}

fn columns_for(rows: &BTreeMap<String, Row>) -> Vec<String> {
    let fields: BTreeSet<&str> = rows
        .values()
        .flat_map(|row| row.keys())
        .map(String::as_str)
        .filter(|name| !RESERVED_COLUMNS.contains(name))
        .collect();

    let mut columns = vec![
        ID_COLUMN.to_string(),
        RECORD_TYPE_COLUMN.to_string(),
        LAST_MODIFIED_COLUMN.to_string(),
    ];
    columns.extend(fields.into_iter().map(str::to_string));
    columns.push(EXTRA_COLUMN.to_string());
    columns
}

fn read_rows(path: &Path) -> OutputResult<BTreeMap<String, Row>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| OutputError::CsvError(format!("Failed to open {}: {}", path.display(), e)))?;

    let headers = reader
        .headers()
        .map_err(|e| OutputError::CsvError(format!("Failed to read header: {}", e)))?
        .clone();
    if headers.is_empty() {
        return Ok(BTreeMap::new());
    }
    let id_index = headers
        .iter()
        .position(|h| h == ID_COLUMN)
        .ok_or_else(|| OutputError::MissingIdColumn {
            path: path.display().to_string(),
        })?;

    let mut rows = BTreeMap::new();
    for result in reader.records() {
        let record = result.map_err(|e| OutputError::CsvError(format!("Failed to read row: {}", e)))?;
        let id = record.get(id_index).unwrap_or_default().to_string();
        let row: Row = headers
            .iter()
            .zip(record.iter())
            .map(|(column, value)| (column.to_string(), value.to_string()))
            .collect();
        rows.insert(id, row);
    }
    Ok(rows)
}

fn persist_rows(path: &Path, rows: &BTreeMap<String, Row>) -> OutputResult<()> {
    let columns = columns_for(rows);
    let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_file = tempfile::NamedTempFile::new_in(parent_dir)
        .map_err(|e| OutputError::IoError(format!("Failed to create temp file: {}", e)))?;

    let mut writer = Writer::from_writer(temp_file);
    writer
        .write_record(&columns)
        .map_err(|e| OutputError::CsvError(format!("Failed to write header: {}", e)))?;
    for row in rows.values() {
        let cells = columns
            .iter()
            .map(|column| row.get(column).map(String::as_str).unwrap_or(""));
        writer
            .write_record(cells)
            .map_err(|e| OutputError::CsvError(format!("Failed to write row: {}", e)))?;
    }

    let mut temp_file = writer
        .into_inner()
        .map_err(|e| OutputError::IoError(format!("Failed to get inner writer: {}", e)))?;
    temp_file
        .flush()
        .map_err(|e| OutputError::IoError(format!("Failed to flush temp file: {}", e)))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| OutputError::IoError(format!("Failed to sync temp file: {}", e)))?;
    temp_file
        .persist(path)
        .map_err(|e| OutputError::IoError(format!("Failed to persist temp file: {}", e)))?;

    if let Ok(dir) = std::fs::File::open(parent_dir) {
        let _ = dir.sync_all();
    }
    Ok(())
}
