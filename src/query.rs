//! Query descriptors
//!
//! A [`QueryDescriptor`] is the immutable, declarative description of one extraction: the JQL
//! filter, the record type to produce, the requested fields, the page size and an optional
//! label. Its SHA-256 hash over canonical JSON keys the checkpoint for resumption.

use crate::RecordType;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Default number of issues requested per page
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Largest page size accepted
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Number of hash characters used in dataset file names
const FILE_HASH_PREFIX_LEN: usize = 12;

/// Query descriptor validation and loading errors
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// JQL filter is empty
    #[error("JQL filter cannot be empty")]
    EmptyJql,

    /// Page size outside the accepted range
    #[error("page size must be between 1 and {max}, got {0}", max = MAX_PAGE_SIZE)]
    InvalidPageSize(u32),

    /// Requested field name is empty or contains separators
    #[error("invalid field name '{0}'")]
    InvalidField(String),

    /// Label cannot be used in a file name
    #[error("invalid label '{0}': use letters, digits, '-', '_' or '.'")]
    InvalidLabel(String),

    /// Query file could not be read
    #[error("failed to read query file {path}: {message}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        message: String,
    },

    /// Query file is not valid JSON
    #[error("failed to parse query file {path}: {message}")]
    Parse {
        /// File path
        path: String,
        /// Underlying error
        message: String,
    },
}

/// Immutable description of one extraction
///
/// Field order is part of the canonical JSON and therefore of the hash.
///
/// # Examples
///
/// ```
/// use jira_extractor::{QueryDescriptor, RecordType};
///
/// let query = QueryDescriptor::new("project = DEMO", RecordType::Comment)
///     .with_page_size(50)
///     .with_label("demo-comments");
/// assert!(query.validate().is_ok());
/// assert_eq!(query.query_hash().len(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryDescriptor {
    jql: String,
    record_type: RecordType,
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default = "default_page_size")]
    page_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl QueryDescriptor {
    /// Create a descriptor requesting all fields with the default page size
    pub fn new(jql: impl Into<String>, record_type: RecordType) -> Self {
        Self {
            jql: jql.into().trim().to_string(),
            record_type,
            fields: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
            label: None,
        }
    }

    /// Create a descriptor selecting every issue of a project, ordered by key
    pub fn for_project(project_key: &str, record_type: RecordType) -> Self {
        Self::new(
            format!("project = {} ORDER BY key ASC", project_key.trim().to_uppercase()),
            record_type,
        )
    }

    /// Restrict the request to the given fields
    ///
    /// Names are trimmed; duplicates keep their first occurrence.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut selected: Vec<String> = Vec::new();
        for field in fields {
            let field = field.into().trim().to_string();
            if !selected.contains(&field) {
                selected.push(field);
            }
        }
        self.fields = selected;
        self
    }

    /// Set the page size
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set a human readable label, also used as the dataset file prefix
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// JQL filter expression, passed through verbatim
    pub fn jql(&self) -> &str {
        &self.jql
    }

    /// Record type produced by this query
    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// Explicitly requested fields; empty means all fields
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Number of issues per page
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Optional label
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Validate the descriptor
    ///
    /// # Errors
    ///
    /// Returns an error for an empty JQL filter, a page size outside `1..=MAX_PAGE_SIZE`,
    /// an empty or comma-containing field name, or a label unusable in a file name.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.jql.is_empty() {
            return Err(QueryError::EmptyJql);
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(QueryError::InvalidPageSize(self.page_size));
        }
        for field in &self.fields {
            if field.is_empty() || field.contains(',') || field.contains(char::is_whitespace) {
                return Err(QueryError::InvalidField(field.clone()));
            }
        }
        if let Some(label) = &self.label {
            let valid = !label.is_empty()
                && !label.starts_with('.')
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
            if !valid {
                return Err(QueryError::InvalidLabel(label.clone()));
            }
        }
        Ok(())
    }

    /// Canonical JSON encoding used for hashing
    pub fn canonical_json(&self) -> String {
        // Struct fields serialize in declaration order, so the encoding is stable.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Hex-encoded SHA-256 of the canonical JSON encoding
    pub fn query_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Fields to request from the search endpoint
    ///
    /// Returns an empty list when all fields are wanted. Otherwise the explicit selection is
    /// extended with `updated` and whatever the record type needs.
    pub fn request_fields(&self) -> Vec<String> {
        if self.fields.is_empty() {
            return Vec::new();
        }
        let mut fields = self.fields.clone();
        let mut ensure = |name: &str| {
            if !fields.iter().any(|f| f == name) {
                fields.push(name.to_string());
            }
        };
        ensure("updated");
        for required in self.record_type.required_issue_fields() {
            ensure(required);
        }
        fields
    }

    /// Re-apply builder normalization to a deserialized descriptor
    fn normalized(self) -> Self {
        let label = self.label;
        let mut query = Self::new(self.jql, self.record_type)
            .with_fields(self.fields)
            .with_page_size(self.page_size);
        query.label = label;
        query
    }

    /// Dataset file name: `{label or record_type}-{hash prefix}.csv`
    pub fn dataset_file_name(&self) -> String {
        let stem = self
            .label
            .clone()
            .unwrap_or_else(|| self.record_type.as_str().to_string());
        let hash = self.query_hash();
        format!("{}-{}.csv", stem, &hash[..FILE_HASH_PREFIX_LEN])
    }
}

impl fmt::Display for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{} ({})", label, self.record_type),
            None => write!(f, "{} [{}]", self.jql, self.record_type),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueryFile {
    Many(Vec<QueryDescriptor>),
    One(QueryDescriptor),
}

/// Load one descriptor or an array of descriptors from a JSON file and validate each
pub fn load_query_file(path: &Path) -> Result<Vec<QueryDescriptor>, QueryError> {
    let display = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| QueryError::Io {
        path: display.clone(),
        message: e.to_string(),
    })?;
    let parsed: QueryFile = serde_json::from_str(&content).map_err(|e| QueryError::Parse {
        path: display,
        message: e.to_string(),
    })?;
    let queries = match parsed {
        QueryFile::Many(queries) => queries,
        QueryFile::One(query) => vec![query],
    };
    queries
        .into_iter()
        .map(|q| {
            let q = q.normalized();
            q.validate().map(|_| q)
        })
        .collect()
}
