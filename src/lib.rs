//! # Jira Extractor Library
//!
//! Resumable, rate-limited extraction of Jira work items into local CSV datasets.
//!
//! ## Overview
//!
//! An extraction is described by a [`QueryDescriptor`]: a JQL filter, the record type to
//! produce, optional field selection and page size. The [`extractor::ExtractionExecutor`]
//! authenticates, pages through the search endpoint under a shared rate budget, normalizes
//! raw issues into typed records, upserts them into a CSV dataset and commits a durable
//! checkpoint after every page. An interrupted run resumes from the last committed page.
//!
//! ## Modules
//!
//! - [`auth`]: credential loading and session acquisition
//! - [`fetcher`]: page source trait, Jira HTTP client, retrying transport and pagination
//! - [`normalize`]: raw JSON to [`NormalizedRecord`] conversion
//! - [`output`]: idempotent CSV dataset writer
//! - [`resume`]: durable checkpoint store
//! - [`extractor`]: orchestration, backoff policy and rate limiting
//! - [`query`]: query descriptors, hashing and query files
//! - [`shutdown`]: graceful shutdown coordination
//! - [`metrics`]: Prometheus metrics
//! - [`cli`]: command-line interface
//!
//! ## Example
//!
//! ```rust,no_run
//! use jira_extractor::auth::{Credentials, TokenCredentialProvider};
//! use jira_extractor::extractor::ExtractionExecutor;
//! use jira_extractor::fetcher::JiraHttpSource;
//! use jira_extractor::{QueryDescriptor, RecordType};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::load(Some("credentials.toml".as_ref()))?;
//! let provider = Arc::new(TokenCredentialProvider::new(credentials));
//! let executor = ExtractionExecutor::new(provider, Arc::new(JiraHttpSource::new()), "data", "checkpoints")?;
//!
//! let query = QueryDescriptor::new("project = DEMO ORDER BY key", RecordType::Issue);
//! let result = executor.run_extraction(&query).await;
//! println!("{} records written", result.records_written);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod cli;
pub mod extractor;
pub mod fetcher;
pub mod metrics;
pub mod normalize;
pub mod output;
pub mod query;
pub mod resume;
pub mod shutdown;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use query::QueryDescriptor;

/// Kind of record an extraction produces from each fetched issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// One record per issue
    Issue,
    /// One record per issue comment
    Comment,
    /// One record per changed field in each changelog history entry
    ChangeHistory,
    /// One record per issue link
    IssueLink,
    /// One record per component attached to an issue
    Component,
    /// One record per label attached to an issue
    Label,
    /// One record per status an issue has held, with the time spent in it
    TimeInStatus,
}

impl RecordType {
    /// All record types in declaration order
    pub const ALL: [RecordType; 7] = [
        RecordType::Issue,
        RecordType::Comment,
        RecordType::ChangeHistory,
        RecordType::IssueLink,
        RecordType::Component,
        RecordType::Label,
        RecordType::TimeInStatus,
    ];

    /// Stable snake_case name used in file names, CSV cells and checkpoints
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Issue => "issue",
            RecordType::Comment => "comment",
            RecordType::ChangeHistory => "change_history",
            RecordType::IssueLink => "issue_link",
            RecordType::Component => "component",
            RecordType::Label => "label",
            RecordType::TimeInStatus => "time_in_status",
        }
    }

    /// Issue fields the search request must return for this record type
    pub fn required_issue_fields(&self) -> &'static [&'static str] {
        match self {
            RecordType::Issue | RecordType::ChangeHistory => &[],
            RecordType::Comment => &["comment"],
            RecordType::IssueLink => &["issuelinks"],
            RecordType::Component => &["components"],
            RecordType::Label => &["labels"],
            RecordType::TimeInStatus => &["created", "status"],
        }
    }

    /// Whether the search request must expand the changelog
    pub fn needs_changelog(&self) -> bool {
        matches!(self, RecordType::ChangeHistory | RecordType::TimeInStatus)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "issue" | "issues" => Ok(RecordType::Issue),
            "comment" | "comments" => Ok(RecordType::Comment),
            "change_history" | "changelog" => Ok(RecordType::ChangeHistory),
            "issue_link" | "issuelinks" => Ok(RecordType::IssueLink),
            "component" | "components" => Ok(RecordType::Component),
            "label" | "labels" => Ok(RecordType::Label),
            "time_in_status" | "status_time" => Ok(RecordType::TimeInStatus),
            other => Err(format!(
                "Invalid record type: '{}'. Valid types: issue, comment, change_history, issue_link, component, label, time_in_status",
                other
            )),
        }
    }
}

/// Typed value of a normalized field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Explicit JSON null
    Null,
    /// Boolean flag
    Bool(bool),
    /// Exact numeric value
    Number(Decimal),
    /// Free text
    Text(String),
    /// Instant in UTC
    Timestamp(DateTime<Utc>),
    /// Calendar date without time
    Date(NaiveDate),
    /// Array of scalar values
    List(Vec<FieldValue>),
    /// Nested structure kept as canonical JSON
    Json(serde_json::Value),
}

impl FieldValue {
    /// Render the value as a single CSV cell
    ///
    /// Rendering is deterministic: timestamps use RFC 3339 with millisecond precision,
    /// lists and JSON use compact JSON with sorted object keys.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Millis, true),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::List(items) => {
                let rendered: Vec<serde_json::Value> = items
                    .iter()
                    .map(|item| serde_json::Value::String(item.render()))
                    .collect();
                serde_json::Value::Array(rendered).to_string()
            }
            FieldValue::Json(value) => value.to_string(),
        }
    }
}

/// A single typed record ready to be written to a dataset
///
/// `id` is stable across runs, so writing the same record twice replaces the earlier copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Stable identifier, unique within a dataset
    pub id: String,
    /// Kind of record
    pub record_type: RecordType,
    /// Last modification time reported by the service
    pub last_modified: DateTime<Utc>,
    /// Typed fields keyed by flattened dotted name
    pub fields: BTreeMap<String, FieldValue>,
    /// Unrecognized attributes preserved verbatim
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl NormalizedRecord {
    /// Create a record with no fields
    pub fn new(id: impl Into<String>, record_type: RecordType, last_modified: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            record_type,
            last_modified,
            fields: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Add a field, returning the record for chaining
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Render `extra` as a canonical JSON object, or an empty string when there is nothing extra
    pub fn render_extra(&self) -> String {
        if self.extra.is_empty() {
            return String::new();
        }
        let object: serde_json::Map<String, serde_json::Value> = self
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::Value::Object(object).to_string()
    }
}
