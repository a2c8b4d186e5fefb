//! Record normalization
//!
//! Raw search results stay `serde_json::Value` until they reach this module. Each one either
//! becomes one or more [`NormalizedRecord`]s or a [`SchemaError`]; nothing is coerced
//! silently.

use crate::{FieldValue, NormalizedRecord, QueryDescriptor, RecordType};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

pub mod fields;
mod records;

use fields::{flatten_into, required_timestamp};

/// Top-level issue attributes consumed by the normalizer rather than kept in `extra`
const STRUCTURAL_KEYS: &[&str] = &["id", "key", "fields", "changelog", "expand"];

/// Schema violations in a raw record
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Required attribute is absent or null
    #[error("record {record}: missing required field `{field}`")]
    MissingField {
        /// Issue key or record identifier
        record: String,
        /// Field name
        field: String,
    },

    /// Attribute has the wrong JSON type
    #[error("record {record}: field `{field}` should be {expected}")]
    WrongShape {
        /// Issue key or record identifier
        record: String,
        /// Field name
        field: String,
        /// Expected shape
        expected: &'static str,
    },

    /// Attribute has the right type but an unparseable value
    #[error("record {record}: field `{field}` holds malformed {kind} '{value}'")]
    Malformed {
        /// Issue key or record identifier
        record: String,
        /// Field name
        field: String,
        /// Expected kind of value
        kind: &'static str,
        /// Offending value
        value: String,
    },
}

impl SchemaError {
    pub(crate) fn missing(record: &str, field: &str) -> Self {
        SchemaError::MissingField {
            record: record.to_string(),
            field: field.to_string(),
        }
    }

    pub(crate) fn wrong_shape(record: &str, field: &str, expected: &'static str) -> Self {
        SchemaError::WrongShape {
            record: record.to_string(),
            field: field.to_string(),
            expected,
        }
    }

    pub(crate) fn malformed(record: &str, field: &str, kind: &'static str, value: &str) -> Self {
        SchemaError::Malformed {
            record: record.to_string(),
            field: field.to_string(),
            kind,
            value: value.chars().take(80).collect(),
        }
    }
}

/// Result type for normalization
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Validated view of a raw issue
pub(crate) struct IssueView<'a> {
    pub raw: &'a Map<String, Value>,
    pub key: String,
    pub fields: &'a Map<String, Value>,
    pub updated: DateTime<Utc>,
}

impl<'a> IssueView<'a> {
    /// Check the attributes every record type needs
    pub fn parse(raw: &'a Value, query: &QueryDescriptor) -> SchemaResult<Self> {
        let object = raw
            .as_object()
            .ok_or_else(|| SchemaError::wrong_shape("<unknown>", "issue", "object"))?;
        let key = match object.get("key") {
            Some(Value::String(key)) if !key.trim().is_empty() => key.trim().to_string(),
            Some(Value::String(_)) | None | Some(Value::Null) => {
                let id = match object.get("id") {
                    Some(Value::String(id)) => id.clone(),
                    Some(Value::Number(id)) => id.to_string(),
                    _ => "<unknown>".to_string(),
                };
                return Err(SchemaError::missing(&id, "key"));
            }
            Some(_) => return Err(SchemaError::wrong_shape("<unknown>", "key", "string")),
        };
        let fields = match object.get("fields") {
            Some(Value::Object(fields)) => fields,
            None | Some(Value::Null) => return Err(SchemaError::missing(&key, "fields")),
            Some(_) => return Err(SchemaError::wrong_shape(&key, "fields", "object")),
        };
        let updated = required_timestamp(fields, "updated", &key)?;

        for requested in query.fields() {
            if !fields.contains_key(requested) {
                return Err(SchemaError::missing(&key, requested));
            }
        }

        Ok(Self {
            raw: object,
            key,
            fields,
            updated,
        })
    }
}

/// Normalize one raw issue into an issue record
///
/// Requested fields (or every field when none were requested) are flattened into the field
/// map, followed by counts and age derived from them. Other returned fields and unknown
/// top-level attributes are preserved in `extra`.
pub fn normalize(raw: &Value, query: &QueryDescriptor) -> SchemaResult<NormalizedRecord> {
    let issue = IssueView::parse(raw, query)?;
    let mut record = NormalizedRecord::new(issue.key.clone(), RecordType::Issue, issue.updated);

    if let Some(id) = issue.raw.get("id") {
        let id = match id {
            Value::String(s) => FieldValue::Text(s.clone()),
            other => fields::coerce_scalar("issue_id", "issue_id", other, &issue.key)?,
        };
        record.fields.insert("issue_id".to_string(), id);
    }

    let select_all = query.fields().is_empty();
    for (name, value) in issue.fields {
        if name == "updated" {
            continue;
        }
        if select_all || query.fields().iter().any(|f| f == name) {
            flatten_into(name, value, 0, &issue.key, &mut record.fields)?;
        } else {
            record.extra.insert(format!("fields.{}", name), value.clone());
        }
    }

    for (name, value) in issue.raw {
        if !STRUCTURAL_KEYS.contains(&name.as_str()) {
            record.extra.insert(name.clone(), value.clone());
        }
    }

    for (name, value) in records::derived_issue_fields(&issue)? {
        record.fields.insert(name.to_string(), value);
    }

    Ok(record)
}

/// Expand one raw issue into the records of the query's record type
pub fn normalize_page(raw: &Value, query: &QueryDescriptor) -> SchemaResult<Vec<NormalizedRecord>> {
    match query.record_type() {
        RecordType::Issue => normalize(raw, query).map(|record| vec![record]),
        RecordType::Comment => records::comments(&IssueView::parse(raw, query)?),
        RecordType::ChangeHistory => records::change_history(&IssueView::parse(raw, query)?),
        RecordType::IssueLink => records::issue_links(&IssueView::parse(raw, query)?),
        RecordType::Component => records::components(&IssueView::parse(raw, query)?),
        RecordType::Label => records::labels(&IssueView::parse(raw, query)?),
        RecordType::TimeInStatus => records::time_in_status(&IssueView::parse(raw, query)?),
    }
}
