//! Field coercion and flattening
//!
//! Deterministic conversion of raw JSON values into [`FieldValue`]s.

use super::{SchemaError, SchemaResult};
use crate::FieldValue;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Nested objects deeper than this are kept as canonical JSON
pub const MAX_FLATTEN_DEPTH: usize = 3;

/// Jira system fields that always carry a full timestamp; a malformed value is a schema error
const TIMESTAMP_FIELDS: &[&str] = &[
    "created",
    "updated",
    "resolutiondate",
    "statuscategorychangedate",
    "lastViewed",
];

/// Field names that carry a calendar date
const DATE_FIELDS: &[&str] = &["duedate"];

/// Parse a Jira timestamp (`2024-03-01T12:30:00.000+0000`) or an RFC 3339 string
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Parse a JSON number exactly
pub fn parse_decimal(number: &serde_json::Number) -> Option<Decimal> {
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// camelCase leaves such as `startDate` or `targetDate`; coerced when they parse, kept as text
/// otherwise
fn looks_like_date_field(leaf: &str) -> bool {
    leaf.strip_suffix("Date")
        .map(|prefix| prefix.chars().next().is_some_and(|c| c.is_ascii_lowercase()))
        .unwrap_or(false)
}

/// Read a required timestamp attribute
pub fn required_timestamp(object: &Map<String, Value>, field: &str, record: &str) -> SchemaResult<DateTime<Utc>> {
    match object.get(field) {
        None | Some(Value::Null) => Err(SchemaError::missing(record, field)),
        Some(Value::String(raw)) => {
            parse_timestamp(raw).ok_or_else(|| SchemaError::malformed(record, field, "timestamp", raw))
        }
        Some(_) => Err(SchemaError::wrong_shape(record, field, "timestamp string")),
    }
}

/// Read a required identifier that may be a string or an integer
pub fn required_id(object: &Map<String, Value>, field: &str, record: &str) -> SchemaResult<String> {
    match object.get(field) {
        None | Some(Value::Null) => Err(SchemaError::missing(record, field)),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(SchemaError::wrong_shape(record, field, "non-empty string or integer")),
    }
}

/// Read an optional string attribute
pub fn optional_str<'a>(object: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    object.get(field).and_then(Value::as_str)
}

/// Text value or null
pub fn text_or_null(value: Option<&str>) -> FieldValue {
    value
        .map(|s| FieldValue::Text(s.to_string()))
        .unwrap_or(FieldValue::Null)
}

/// Coerce a non-object value; `leaf` is the last segment of the field name
pub fn coerce_scalar(path: &str, leaf: &str, value: &Value, record: &str) -> SchemaResult<FieldValue> {
    match value {
        Value::Null => Ok(FieldValue::Null),
        Value::Bool(b) => Ok(FieldValue::Bool(*b)),
        Value::Number(n) => parse_decimal(n)
            .map(FieldValue::Number)
            .ok_or_else(|| SchemaError::malformed(record, path, "number", &n.to_string())),
        Value::String(s) => {
            if DATE_FIELDS.contains(&leaf) {
                parse_date(s)
                    .map(FieldValue::Date)
                    .ok_or_else(|| SchemaError::malformed(record, path, "date", s))
            } else if TIMESTAMP_FIELDS.contains(&leaf) {
                parse_timestamp(s)
                    .map(FieldValue::Timestamp)
                    .or_else(|| parse_date(s).map(FieldValue::Date))
                    .ok_or_else(|| SchemaError::malformed(record, path, "timestamp", s))
            } else if looks_like_date_field(leaf) {
                Ok(parse_timestamp(s)
                    .map(FieldValue::Timestamp)
                    .or_else(|| parse_date(s).map(FieldValue::Date))
                    .unwrap_or_else(|| FieldValue::Text(s.clone())))
            } else {
                Ok(FieldValue::Text(s.clone()))
            }
        }
        Value::Array(items) => {
            if items.iter().all(|item| !item.is_object() && !item.is_array()) {
                items
                    .iter()
                    .map(|item| coerce_scalar(path, leaf, item, record))
                    .collect::<SchemaResult<Vec<_>>>()
                    .map(FieldValue::List)
            } else {
                Ok(FieldValue::Json(value.clone()))
            }
        }
        Value::Object(_) => Ok(FieldValue::Json(value.clone())),
    }
}

/// Flatten `value` under `path` into dotted keys
///
/// Objects recurse up to [`MAX_FLATTEN_DEPTH`]; an empty object is kept as `{}` so a
/// requested field never silently disappears.
pub fn flatten_into(
    path: &str,
    value: &Value,
    depth: usize,
    record: &str,
    out: &mut BTreeMap<String, FieldValue>,
) -> SchemaResult<()> {
    match value {
        Value::Object(object) if !object.is_empty() && depth < MAX_FLATTEN_DEPTH => {
            for (key, nested) in object {
                flatten_into(&format!("{}.{}", path, key), nested, depth + 1, record, out)?;
            }
            Ok(())
        }
        _ => {
            let leaf = path.rsplit('.').next().unwrap_or(path);
            out.insert(path.to_string(), coerce_scalar(path, leaf, value, record)?);
            Ok(())
        }
    }
}

/// Remove markup tags and character entities from rich text
pub fn strip_markup(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((index, c)) = chars.next() {
        match c {
            '<' => {
                if let Some(close) = input[index..].find('>') {
                    let end = index + close;
                    while chars.peek().is_some_and(|(i, _)| *i <= end) {
                        chars.next();
                    }
                } else {
                    output.push(c);
                }
            }
            '&' => {
                let rest = &input[index + 1..];
                match entity_len(rest) {
                    Some(len) => {
                        let end = index + len;
                        while chars.peek().is_some_and(|(i, _)| *i <= end) {
                            chars.next();
                        }
                    }
                    None => output.push(c),
                }
            }
            _ => output.push(c),
        }
    }
    output
}

/// Length of `name;` after an ampersand, for named, decimal and hex entities
fn entity_len(rest: &str) -> Option<usize> {
    let semi = rest.find(';')?;
    let body = &rest[..semi];
    let valid = if let Some(hex) = body.strip_prefix("#x") {
        (1..=6).contains(&hex.len()) && hex.chars().all(|c| c.is_ascii_hexdigit())
    } else if let Some(dec) = body.strip_prefix('#') {
        (1..=6).contains(&dec.len()) && dec.chars().all(|c| c.is_ascii_digit())
    } else {
        !body.is_empty() && body.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    };
    valid.then_some(semi + 1)
}
