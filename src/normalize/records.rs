//! Child record expansion
//!
//! Comments, changelog items, links, components and labels embedded in an issue each become
//! their own record carrying `issue_key`. Time in status is derived from the status changes in
//! the changelog.

use super::fields::{
    coerce_scalar, flatten_into, optional_str, required_id, required_timestamp, strip_markup, text_or_null,
};
use super::{IssueView, SchemaError, SchemaResult};
use crate::{FieldValue, NormalizedRecord, RecordType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

fn child(id: String, record_type: RecordType, issue: &IssueView<'_>, last_modified: DateTime<Utc>) -> NormalizedRecord {
    NormalizedRecord::new(id, record_type, last_modified)
        .with_field("issue_key", FieldValue::Text(issue.key.clone()))
}

fn array_field<'a>(container: &'a Map<String, Value>, field: &str, record: &str) -> SchemaResult<&'a Vec<Value>> {
    match container.get(field) {
        Some(Value::Array(items)) => Ok(items),
        None | Some(Value::Null) => Err(SchemaError::missing(record, field)),
        Some(_) => Err(SchemaError::wrong_shape(record, field, "array")),
    }
}

fn object_item<'a>(item: &'a Value, field: &str, record: &str) -> SchemaResult<&'a Map<String, Value>> {
    item.as_object()
        .ok_or_else(|| SchemaError::wrong_shape(record, field, "array of objects"))
}

fn person(value: Option<&Value>) -> FieldValue {
    let name = value
        .and_then(Value::as_object)
        .and_then(|p| optional_str(p, "displayName").or_else(|| optional_str(p, "name")));
    text_or_null(name)
}

/// One record per comment, keyed by comment id
pub(super) fn comments(issue: &IssueView<'_>) -> SchemaResult<Vec<NormalizedRecord>> {
    let container = match issue.fields.get("comment") {
        Some(Value::Object(container)) => container,
        None | Some(Value::Null) => return Err(SchemaError::missing(&issue.key, "comment")),
        Some(_) => return Err(SchemaError::wrong_shape(&issue.key, "comment", "object")),
    };
    let items = array_field(container, "comments", &issue.key)?;

    items
        .iter()
        .map(|item| {
            let comment = object_item(item, "comment.comments", &issue.key)?;
            let id = required_id(comment, "id", &issue.key)?;
            let updated = required_timestamp(comment, "updated", &id)?;
            let mut record = child(id.clone(), RecordType::Comment, issue, updated);

            for (name, value) in comment {
                match name.as_str() {
                    "id" | "updated" => {}
                    "self" => {
                        record.extra.insert(name.clone(), value.clone());
                    }
                    "body" => {
                        let body = match value {
                            Value::String(body) => FieldValue::Text(strip_markup(body)),
                            Value::Null => FieldValue::Null,
                            _ => return Err(SchemaError::wrong_shape(&id, "body", "string")),
                        };
                        record.fields.insert("body".to_string(), body);
                    }
                    _ => flatten_into(name, value, 0, &id, &mut record.fields)?,
                }
            }
            Ok(record)
        })
        .collect()
}

/// One record per changed field, keyed `ISSUE:historyId:itemIndex`
pub(super) fn change_history(issue: &IssueView<'_>) -> SchemaResult<Vec<NormalizedRecord>> {
    let changelog = match issue.raw.get("changelog") {
        Some(Value::Object(changelog)) => changelog,
        None | Some(Value::Null) => return Err(SchemaError::missing(&issue.key, "changelog")),
        Some(_) => return Err(SchemaError::wrong_shape(&issue.key, "changelog", "object")),
    };
    let histories = array_field(changelog, "histories", &issue.key)?;

    let mut records = Vec::new();
    for history in histories {
        let history = object_item(history, "changelog.histories", &issue.key)?;
        let history_id = required_id(history, "id", &issue.key)?;
        let history_ref = format!("{}:{}", issue.key, history_id);
        let created = required_timestamp(history, "created", &history_ref)?;
        let author = person(history.get("author"));
        let items = array_field(history, "items", &history_ref)?;

        for (index, item) in items.iter().enumerate() {
            let item = object_item(item, "items", &history_ref)?;
            let id = format!("{}:{}", history_ref, index);
            let field = match item.get("field") {
                Some(Value::String(field)) => field.clone(),
                None | Some(Value::Null) => return Err(SchemaError::missing(&id, "field")),
                Some(_) => return Err(SchemaError::wrong_shape(&id, "field", "string")),
            };
            let record = child(id, RecordType::ChangeHistory, issue, created)
                .with_field("history_id", FieldValue::Text(history_id.clone()))
                .with_field("author", author.clone())
                .with_field("field", FieldValue::Text(field))
                .with_field("field_type", text_or_null(optional_str(item, "fieldtype")))
                .with_field("from", text_or_null(optional_str(item, "fromString")))
                .with_field("to", text_or_null(optional_str(item, "toString")))
                .with_field("from_id", text_or_null(optional_str(item, "from")))
                .with_field("to_id", text_or_null(optional_str(item, "to")));
            records.push(record);
        }
    }
    Ok(records)
}

/// One record per issue link, keyed by link id
pub(super) fn issue_links(issue: &IssueView<'_>) -> SchemaResult<Vec<NormalizedRecord>> {
    let links = array_field(issue.fields, "issuelinks", &issue.key)?;

    links
        .iter()
        .map(|link| {
            let link = object_item(link, "issuelinks", &issue.key)?;
            let id = required_id(link, "id", &issue.key)?;
            let link_type = link.get("type").and_then(Value::as_object);
            let linked_key = |side: &str| {
                link.get(side)
                    .and_then(Value::as_object)
                    .and_then(|linked| optional_str(linked, "key"))
            };
            let direction = if link.contains_key("inwardIssue") {
                "inward"
            } else {
                "outward"
            };

            Ok(child(id, RecordType::IssueLink, issue, issue.updated)
                .with_field("link_type", text_or_null(link_type.and_then(|t| optional_str(t, "name"))))
                .with_field(
                    "inward_description",
                    text_or_null(link_type.and_then(|t| optional_str(t, "inward"))),
                )
                .with_field(
                    "outward_description",
                    text_or_null(link_type.and_then(|t| optional_str(t, "outward"))),
                )
                .with_field("inward_issue_key", text_or_null(linked_key("inwardIssue")))
                .with_field("outward_issue_key", text_or_null(linked_key("outwardIssue")))
                .with_field("direction", FieldValue::Text(direction.to_string())))
        })
        .collect()
}

/// One record per component, keyed `ISSUE:componentId`
pub(super) fn components(issue: &IssueView<'_>) -> SchemaResult<Vec<NormalizedRecord>> {
    let components = array_field(issue.fields, "components", &issue.key)?;

    components
        .iter()
        .map(|component| {
            let component = object_item(component, "components", &issue.key)?;
            let component_id = required_id(component, "id", &issue.key)?;
            let id = format!("{}:{}", issue.key, component_id);
            let description = match component.get("description") {
                Some(value) => coerce_scalar("description", "description", value, &id)?,
                None => FieldValue::Null,
            };
            Ok(child(id, RecordType::Component, issue, issue.updated)
                .with_field("component_id", FieldValue::Text(component_id))
                .with_field("name", text_or_null(optional_str(component, "name")))
                .with_field("description", description))
        })
        .collect()
}

/// One record per label, keyed `ISSUE:label`
pub(super) fn labels(issue: &IssueView<'_>) -> SchemaResult<Vec<NormalizedRecord>> {
    let labels = array_field(issue.fields, "labels", &issue.key)?;

    labels
        .iter()
        .map(|label| {
            let label = label
                .as_str()
                .ok_or_else(|| SchemaError::wrong_shape(&issue.key, "labels", "array of strings"))?;
            Ok(child(format!("{}:{}", issue.key, label), RecordType::Label, issue, issue.updated)
                .with_field("label", FieldValue::Text(label.to_string())))
        })
        .collect()
}

/// Status change pulled from one changelog item
struct StatusChange {
    at: DateTime<Utc>,
    history_id: String,
    from: Option<String>,
    to: String,
}

#[derive(Default)]
struct StatusSpan {
    seconds: i64,
    entered: u64,
    first_entered: Option<DateTime<Utc>>,
}

fn status_changes(issue: &IssueView<'_>) -> SchemaResult<Vec<StatusChange>> {
    let changelog = match issue.raw.get("changelog") {
        Some(Value::Object(changelog)) => changelog,
        None | Some(Value::Null) => return Err(SchemaError::missing(&issue.key, "changelog")),
        Some(_) => return Err(SchemaError::wrong_shape(&issue.key, "changelog", "object")),
    };
    let mut changes = Vec::new();
    for history in array_field(changelog, "histories", &issue.key)? {
        let history = object_item(history, "changelog.histories", &issue.key)?;
        let history_id = required_id(history, "id", &issue.key)?;
        let history_ref = format!("{}:{}", issue.key, history_id);
        for item in array_field(history, "items", &history_ref)? {
            let item = object_item(item, "items", &history_ref)?;
            if optional_str(item, "field") != Some("status") {
                continue;
            }
            let to = optional_str(item, "toString")
                .ok_or_else(|| SchemaError::missing(&history_ref, "toString"))?;
            changes.push(StatusChange {
                at: required_timestamp(history, "created", &history_ref)?,
                history_id: history_id.clone(),
                from: optional_str(item, "fromString").map(str::to_string),
                to: to.to_string(),
            });
        }
    }
    // Jira returns histories newest first on some versions
    changes.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.history_id.cmp(&b.history_id)));
    Ok(changes)
}

fn current_status(issue: &IssueView<'_>) -> SchemaResult<String> {
    match issue.fields.get("status") {
        Some(Value::Object(status)) => optional_str(status, "name")
            .map(str::to_string)
            .ok_or_else(|| SchemaError::missing(&issue.key, "status.name")),
        None | Some(Value::Null) => Err(SchemaError::missing(&issue.key, "status")),
        Some(_) => Err(SchemaError::wrong_shape(&issue.key, "status", "object")),
    }
}

/// One record per status the issue has held, keyed `ISSUE:status`
///
/// Intervals run from `created` through each status change; the last one closes at the
/// issue's `updated` timestamp so reruns over unchanged issues produce the same durations.
/// Status names are compared case-insensitively and reported in lowercase.
pub(super) fn time_in_status(issue: &IssueView<'_>) -> SchemaResult<Vec<NormalizedRecord>> {
    let created = required_timestamp(issue.fields, "created", &issue.key)?;
    let changes = status_changes(issue)?;

    let initial = match changes.first() {
        Some(first) => match &first.from {
            Some(from) => from.clone(),
            None => current_status(issue)?,
        },
        None => current_status(issue)?,
    };

    let mut spans: BTreeMap<String, StatusSpan> = BTreeMap::new();
    let mut enter = |status: &str, at: DateTime<Utc>| {
        let span = spans.entry(status.trim().to_lowercase()).or_default();
        span.entered += 1;
        span.first_entered.get_or_insert(at);
    };
    enter(&initial, created);

    let mut status = initial.trim().to_lowercase();
    let mut since = created;
    let mut intervals = Vec::with_capacity(changes.len() + 1);
    for change in &changes {
        intervals.push((status.clone(), since, change.at));
        enter(&change.to, change.at);
        status = change.to.trim().to_lowercase();
        since = change.at;
    }
    intervals.push((status, since, issue.updated));

    for (status, from, to) in intervals {
        if let Some(span) = spans.get_mut(&status) {
            span.seconds += (to - from).num_seconds().max(0);
        }
    }

    Ok(spans
        .into_iter()
        .map(|(status, span)| {
            let seconds = span.seconds;
            let mut record = child(
                format!("{}:{}", issue.key, status),
                RecordType::TimeInStatus,
                issue,
                issue.updated,
            )
            .with_field("status", FieldValue::Text(status))
            .with_field("seconds", FieldValue::Number(Decimal::from(seconds)))
            .with_field("days", FieldValue::Number(Decimal::from(seconds / 86_400)))
            .with_field("hours", FieldValue::Number(Decimal::from(seconds % 86_400 / 3_600)))
            .with_field("minutes", FieldValue::Number(Decimal::from(seconds % 3_600 / 60)))
            .with_field("times_entered", FieldValue::Number(Decimal::from(span.entered)));
            if let Some(first) = span.first_entered {
                record = record.with_field("first_entered", FieldValue::Timestamp(first));
            }
            record
        })
        .collect())
}

fn count(value: Option<&Value>) -> Option<u64> {
    value.and_then(Value::as_array).map(|items| items.len() as u64)
}

/// Counts and age derived from fields already on the issue
///
/// Each count is emitted only when its source field was returned. `open_days` is whole days
/// from `created` to `resolutiondate`, or to `updated` while unresolved.
pub(super) fn derived_issue_fields(issue: &IssueView<'_>) -> SchemaResult<Vec<(&'static str, FieldValue)>> {
    let mut derived = Vec::new();

    let comments = issue.fields.get("comment").and_then(Value::as_object).and_then(|comment| {
        comment
            .get("total")
            .and_then(Value::as_u64)
            .or_else(|| count(comment.get("comments")))
    });
    let counts = [
        ("comment_count", comments),
        ("linked_issue_count", count(issue.fields.get("issuelinks"))),
        ("label_count", count(issue.fields.get("labels"))),
        ("component_count", count(issue.fields.get("components"))),
    ];
    for (name, value) in counts {
        if let Some(n) = value {
            derived.push((name, FieldValue::Number(Decimal::from(n))));
        }
    }

    if matches!(issue.fields.get("created"), Some(Value::String(_))) {
        let created = required_timestamp(issue.fields, "created", &issue.key)?;
        let closed = match issue.fields.get("resolutiondate") {
            Some(Value::String(_)) => required_timestamp(issue.fields, "resolutiondate", &issue.key)?,
            _ => issue.updated,
        };
        let days = (closed - created).num_days().max(0);
        derived.push(("open_days", FieldValue::Number(Decimal::from(days))));
    }

    Ok(derived)
}
