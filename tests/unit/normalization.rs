//! Normalization of raw issues into dataset rows

use jira_extractor::normalize::{normalize_page, SchemaError};
use jira_extractor::output::{CsvDatasetWriter, DatasetWriter};
use jira_extractor::{FieldValue, QueryDescriptor, RecordType};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tempfile::TempDir;

fn issue_with_comments() -> Value {
    json!({
        "id": "10042",
        "key": "DEMO-42",
        "fields": {
            "summary": "Export is slow",
            "updated": "2024-05-02T09:15:00.000+0000",
            "labels": ["perf"],
            "comment": {
                "total": 2,
                "comments": [
                    {
                        "id": "501",
                        "author": {"displayName": "Alice"},
                        "body": "<p>Seen on <b>prod</b> and staging</p>",
                        "created": "2024-05-01T10:00:00.000+0000",
                        "updated": "2024-05-01T10:00:00.000+0000"
                    },
                    {
                        "id": "502",
                        "author": {"displayName": "Bob"},
                        "body": "Fixed in 2.4",
                        "created": "2024-05-02T09:00:00.000+0000",
                        "updated": "2024-05-02T09:10:00.000+0000"
                    }
                ]
            }
        }
    })
}

#[test]
fn test_comment_records_keyed_by_comment_id() {
    let query = QueryDescriptor::new("project = DEMO", RecordType::Comment);
    let records = normalize_page(&issue_with_comments(), &query).unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, "501");
    assert_eq!(records[0].record_type, RecordType::Comment);
    assert_eq!(records[0].fields["issue_key"], FieldValue::Text("DEMO-42".into()));
    assert_eq!(records[0].fields["body"], FieldValue::Text("Seen on prod and staging".into()));
    assert_eq!(records[1].fields["author.displayName"], FieldValue::Text("Bob".into()));
}

#[test]
fn test_comment_dataset_contents() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("comments.csv");
    let query = QueryDescriptor::new("project = DEMO", RecordType::Comment);
    let records = normalize_page(&issue_with_comments(), &query).unwrap();

    let mut writer = CsvDatasetWriter::open(&path).unwrap();
    assert_eq!(writer.write(&records).unwrap(), 2);

    let contents = std::fs::read_to_string(&path).unwrap();
    let mut lines = contents.lines();
    assert_eq!(
        lines.next(),
        Some("id,record_type,last_modified,author.displayName,body,created,issue_key,_extra")
    );
    assert_eq!(
        lines.next(),
        Some("501,comment,2024-05-01T10:00:00.000Z,Alice,Seen on prod and staging,2024-05-01T10:00:00.000Z,DEMO-42,")
    );
    assert_eq!(
        lines.next(),
        Some("502,comment,2024-05-02T09:10:00.000Z,Bob,Fixed in 2.4,2024-05-02T09:00:00.000Z,DEMO-42,")
    );
    assert_eq!(lines.next(), None);
}

#[test]
fn test_label_records() {
    let query = QueryDescriptor::new("project = DEMO", RecordType::Label);
    let records = normalize_page(&issue_with_comments(), &query).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "DEMO-42:perf");
    assert_eq!(records[0].fields["label"], FieldValue::Text("perf".into()));
}

#[test]
fn test_missing_comment_container_is_schema_error() {
    let mut issue = issue_with_comments();
    issue["fields"].as_object_mut().unwrap().remove("comment");
    let query = QueryDescriptor::new("project = DEMO", RecordType::Comment);

    assert_eq!(
        normalize_page(&issue, &query).unwrap_err(),
        SchemaError::MissingField {
            record: "DEMO-42".to_string(),
            field: "comment".to_string(),
        }
    );
}

#[test]
fn test_wrong_field_type_is_schema_error() {
    let mut issue = issue_with_comments();
    issue["fields"]["updated"] = json!(1714641300);
    let query = QueryDescriptor::new("project = DEMO", RecordType::Issue);

    assert!(normalize_page(&issue, &query).is_err());
}

fn issue_with_status_changes() -> Value {
    let mut issue = issue_with_comments();
    issue["fields"]["created"] = json!("2024-05-01T09:15:00.000+0000");
    issue["fields"]["status"] = json!({"name": "Done"});
    issue["changelog"] = json!({
        "histories": [{
            "id": "900",
            "author": {"displayName": "Alice"},
            "created": "2024-05-01T10:45:00.000+0000",
            "items": [{"field": "status", "fromString": "Open", "toString": "Done"}]
        }]
    });
    issue
}

#[test]
fn test_time_in_status_dataset_contents() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("time_in_status.csv");
    let query = QueryDescriptor::new("project = DEMO", RecordType::TimeInStatus);
    let records = normalize_page(&issue_with_status_changes(), &query).unwrap();

    let mut writer = CsvDatasetWriter::open(&path).unwrap();
    assert_eq!(writer.write(&records).unwrap(), 2);

    let contents = std::fs::read_to_string(&path).unwrap();
    let mut lines = contents.lines();
    assert_eq!(
        lines.next(),
        Some("id,record_type,last_modified,days,first_entered,hours,issue_key,minutes,seconds,status,times_entered,_extra")
    );
    assert_eq!(
        lines.next(),
        Some("DEMO-42:done,time_in_status,2024-05-02T09:15:00.000Z,0,2024-05-01T10:45:00.000Z,22,DEMO-42,30,81000,done,1,")
    );
    assert_eq!(
        lines.next(),
        Some("DEMO-42:open,time_in_status,2024-05-02T09:15:00.000Z,0,2024-05-01T09:15:00.000Z,1,DEMO-42,30,5400,open,1,")
    );
    assert_eq!(lines.next(), None);
}

#[test]
fn test_issue_record_carries_derived_counts() {
    let query = QueryDescriptor::new("project = DEMO", RecordType::Issue);
    let records = normalize_page(&issue_with_status_changes(), &query).unwrap();

    let issue = &records[0];
    assert_eq!(issue.fields["comment_count"], FieldValue::Number(Decimal::from(2)));
    assert_eq!(issue.fields["label_count"], FieldValue::Number(Decimal::from(1)));
    assert_eq!(issue.fields["open_days"], FieldValue::Number(Decimal::from(1)));
    assert!(!issue.fields.contains_key("linked_issue_count"));
}
