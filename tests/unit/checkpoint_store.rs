//! Checkpoint store durability and validation

use jira_extractor::fetcher::Cursor;
use jira_extractor::resume::{CheckpointEntry, CheckpointStatus, CheckpointStore, ResumeError};
use jira_extractor::{QueryDescriptor, RecordType};
use serde_json::Value;
use tempfile::TempDir;

fn query() -> QueryDescriptor {
    QueryDescriptor::new("project = DEMO ORDER BY key ASC", RecordType::Issue)
}

#[test]
fn test_commit_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let hash = query().query_hash();
    {
        let store = CheckpointStore::new(dir.path()).unwrap();
        store
            .commit(&query(), CheckpointEntry::new(Some(Cursor::Offset(300)), 3, 300).with_skipped(2))
            .unwrap();
    }

    let reopened = CheckpointStore::new(dir.path()).unwrap();
    let entry = reopened.load(&hash).unwrap().unwrap();
    assert_eq!(entry.cursor(), Some(&Cursor::Offset(300)));
    assert_eq!(entry.pages_committed(), 3);
    assert_eq!(entry.records_written(), 300);
    assert_eq!(entry.records_skipped(), 2);
    assert_eq!(entry.status(), CheckpointStatus::InProgress);
}

#[test]
fn test_checkpoint_file_layout() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    store
        .commit(&query(), CheckpointEntry::new(Some(Cursor::Token("abc".into())), 1, 100))
        .unwrap();

    let path = store.path_for(&query().query_hash());
    let json: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["schema_version"], "1.0.0");
    assert_eq!(json["query_hash"], query().query_hash());
    assert_eq!(json["query"]["jql"], "project = DEMO ORDER BY key ASC");
    assert_eq!(json["entry"]["cursor"]["kind"], "token");
    assert_eq!(json["entry"]["cursor"]["value"], "abc");
    assert_eq!(json["entry"]["status"], "in_progress");
}

#[test]
fn test_tampered_query_rejected() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    store.commit(&query(), CheckpointEntry::new(None, 1, 10)).unwrap();

    let path = store.path_for(&query().query_hash());
    let tampered = std::fs::read_to_string(&path)
        .unwrap()
        .replace("project = DEMO", "project = OTHER");
    std::fs::write(&path, tampered).unwrap();

    assert!(matches!(
        store.load(&query().query_hash()),
        Err(ResumeError::HashMismatch { .. })
    ));
    let reports = store.verify().unwrap();
    assert_eq!(reports.len(), 1);
    assert!(!reports[0].is_ok());
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn test_truncated_file_rejected() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    std::fs::write(store.path_for(&query().query_hash()), "{\"schema_version\": \"1.0").unwrap();

    assert!(matches!(
        store.load(&query().query_hash()),
        Err(ResumeError::DeserializationError(_))
    ));
}

#[test]
fn test_failed_then_complete() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    store
        .commit(&query(), CheckpointEntry::new(Some(Cursor::Offset(100)), 1, 100))
        .unwrap();

    let failed = store.mark_failed(&query(), "HTTP 503").unwrap();
    assert_eq!(failed.status(), CheckpointStatus::Failed);
    assert_eq!(failed.cursor(), Some(&Cursor::Offset(100)));
    assert_eq!(failed.last_error(), Some("HTTP 503"));

    let complete = store.mark_complete(&query()).unwrap();
    assert!(complete.is_complete());
    assert_eq!(complete.last_error(), None);
    assert_eq!(complete.records_written(), 100);
}

#[test]
fn test_purge_removes_checkpoint() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path()).unwrap();
    store.commit(&query(), CheckpointEntry::new(None, 1, 1)).unwrap();

    assert!(store.purge(&query().query_hash()).unwrap());
    assert!(!store.purge(&query().query_hash()).unwrap());
    assert!(store.load(&query().query_hash()).unwrap().is_none());
    assert!(!store.path_for(&query().query_hash()).exists());
}
