//! End-to-end extraction runs against an in-memory page source

use crate::common::{demo_query, test_executor, OffsetIssueSource};
use async_trait::async_trait;
use jira_extractor::auth::Session;
use jira_extractor::extractor::{ErrorKind, ExtractionStatus, RunState};
use jira_extractor::fetcher::{Cursor, FetcherResult, PageRequest, PageResult, PageSource};
use jira_extractor::output::{CsvDatasetWriter, DatasetWriter, OutputError, OutputResult, WriterFactory};
use jira_extractor::resume::CheckpointStatus;
use jira_extractor::NormalizedRecord;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// CSV writer that fails on the n-th write call across every writer it creates
struct FlakyWriter {
    inner: CsvDatasetWriter,
    calls: Arc<AtomicU32>,
    fail_on: u32,
}

impl DatasetWriter for FlakyWriter {
    fn write(&mut self, records: &[NormalizedRecord]) -> OutputResult<u64> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(OutputError::IoError("No space left on device".to_string()));
        }
        self.inner.write(records)
    }

    fn destination(&self) -> &Path {
        self.inner.destination()
    }
}

fn flaky_factory(fail_on: u32) -> WriterFactory {
    let calls = Arc::new(AtomicU32::new(0));
    Arc::new(move |path: &Path| {
        Ok(Box::new(FlakyWriter {
            inner: CsvDatasetWriter::open(path)?,
            calls: calls.clone(),
            fail_on,
        }) as Box<dyn DatasetWriter>)
    })
}

#[tokio::test]
async fn test_full_extraction_three_pages() {
    let dir = TempDir::new().unwrap();
    let source = OffsetIssueSource::new(250);
    let executor = test_executor(dir.path(), source.clone());
    let query = demo_query();

    let result = executor.run_extraction(&query).await;

    assert_eq!(result.status, ExtractionStatus::Complete);
    assert_eq!(result.records_written, 250);
    assert_eq!(result.pages_fetched, 3);
    assert!(!result.resumed);
    assert_eq!(source.calls(), 3);

    let dataset = CsvDatasetWriter::open(&result.destination).unwrap();
    assert_eq!(dataset.len(), 250);
    let row = dataset.row("DEMO-0249").unwrap();
    assert_eq!(row.get("summary").map(String::as_str), Some("Issue number 249"));
    assert_eq!(row.get("priority.name").map(String::as_str), Some("Low"));
    assert_eq!(row.get("last_modified").map(String::as_str), Some("2024-03-01T12:30:00.000Z"));

    let entry = executor.checkpoint_store().load(&query.query_hash()).unwrap().unwrap();
    assert_eq!(entry.status(), CheckpointStatus::Complete);
    assert_eq!(entry.pages_committed(), 3);
    assert_eq!(entry.cursor(), None);
}

#[tokio::test]
async fn test_failed_write_resumes_from_last_committed_page() {
    let dir = TempDir::new().unwrap();
    let query = demo_query();

    let source = OffsetIssueSource::new(250);
    let failing = test_executor(dir.path(), source.clone()).with_writer_factory(flaky_factory(2));
    let failed = failing.run_extraction(&query).await;

    assert_eq!(failed.status, ExtractionStatus::Failed);
    let failure = failed.last_error.clone().unwrap();
    assert_eq!(failure.kind, ErrorKind::Io);
    assert_eq!(failure.page_number, 2);
    assert_eq!(failure.cursor, Some(Cursor::Offset(100)));
    assert_eq!(failed.records_written, 100);
    assert_eq!(failed.state_history.last(), Some(&RunState::Failed));

    let entry = failing.checkpoint_store().load(&query.query_hash()).unwrap().unwrap();
    assert_eq!(entry.status(), CheckpointStatus::Failed);
    assert_eq!(entry.cursor(), Some(&Cursor::Offset(100)));
    assert_eq!(entry.pages_committed(), 1);
    assert_eq!(entry.records_written(), 100);
    assert!(entry.last_error().unwrap().contains("No space left"));

    let resumed_source = OffsetIssueSource::new(250);
    let resumed = test_executor(dir.path(), resumed_source.clone())
        .run_extraction(&query)
        .await;

    assert!(resumed.is_complete());
    assert!(resumed.resumed);
    assert_eq!(resumed.records_written, 250);
    assert_eq!(resumed.pages_fetched, 3);
    assert_eq!(resumed_source.calls(), 2);
    assert_eq!(CsvDatasetWriter::open(&resumed.destination).unwrap().len(), 250);
}

#[tokio::test]
async fn test_resumed_dataset_matches_uninterrupted_dataset() {
    let query = demo_query();

    let clean_dir = TempDir::new().unwrap();
    let clean = test_executor(clean_dir.path(), OffsetIssueSource::new(250))
        .run_extraction(&query)
        .await;
    assert!(clean.is_complete());

    let interrupted_dir = TempDir::new().unwrap();
    let failed = test_executor(interrupted_dir.path(), OffsetIssueSource::new(250))
        .with_writer_factory(flaky_factory(3))
        .run_extraction(&query)
        .await;
    assert_eq!(failed.status, ExtractionStatus::Failed);
    let resumed = test_executor(interrupted_dir.path(), OffsetIssueSource::new(250))
        .run_extraction(&query)
        .await;
    assert!(resumed.is_complete());

    let clean_bytes = std::fs::read(&clean.destination).unwrap();
    let resumed_bytes = std::fs::read(&resumed.destination).unwrap();
    assert_eq!(clean_bytes, resumed_bytes);
}

#[tokio::test]
async fn test_forced_rerun_rewrites_identical_dataset() {
    let dir = TempDir::new().unwrap();
    let query = demo_query();

    let first = test_executor(dir.path(), OffsetIssueSource::new(120))
        .run_extraction(&query)
        .await;
    let first_bytes = std::fs::read(&first.destination).unwrap();

    let second = test_executor(dir.path(), OffsetIssueSource::new(120))
        .with_force(true)
        .run_extraction(&query)
        .await;
    assert!(second.is_complete());
    assert_eq!(std::fs::read(&second.destination).unwrap(), first_bytes);
}

/// Token-paged source that hands out the same continuation forever
struct StuckTokenSource;

#[async_trait]
impl PageSource for StuckTokenSource {
    async fn fetch_page(&self, _session: &Session, request: &PageRequest<'_>) -> FetcherResult<PageResult> {
        let n = request.page_number();
        let issue = json!({
            "id": n.to_string(),
            "key": format!("DEMO-{n}"),
            "fields": {"summary": "stuck", "updated": "2024-03-01T00:00:00.000+0000"}
        });
        Ok(PageResult::new(vec![issue], Some(Cursor::Token("same-token".to_string()))))
    }

    fn endpoint(&self) -> &str {
        "/rest/api/2/search"
    }
}

#[tokio::test]
async fn test_repeated_token_is_a_pagination_stall() {
    let dir = TempDir::new().unwrap();
    let executor = test_executor(dir.path(), Arc::new(StuckTokenSource));
    let query = demo_query();

    let result = executor.run_extraction(&query).await;

    assert_eq!(result.status, ExtractionStatus::Failed);
    let failure = result.last_error.unwrap();
    assert_eq!(failure.kind, ErrorKind::PaginationStall);
    assert_eq!(failure.page_number, 2);
    assert_eq!(failure.cursor, Some(Cursor::Token("same-token".to_string())));

    // The first page was committed; the stalled page was not.
    assert_eq!(result.records_written, 1);
    let entry = executor.checkpoint_store().load(&query.query_hash()).unwrap().unwrap();
    assert_eq!(entry.pages_committed(), 1);
}

#[tokio::test]
async fn test_independent_queries_share_one_executor() {
    let dir = TempDir::new().unwrap();
    let executor = test_executor(dir.path(), OffsetIssueSource::new(40));
    let queries = vec![
        demo_query().with_label("all-issues"),
        demo_query().with_page_size(15).with_label("small-pages"),
    ];

    let results = executor.run_many(&queries, 2).await;

    assert!(results.iter().all(|r| r.is_complete()));
    assert_eq!(results[0].pages_fetched, 1);
    assert_eq!(results[1].pages_fetched, 3);
    assert_ne!(results[0].destination, results[1].destination);
    assert_eq!(executor.checkpoint_store().list().unwrap().len(), 2);
}
