//! Shutdown requests stop runs between pages and leave resumable checkpoints

use crate::common::{demo_query, raw_issue, test_executor, OffsetIssueSource};
use async_trait::async_trait;
use jira_extractor::auth::Session;
use jira_extractor::extractor::{ErrorKind, ExtractionStatus, RunState};
use jira_extractor::fetcher::{Cursor, FetcherResult, PageRequest, PageResult, PageSource, TransientKind, TransportError};
use jira_extractor::resume::CheckpointStatus;
use jira_extractor::shutdown::{ShutdownCoordinator, SharedShutdown};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Serves 300 issues by offset and requests shutdown while serving page two
struct ShutdownOnSecondPage {
    shutdown: SharedShutdown,
}

#[async_trait]
impl PageSource for ShutdownOnSecondPage {
    async fn fetch_page(&self, _session: &Session, request: &PageRequest<'_>) -> FetcherResult<PageResult> {
        if request.page_number() == 2 {
            self.shutdown.request_shutdown();
        }
        let start = request.start_at();
        let end = (start + u64::from(request.page_size())).min(300);
        let next = (end < 300).then_some(Cursor::Offset(end));
        Ok(PageResult::new((start..end).map(raw_issue).collect(), next).with_total(300))
    }

    fn endpoint(&self) -> &str {
        "/rest/api/2/search"
    }
}

#[tokio::test]
async fn test_shutdown_finishes_current_page_then_stops() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let source = Arc::new(ShutdownOnSecondPage {
        shutdown: shutdown.clone(),
    });
    let executor = test_executor(dir.path(), source).with_shutdown(shutdown);
    let query = demo_query();

    let result = executor.run_extraction(&query).await;

    assert_eq!(result.status, ExtractionStatus::Cancelled);
    assert_eq!(result.last_error.as_ref().unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(result.pages_fetched, 2);
    assert_eq!(result.records_written, 200);
    assert_eq!(result.state_history.last(), Some(&RunState::Cancelled));

    let entry = executor.checkpoint_store().load(&query.query_hash()).unwrap().unwrap();
    assert_eq!(entry.status(), CheckpointStatus::InProgress);
    assert_eq!(entry.cursor(), Some(&Cursor::Offset(200)));

    let source = OffsetIssueSource::new(300);
    let resumed = test_executor(dir.path(), source.clone()).run_extraction(&query).await;
    assert!(resumed.is_complete());
    assert_eq!(resumed.records_written, 300);
    assert_eq!(source.calls(), 1);
}

struct AlwaysRateLimited;

#[async_trait]
impl PageSource for AlwaysRateLimited {
    async fn fetch_page(&self, _session: &Session, _request: &PageRequest<'_>) -> FetcherResult<PageResult> {
        Err(TransportError::Transient {
            kind: TransientKind::RateLimited,
            message: "HTTP 429".to_string(),
            retry_after: Some(Duration::from_secs(120)),
            attempts: 1,
        })
    }

    fn endpoint(&self) -> &str {
        "/rest/api/2/search"
    }
}

#[tokio::test]
async fn test_shutdown_interrupts_backoff_wait() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let executor = test_executor(dir.path(), Arc::new(AlwaysRateLimited)).with_shutdown(shutdown.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.request_shutdown();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), executor.run_extraction(&demo_query()))
        .await
        .expect("shutdown should cut the 120s Retry-After wait short");

    assert_eq!(result.status, ExtractionStatus::Cancelled);
    assert_eq!(result.records_written, 0);
}
