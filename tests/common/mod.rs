//! Shared fixtures: an in-memory issue source and a static credential provider

use async_trait::async_trait;
use jira_extractor::auth::{AuthError, CredentialProvider, SecretToken, Session};
use jira_extractor::extractor::config::BackoffPolicy;
use jira_extractor::extractor::{ExtractionExecutor, RateLimiter};
use jira_extractor::fetcher::{Cursor, FetcherResult, PageRequest, PageResult, PageSource};
use jira_extractor::{QueryDescriptor, RecordType};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Provider that always hands out a one-hour session
pub struct StaticProvider;

#[async_trait]
impl CredentialProvider for StaticProvider {
    async fn acquire(&self) -> Result<Session, AuthError> {
        Ok(Session::new(
            "https://jira.example.com",
            SecretToken::new("test-token"),
            Duration::from_secs(3600),
        ))
    }
}

/// Raw issue as returned by the search endpoint
pub fn raw_issue(n: u64) -> Value {
    json!({
        "id": (10000 + n).to_string(),
        "key": format!("DEMO-{n:04}"),
        "fields": {
            "summary": format!("Issue number {n}"),
            "priority": {"name": if n % 2 == 0 { "High" } else { "Low" }},
            "storyPoints": n % 8,
            "updated": "2024-03-01T12:30:00.000+0000"
        }
    })
}

/// Serves `total` issues by offset and counts the calls it receives
pub struct OffsetIssueSource {
    total: u64,
    calls: AtomicU32,
}

impl OffsetIssueSource {
    pub fn new(total: u64) -> Arc<Self> {
        Arc::new(Self {
            total,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for OffsetIssueSource {
    async fn fetch_page(&self, _session: &Session, request: &PageRequest<'_>) -> FetcherResult<PageResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let start = request.start_at();
        let end = (start + u64::from(request.page_size())).min(self.total);
        let records = (start..end).map(raw_issue).collect();
        let next = (end < self.total).then_some(Cursor::Offset(end));
        Ok(PageResult::new(records, next).with_total(self.total))
    }

    fn endpoint(&self) -> &str {
        "/rest/api/2/search"
    }
}

/// Executor rooted in `dir` with a generous limiter and millisecond backoff
pub fn test_executor(dir: &Path, source: Arc<dyn PageSource>) -> ExtractionExecutor {
    ExtractionExecutor::new(
        Arc::new(StaticProvider),
        source,
        dir.join("data"),
        dir.join("checkpoints"),
    )
    .unwrap()
    .with_rate_limiter(Arc::new(RateLimiter::per_window(10_000, Duration::from_millis(1))))
    .with_backoff(BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(5)))
}

/// Every issue of the demo project, 100 per page
pub fn demo_query() -> QueryDescriptor {
    QueryDescriptor::for_project("DEMO", RecordType::Issue).with_page_size(100)
}
