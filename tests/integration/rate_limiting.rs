//! Shared request budget across pages and concurrent queries

use crate::common::{demo_query, test_executor, OffsetIssueSource};
use jira_extractor::extractor::RateLimiter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[test]
fn test_zero_budget_raised_to_one() {
    let limiter = RateLimiter::per_window(0, Duration::from_secs(60));
    assert_eq!(limiter.max_requests(), 1);
    assert_eq!(limiter.available_permits(), 1);
}

#[tokio::test]
async fn test_permits_held_for_full_window() {
    let limiter = RateLimiter::per_window(2, Duration::from_millis(150));

    let start = Instant::now();
    limiter.acquire().await.unwrap();
    limiter.acquire().await.unwrap();
    assert_eq!(limiter.available_permits(), 0);
    assert!(start.elapsed() < Duration::from_millis(100));

    limiter.acquire().await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(140));
}

#[tokio::test]
async fn test_pages_wait_for_budget() {
    let dir = TempDir::new().unwrap();
    let source = OffsetIssueSource::new(50);
    let executor = test_executor(dir.path(), source.clone())
        .with_rate_limiter(Arc::new(RateLimiter::per_window(3, Duration::from_millis(200))));

    let start = Instant::now();
    let result = executor.run_extraction(&demo_query().with_page_size(10)).await;

    assert!(result.is_complete());
    assert_eq!(source.calls(), 5);
    // Pages four and five cannot start inside the first window.
    assert!(start.elapsed() >= Duration::from_millis(190));
}

#[tokio::test]
async fn test_concurrent_queries_share_budget() {
    let dir = TempDir::new().unwrap();
    let source = OffsetIssueSource::new(20);
    let executor = test_executor(dir.path(), source.clone())
        .with_rate_limiter(Arc::new(RateLimiter::per_window(2, Duration::from_millis(200))));
    let queries = vec![
        demo_query().with_page_size(10).with_label("first"),
        demo_query().with_page_size(10).with_label("second"),
    ];

    let start = Instant::now();
    let results = executor.run_many(&queries, 2).await;

    assert!(results.iter().all(|r| r.is_complete()));
    assert_eq!(source.calls(), 4);
    assert!(start.elapsed() >= Duration::from_millis(190));
}
