//! Search endpoint behavior against a mock Jira server

use crate::common::raw_issue;
use async_trait::async_trait;
use jira_extractor::auth::{AuthError, CredentialProvider, SecretToken, Session};
use jira_extractor::extractor::config::BackoffPolicy;
use jira_extractor::extractor::{ErrorKind, ExtractionExecutor, ExtractionStatus, RateLimiter};
use jira_extractor::fetcher::{
    Cursor, JiraHttpSource, PageRequest, PageSource, RateLimitedTransport, TransientKind, TransportError,
};
use jira_extractor::output::CsvDatasetWriter;
use jira_extractor::{QueryDescriptor, RecordType};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Provider issuing sessions for the mock server
struct MockServerProvider {
    base_url: String,
}

#[async_trait]
impl CredentialProvider for MockServerProvider {
    async fn acquire(&self) -> Result<Session, AuthError> {
        Ok(Session::new(
            self.base_url.clone(),
            SecretToken::new("mock-token"),
            Duration::from_secs(3600),
        ))
    }
}

fn source() -> Arc<JiraHttpSource> {
    Arc::new(JiraHttpSource::with_client(Arc::new(reqwest::Client::new())))
}

fn session(server: &MockServer) -> Session {
    Session::new(server.uri(), SecretToken::new("mock-token"), Duration::from_secs(3600))
}

fn search_body(start: u64, count: u64, total: u64) -> Value {
    let issues: Vec<Value> = (start..start + count).map(raw_issue).collect();
    json!({"startAt": start, "maxResults": 2, "total": total, "issues": issues})
}

fn mock_executor(server: &MockServer, dir: &TempDir) -> ExtractionExecutor {
    ExtractionExecutor::new(
        Arc::new(MockServerProvider { base_url: server.uri() }),
        source(),
        dir.path().join("data"),
        dir.path().join("checkpoints"),
    )
    .unwrap()
    .with_rate_limiter(Arc::new(RateLimiter::per_window(1_000, Duration::from_millis(1))))
}

fn transport(server: &MockServer) -> RateLimitedTransport {
    RateLimitedTransport::new(
        source(),
        Arc::new(MockServerProvider { base_url: server.uri() }),
        Arc::new(RateLimiter::per_window(1_000, Duration::from_millis(1))),
    )
    .with_backoff(BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(5)))
}

#[tokio::test]
async fn test_offset_pagination_against_mock_server() {
    let server = MockServer::start().await;
    for (start, count) in [(0, 2), (2, 2), (4, 1)] {
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .and(query_param("startAt", start.to_string()))
            .and(query_param("maxResults", "2"))
            .and(header("authorization", "Bearer mock-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body(start, count, 5)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let executor = mock_executor(&server, &dir);
    let query = QueryDescriptor::new("project = DEMO ORDER BY key ASC", RecordType::Issue).with_page_size(2);

    let result = executor.run_extraction(&query).await;

    assert_eq!(result.status, ExtractionStatus::Complete, "{:?}", result.last_error);
    assert_eq!(result.pages_fetched, 3);
    assert_eq!(result.records_written, 5);
    assert_eq!(CsvDatasetWriter::open(&result.destination).unwrap().len(), 5);
}

#[tokio::test]
async fn test_requested_fields_and_changelog_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/search"))
        .and(query_param("fields", "summary,updated"))
        .and(query_param("expand", "changelog"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "startAt": 0, "maxResults": 50, "total": 0, "issues": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let query = QueryDescriptor::new("project = DEMO", RecordType::ChangeHistory)
        .with_fields(["summary"])
        .with_page_size(50);
    let request = PageRequest::new(&query, None, 1);
    let page = source().fetch_page(&session(&server), &request).await.unwrap();

    assert!(page.is_empty());
    assert!(page.is_terminal());
    assert_eq!(page.total(), Some(0));
}

#[tokio::test]
async fn test_token_pagination_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/search"))
        .and(query_param("nextPageToken", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issues": [raw_issue(7)],
            "nextPageToken": "tok-2",
            "isLast": false
        })))
        .mount(&server)
        .await;

    let query = QueryDescriptor::new("project = DEMO", RecordType::Issue);
    let request = PageRequest::new(&query, Some(Cursor::Token("tok-1".to_string())), 2);
    let page = source().fetch_page(&session(&server), &request).await.unwrap();

    assert_eq!(page.len(), 1);
    assert_eq!(page.next_cursor(), Some(&Cursor::Token("tok-2".to_string())));
}

#[tokio::test]
async fn test_rate_limited_response_honors_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/search"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(0, 2, 2)))
        .mount(&server)
        .await;

    let query = QueryDescriptor::new("project = DEMO", RecordType::Issue).with_page_size(2);
    let request = PageRequest::new(&query, None, 1);
    let mut session = session(&server);

    let (result, report) = transport(&server).send_with_report(&mut session, &request).await;

    let page = result.unwrap();
    assert_eq!(page.len(), 2);
    assert!(page.is_terminal());
    assert_eq!(report.attempts, 2);
    assert_eq!(report.retries, 1);
    assert_eq!(report.delays, vec![Duration::from_secs(1)]);
}

#[tokio::test]
async fn test_server_errors_exhaust_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/search"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(3)
        .mount(&server)
        .await;

    let query = QueryDescriptor::new("project = DEMO", RecordType::Issue);
    let request = PageRequest::new(&query, None, 1);
    let mut session = session(&server);

    let err = transport(&server)
        .with_max_retries(2)
        .send(&mut session, &request)
        .await
        .unwrap_err();

    match err {
        TransportError::Transient { kind, attempts, .. } => {
            assert_eq!(kind, TransientKind::Server);
            assert_eq!(attempts, 3);
        }
        other => panic!("Expected transient error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_bad_request_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/search"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errorMessages": ["Error in the JQL Query: Expecting operator but got 'DEMO'"],
            "errors": {}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let query = QueryDescriptor::new("project DEMO", RecordType::Issue);
    let request = PageRequest::new(&query, None, 1);
    let mut session = session(&server);

    let err = transport(&server).send(&mut session, &request).await.unwrap_err();
    match err {
        TransportError::MalformedRequest { status, message } => {
            assert_eq!(status, 400);
            assert!(message.contains("Error in the JQL Query"));
        }
        other => panic!("Expected malformed request, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unexpected_body_fails_run_as_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let executor = mock_executor(&server, &dir);

    let result = executor
        .run_extraction(&QueryDescriptor::new("project = DEMO", RecordType::Issue))
        .await;
    assert_eq!(result.status, ExtractionStatus::Failed);
    assert_eq!(result.last_error.unwrap().kind, ErrorKind::MalformedRequest);
}

#[tokio::test]
async fn test_token_page_not_last_without_token_fails_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/search"))
        .and(query_param("nextPageToken", "t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issues": [raw_issue(2)],
            "isLast": false
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/2/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issues": [raw_issue(0), raw_issue(1)],
            "nextPageToken": "t1",
            "isLast": false
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let executor = mock_executor(&server, &dir);
    let query = QueryDescriptor::new("project = DEMO", RecordType::Issue);

    let result = executor.run_extraction(&query).await;
    assert_eq!(result.status, ExtractionStatus::Failed);
    assert_eq!(result.last_error.unwrap().kind, ErrorKind::MalformedRequest);
    assert_eq!(result.pages_fetched, 1);

    let entry = executor.checkpoint_store().load(&query.query_hash()).unwrap().unwrap();
    assert!(!entry.is_complete());
    assert_eq!(entry.cursor(), Some(&Cursor::Token("t1".into())));
}
