//! Jira search endpoint client
//!
//! Performs exactly one HTTP attempt per call and classifies the outcome:
//! - network errors, 429 and 5xx are transient
//! - 401/403 are authentication failures
//! - any other 4xx, and a success body that is not a search page, is a malformed request

use crate::auth::Session;
use crate::fetcher::retry_formatter::extract_error_type;
use crate::fetcher::shared_resources::global_http_client;
use crate::fetcher::{
    Cursor, FetcherResult, PageRequest, PageResult, PageSource, TransientKind, TransportError,
};
use crate::metrics::HttpRequestMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Search endpoint, relative to the base URL
pub const SEARCH_ENDPOINT: &str = "/rest/api/2/search";

/// Longest server-indicated wait honored; longer values are clamped
const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    #[serde(default)]
    start_at: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
    issues: Vec<Value>,
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    is_last: Option<bool>,
}

/// [`PageSource`] backed by `GET /rest/api/2/search`
pub struct JiraHttpSource {
    client: Arc<Client>,
}

impl Default for JiraHttpSource {
    fn default() -> Self {
        Self::new()
    }
}

impl JiraHttpSource {
    /// Create a source using the shared HTTP client
    pub fn new() -> Self {
        Self::with_client(global_http_client())
    }

    /// Create a source with a specific HTTP client
    pub fn with_client(client: Arc<Client>) -> Self {
        Self { client }
    }

    /// Query parameters for one page request
    pub fn query_params(request: &PageRequest<'_>) -> Vec<(&'static str, String)> {
        let query = request.query();
        let mut params = vec![
            ("jql", query.jql().to_string()),
            ("maxResults", request.page_size().to_string()),
        ];
        match request.page_token() {
            Some(token) => params.push(("nextPageToken", token.to_string())),
            None => params.push(("startAt", request.start_at().to_string())),
        }
        let fields = query.request_fields();
        if !fields.is_empty() {
            params.push(("fields", fields.join(",")));
        }
        if query.record_type().needs_changelog() {
            params.push(("expand", "changelog".to_string()));
        }
        params
    }
}

#[async_trait]
impl PageSource for JiraHttpSource {
    async fn fetch_page(&self, session: &Session, request: &PageRequest<'_>) -> FetcherResult<PageResult> {
        let url = format!("{}{}", session.base_url(), SEARCH_ENDPOINT);
        let params = Self::query_params(request);
        debug!(
            url = %url,
            page = request.page_number(),
            cursor = ?request.cursor(),
            "Requesting search page"
        );

        let metrics = HttpRequestMetrics::start(SEARCH_ENDPOINT).await;
        let response = match self
            .client
            .get(&url)
            .bearer_auth(session.token().expose())
            .header("Accept", "application/json")
            .query(&params)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                metrics.record_network_error();
                let class = extract_error_type(None, Some(&e));
                return Err(TransportError::transient(
                    TransientKind::Network,
                    format!("{}: {}", class.description(), e),
                ));
            }
        };

        let status = response.status();
        metrics.record_complete(status.as_u16());

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let retry_after = parse_retry_after(response.headers(), Utc::now());
            let kind = if status == StatusCode::TOO_MANY_REQUESTS {
                TransientKind::RateLimited
            } else {
                TransientKind::Server
            };
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Transient {
                kind,
                message: format!(
                    "HTTP {} {}: {}",
                    status.as_u16(),
                    extract_error_type(Some(status), None).description(),
                    excerpt(&body)
                ),
                retry_after,
                attempts: 1,
            });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Auth {
                status: status.as_u16(),
                message: excerpt(&body),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::MalformedRequest {
                status: status.as_u16(),
                message: jira_error_messages(&body),
            });
        }

        let body = response.bytes().await.map_err(|e| {
            TransportError::transient(TransientKind::Network, format!("failed to read body: {}", e))
        })?;
        let value: Value = serde_json::from_slice(&body).map_err(|e| TransportError::MalformedRequest {
            status: status.as_u16(),
            message: format!("response is not JSON: {}", e),
        })?;
        parse_search_page(value, request)
    }

    fn endpoint(&self) -> &str {
        SEARCH_ENDPOINT
    }
}

/// Convert a search response body into a [`PageResult`]
///
/// Offset-paged bodies continue at `startAt + issues.len()` while that is below `total`.
/// Without a `total`, a short page is terminal. Token-paged bodies continue with
/// `nextPageToken` until `isLast`. A missing token ends the result set only when `isLast` is
/// absent; `isLast: false` without a token is malformed.
pub fn parse_search_page(body: Value, request: &PageRequest<'_>) -> FetcherResult<PageResult> {
    let page: SearchPage = serde_json::from_value(body).map_err(|e| TransportError::MalformedRequest {
        status: 200,
        message: format!("unexpected search response shape: {}", e),
    })?;

    let token_paged = page.next_page_token.is_some() || page.is_last.is_some();
    let next = if token_paged {
        let token = page.next_page_token.filter(|t| !t.is_empty());
        match (page.is_last, token) {
            (Some(true), _) => None,
            (_, Some(token)) => Some(Cursor::Token(token)),
            (Some(false), None) => {
                return Err(TransportError::MalformedRequest {
                    status: 200,
                    message: "isLast is false but no nextPageToken was returned".to_string(),
                })
            }
            (None, None) => None,
        }
    } else {
        let start = page.start_at.unwrap_or_else(|| request.start_at());
        let following = start + page.issues.len() as u64;
        match page.total {
            Some(total) if following < total => Some(Cursor::Offset(following)),
            Some(_) => None,
            None if (page.issues.len() as u64) < u64::from(request.page_size()) => None,
            None => Some(Cursor::Offset(following)),
        }
    };

    let mut result = PageResult::new(page.issues, next);
    if let Some(total) = page.total {
        result = result.with_total(total);
    }
    Ok(result)
}

/// Parse `Retry-After` as delta seconds or an HTTP date, clamped to a sane maximum
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let wait = if let Ok(secs) = raw.parse::<u64>() {
        Duration::from_secs(secs)
    } else {
        let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
        (at - now).to_std().unwrap_or(Duration::ZERO)
    };
    Some(wait.min(MAX_RETRY_AFTER))
}

/// Extract `errorMessages`/`errors` from a Jira error body, falling back to a raw excerpt
fn jira_error_messages(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return excerpt(body);
    };
    let mut messages: Vec<String> = value
        .get("errorMessages")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    if let Some(errors) = value.get("errors").and_then(Value::as_object) {
        for (field, message) in errors {
            messages.push(format!("{}: {}", field, message.as_str().unwrap_or_default()));
        }
    }
    if messages.is_empty() {
        excerpt(body)
    } else {
        messages.join("; ")
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(200).collect()
}
