//! Rate-limited, retrying transport
//!
//! The only path from the extraction engine to the network. For every attempt it takes a
//! permit from the shared limiter, then:
//! - retries transient failures with non-decreasing backoff, honoring `Retry-After`
//! - re-authenticates once when the session is rejected, then retries
//! - returns malformed requests immediately

use crate::auth::{CredentialProvider, Session};
use crate::extractor::config::{BackoffPolicy, MAX_RETRIES};
use crate::extractor::rate_limit::RateLimiter;
use crate::fetcher::retry_formatter::{RetryContext, RetryErrorType};
use crate::fetcher::{FetcherResult, PageRequest, PageResult, PageSource, TransientKind, TransportError};
use crate::metrics::record_retry_backoff;
use crate::shutdown::SharedShutdown;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// What happened while sending one page request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendReport {
    /// Requests issued, including the successful one
    pub attempts: u32,
    /// Transient retries performed
    pub retries: u32,
    /// Whether the session was replaced after a rejection
    pub reauthenticated: bool,
    /// Backoff waits, in order
    pub delays: Vec<Duration>,
}

/// Wraps a [`PageSource`] with rate limiting, retries and re-authentication
#[derive(Clone)]
pub struct RateLimitedTransport {
    source: Arc<dyn PageSource>,
    credentials: Arc<dyn CredentialProvider>,
    limiter: Arc<RateLimiter>,
    backoff: BackoffPolicy,
    max_retries: u32,
    shutdown: Option<SharedShutdown>,
}

impl RateLimitedTransport {
    /// Create a transport with default retry settings
    pub fn new(
        source: Arc<dyn PageSource>,
        credentials: Arc<dyn CredentialProvider>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            source,
            credentials,
            limiter,
            backoff: BackoffPolicy::default(),
            max_retries: MAX_RETRIES,
            shutdown: None,
        }
    }

    /// Set the number of transient retries before escalating
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff policy
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Abort backoff waits when shutdown is requested
    pub fn with_shutdown(mut self, shutdown: Option<SharedShutdown>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Configured retry bound
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Send one page request; `session` is replaced if re-authentication happens
    pub async fn send(&self, session: &mut Session, request: &PageRequest<'_>) -> FetcherResult<PageResult> {
        self.send_with_report(session, request).await.0
    }

    /// Send one page request and report the attempts it took
    pub async fn send_with_report(
        &self,
        session: &mut Session,
        request: &PageRequest<'_>,
    ) -> (FetcherResult<PageResult>, SendReport) {
        let mut report = SendReport::default();
        let result = self.send_inner(session, request, &mut report).await;
        (result, report)
    }

    async fn send_inner(
        &self,
        session: &mut Session,
        request: &PageRequest<'_>,
        report: &mut SendReport,
    ) -> FetcherResult<PageResult> {
        let mut last_delay = Duration::ZERO;
        let mut last_error_type = None;

        loop {
            self.limiter.acquire().await.map_err(|e| {
                TransportError::transient(TransientKind::Network, e.to_string())
            })?;
            report.attempts += 1;

            match self.source.fetch_page(session, request).await {
                Ok(page) => {
                    if let Some(error_type) = last_error_type {
                        info!(
                            "{}",
                            self.context(request, report.retries + 1, error_type, Duration::ZERO, "")
                                .format_success()
                        );
                    }
                    return Ok(page);
                }
                Err(TransportError::Auth { status, .. }) if !report.reauthenticated => {
                    warn!(
                        status = status,
                        page = request.page_number(),
                        "Session rejected, re-authenticating once"
                    );
                    report.reauthenticated = true;
                    *session = self.credentials.acquire().await?;
                    last_error_type = Some(RetryErrorType::AuthFailed(status));
                }
                Err(TransportError::Transient {
                    kind,
                    message,
                    retry_after,
                    ..
                }) => {
                    let error_type = RetryErrorType::from_transient(kind);
                    if report.retries >= self.max_retries {
                        let context =
                            self.context(request, report.attempts, error_type, Duration::ZERO, &message);
                        error!("{}", context.format_failure());
                        return Err(TransportError::Transient {
                            kind,
                            message,
                            retry_after,
                            attempts: report.attempts,
                        });
                    }

                    let delay = self.backoff.delay_for(report.retries, retry_after).max(last_delay);
                    last_delay = delay;
                    report.retries += 1;
                    report.delays.push(delay);
                    last_error_type = Some(error_type);

                    let context = self.context(request, report.retries + 1, error_type, delay, &message);
                    warn!(error = %message, "{}", context.format_retry());
                    record_retry_backoff(delay, report.retries);

                    if !self.sleep_unless_shutdown(delay).await {
                        return Err(TransportError::Cancelled);
                    }
                }
                Err(other) => {
                    if let TransportError::MalformedRequest { .. } = &other {
                        warn!(
                            page = request.page_number(),
                            error = %other,
                            "Request rejected as malformed, not retrying"
                        );
                    }
                    return Err(other);
                }
            }
        }
    }

    fn context(
        &self,
        request: &PageRequest<'_>,
        attempt: u32,
        error_type: RetryErrorType,
        backoff: Duration,
        message: &str,
    ) -> RetryContext {
        RetryContext {
            attempt,
            max_attempts: self.max_retries + 1,
            error_type,
            backoff_duration: backoff,
            query: request.query().to_string(),
            page_number: request.page_number(),
            cursor: request.cursor().cloned(),
            error_message: message.to_string(),
            endpoint: self.source.endpoint().to_string(),
        }
    }

    /// Returns false when shutdown interrupted the wait
    async fn sleep_unless_shutdown(&self, delay: Duration) -> bool {
        match &self.shutdown {
            Some(shutdown) => {
                if shutdown.is_shutdown_requested() {
                    return false;
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = shutdown.wait_for_shutdown() => false,
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}
