//! Retry message formatting
//!
//! Consistent, user-facing log lines for retries, recoveries and final failures of page
//! requests.

use crate::fetcher::{Cursor, TransientKind, TransportError};
use reqwest::{Error as ReqwestError, StatusCode};
use std::time::Duration;

/// Classification of request failures for user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Request timed out
    NetworkTimeout,
    /// Connection refused, DNS failure or similar
    NetworkOffline,
    /// HTTP 429 or explicit wait request
    RateLimit,
    /// HTTP 5xx server error
    ServerError(u16),
    /// HTTP 400, usually invalid JQL or an unknown field
    InvalidRequest,
    /// Authentication failures (401/403)
    AuthFailed(u16),
    /// Other client errors (4xx, except 429)
    ClientError(u16),
    /// Response body could not be decoded
    UnreadableResponse,
    /// Generic fallback when no better classification fits
    NetworkGeneric,
}

impl RetryErrorType {
    /// Short description used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::InvalidRequest => "invalid request",
            Self::AuthFailed(code) => match code {
                401 => "authentication failed (401)",
                403 => "permission denied (403)",
                _ => "authentication failed",
            },
            Self::ClientError(code) => match code {
                404 => "resource not found",
                _ => "client error",
            },
            Self::UnreadableResponse => "unreadable response",
            Self::NetworkGeneric => "network error",
        }
    }

    /// Suggested remediation shown after a final failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection and proxy settings",
            Self::NetworkOffline => "Verify the base URL and DNS resolution",
            Self::RateLimit => "Lower --requests-per-minute or --concurrency",
            Self::ServerError(_) => "The Jira instance may be degraded, try again later",
            Self::InvalidRequest => "Check the JQL expression and requested field names",
            Self::AuthFailed(_) => "Verify the personal access token and its project permissions",
            Self::ClientError(_) => "Check the base URL points at a Jira REST API",
            Self::UnreadableResponse => "Check the base URL points at a Jira REST API, not a login page",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether the error type is typically retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RetryErrorType::InvalidRequest
                | RetryErrorType::AuthFailed(_)
                | RetryErrorType::ClientError(_)
                | RetryErrorType::UnreadableResponse
        )
    }

    /// Classify a transient failure
    pub fn from_transient(kind: TransientKind) -> Self {
        match kind {
            TransientKind::RateLimited => RetryErrorType::RateLimit,
            TransientKind::Server => RetryErrorType::ServerError(500),
            TransientKind::Network => RetryErrorType::NetworkGeneric,
        }
    }

    /// Classify a transport error
    pub fn from_transport(error: &TransportError) -> Self {
        match error {
            TransportError::Transient { kind, .. } => Self::from_transient(*kind),
            TransportError::Auth { status, .. } => RetryErrorType::AuthFailed(*status),
            TransportError::Reauthentication(_) => RetryErrorType::AuthFailed(401),
            TransportError::MalformedRequest { status, .. } => match status {
                400 => RetryErrorType::InvalidRequest,
                s if (200..300).contains(s) => RetryErrorType::UnreadableResponse,
                s => RetryErrorType::ClientError(*s),
            },
            TransportError::Cancelled => RetryErrorType::NetworkGeneric,
        }
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered the retry
    pub error_type: RetryErrorType,
    /// Wait until the next attempt
    pub backoff_duration: Duration,
    /// Query being extracted
    pub query: String,
    /// Page number within the run
    pub page_number: u64,
    /// Cursor of the page being fetched
    pub cursor: Option<Cursor>,
    /// Original error message
    pub error_message: String,
    /// Endpoint that failed
    pub endpoint: String,
}

impl RetryContext {
    /// Format the retry line with attempt counters and context.
    pub fn format_retry(&self) -> String {
        let mut message = format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64()
        );
        self.append_position(&mut message);
        message
    }

    /// Format the line logged when a retried request finally succeeds.
    pub fn format_success(&self) -> String {
        let mut message = format!(
            "Retry attempt {}/{} succeeded - resuming extraction",
            self.attempt, self.max_attempts
        );
        self.append_position(&mut message);
        message
    }

    /// Format the final failure summary with suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "[FAILED] Page request failed after {} attempts",
            self.attempt
        ));
        lines.push(format!("  Last error: {}", self.error_message));
        let query_display = if self.query.is_empty() {
            "unknown"
        } else {
            &self.query
        };
        lines.push(format!("  Query: {query_display}"));
        lines.push(format!("  Page: {}", self.page_number));
        lines.push(format!(
            "  Cursor: {}",
            self.cursor
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "start".to_string())
        ));
        lines.push(format!("  Endpoint: {}", self.endpoint));
        lines.push("  Suggestions:".to_string());
        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }
        lines.join("\n")
    }

    /// Suggestions tailored to the current context.
    pub fn format_suggestions(&self) -> Vec<String> {
        let mut suggestions = vec![self.error_type.suggestion().to_string()];
        if self.error_type.is_retryable() {
            suggestions.push(format!(
                "Try increasing --max-retries (current: {})",
                self.max_attempts.saturating_sub(1)
            ));
        }
        suggestions.push("Rerun the same command to resume from the last checkpoint".to_string());
        suggestions
    }

    fn append_position(&self, buffer: &mut String) {
        if !self.query.is_empty() {
            buffer.push_str(&format!(" ({})", self.query));
        }
        buffer.push_str(&format!(" page {}", self.page_number));
        if let Some(cursor) = &self.cursor {
            buffer.push_str(&format!(" at {}", cursor));
        }
    }
}

/// Extract a [`RetryErrorType`] from an HTTP status or reqwest error.
pub fn extract_error_type(status: Option<StatusCode>, err: Option<&ReqwestError>) -> RetryErrorType {
    if let Some(status) = status {
        match status.as_u16() {
            400 => return RetryErrorType::InvalidRequest,
            401 | 403 => return RetryErrorType::AuthFailed(status.as_u16()),
            429 => return RetryErrorType::RateLimit,
            _ => {}
        }
        if status.is_server_error() {
            return RetryErrorType::ServerError(status.as_u16());
        }
        if status.is_client_error() {
            return RetryErrorType::ClientError(status.as_u16());
        }
    }

    if let Some(err) = err {
        if err.is_timeout() {
            return RetryErrorType::NetworkTimeout;
        }
        if err.is_connect() {
            return RetryErrorType::NetworkOffline;
        }
        if err.is_decode() {
            return RetryErrorType::UnreadableResponse;
        }
    }

    RetryErrorType::NetworkGeneric
}
