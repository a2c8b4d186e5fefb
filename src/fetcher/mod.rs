//! Page fetching
//!
//! [`PageSource`] performs a single attempt at fetching one page and classifies the outcome.
//! [`transport::RateLimitedTransport`] wraps a source with the shared rate limiter, retries and
//! re-authentication. [`pagination::PaginationEngine`] turns a query into a sequence of page
//! requests.

use crate::auth::{AuthError, Session};
use crate::QueryDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod jira_http;
pub mod pagination;
pub mod retry_formatter;
pub mod shared_resources;
pub mod transport;

pub use jira_http::JiraHttpSource;
pub use pagination::{PaginationEngine, PaginationError};
pub use transport::{RateLimitedTransport, SendReport};

/// Continuation position within a result set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Cursor {
    /// Zero-based index of the next issue (`startAt`)
    Offset(u64),
    /// Opaque page token issued by the service
    Token(String),
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Offset(offset) => write!(f, "offset:{}", offset),
            Cursor::Token(token) => write!(f, "token:{}", token),
        }
    }
}

impl FromStr for Cursor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("offset", value)) => value
                .parse::<u64>()
                .map(Cursor::Offset)
                .map_err(|e| format!("invalid offset cursor '{}': {}", s, e)),
            Some(("token", value)) if !value.is_empty() => Ok(Cursor::Token(value.to_string())),
            _ => Err(format!(
                "invalid cursor '{}': expected offset:N or token:VALUE",
                s
            )),
        }
    }
}

/// One page request; disposable
#[derive(Debug, Clone)]
pub struct PageRequest<'q> {
    query: &'q QueryDescriptor,
    cursor: Option<Cursor>,
    page_number: u64,
}

impl<'q> PageRequest<'q> {
    /// Create a request for the page starting at `cursor` (`None` = first page)
    pub fn new(query: &'q QueryDescriptor, cursor: Option<Cursor>, page_number: u64) -> Self {
        Self {
            query,
            cursor,
            page_number,
        }
    }

    /// Query this page belongs to
    pub fn query(&self) -> &'q QueryDescriptor {
        self.query
    }

    /// Position this page starts at
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// One-based page number within the run
    pub fn page_number(&self) -> u64 {
        self.page_number
    }

    /// Maximum issues requested
    pub fn page_size(&self) -> u32 {
        self.query.page_size()
    }

    /// Offset to request; zero for the first page and for token cursors
    pub fn start_at(&self) -> u64 {
        match &self.cursor {
            Some(Cursor::Offset(offset)) => *offset,
            _ => 0,
        }
    }

    /// Page token to send, if the cursor is token based
    pub fn page_token(&self) -> Option<&str> {
        match &self.cursor {
            Some(Cursor::Token(token)) => Some(token),
            _ => None,
        }
    }
}

/// Raw records of one page plus the continuation
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    records: Vec<Value>,
    next: Option<Cursor>,
    total: Option<u64>,
}

impl PageResult {
    /// Create a result; `next == None` means the service confirmed there is nothing more
    pub fn new(records: Vec<Value>, next: Option<Cursor>) -> Self {
        Self {
            records,
            next,
            total: None,
        }
    }

    /// Attach the total reported by the service
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    /// Raw records in service order
    pub fn records(&self) -> &[Value] {
        &self.records
    }

    /// Continuation for the next page
    pub fn next_cursor(&self) -> Option<&Cursor> {
        self.next.as_ref()
    }

    /// Total number of matching issues, when reported
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Whether this is the last page
    pub fn is_terminal(&self) -> bool {
        self.next.is_none()
    }

    /// Number of raw records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the page holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Class of a retriable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    /// Connection, timeout or body read failure
    Network,
    /// HTTP 5xx
    Server,
    /// HTTP 429 or an explicit wait request
    RateLimited,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientKind::Network => f.write_str("network"),
            TransientKind::Server => f.write_str("server"),
            TransientKind::RateLimited => f.write_str("rate-limited"),
        }
    }
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Retriable failure; `attempts` counts the tries made before giving up
    #[error("transient {kind} error after {attempts} attempt(s): {message}")]
    Transient {
        /// Failure class
        kind: TransientKind,
        /// Description
        message: String,
        /// Wait requested by the service
        retry_after: Option<Duration>,
        /// Attempts made
        attempts: u32,
    },

    /// Service rejected the session (401/403)
    #[error("authentication rejected (HTTP {status}): {message}")]
    Auth {
        /// HTTP status code
        status: u16,
        /// Response excerpt
        message: String,
    },

    /// Request or response the service and client cannot agree on; never retried
    #[error("malformed request (HTTP {status}): {message}")]
    MalformedRequest {
        /// HTTP status code
        status: u16,
        /// Response excerpt or decode error
        message: String,
    },

    /// Re-authentication after a rejected session failed
    #[error("re-authentication failed: {0}")]
    Reauthentication(#[from] AuthError),

    /// Shutdown requested while waiting to retry
    #[error("cancelled while waiting to retry")]
    Cancelled,
}

impl TransportError {
    /// Single-attempt transient failure
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        TransportError::Transient {
            kind,
            message: message.into(),
            retry_after: None,
            attempts: 1,
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient { .. })
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, TransportError>;

/// Single-attempt page fetcher
///
/// Implementations must not retry or sleep; they classify each outcome so the transport can
/// decide what to do.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page using the given session
    async fn fetch_page(&self, session: &Session, request: &PageRequest<'_>) -> FetcherResult<PageResult>;

    /// Endpoint label used in logs and metrics
    fn endpoint(&self) -> &str;
}
