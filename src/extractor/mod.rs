//! Extraction orchestration and rate limiting
//!
//! This module composes credentials, transport, pagination, normalization, dataset writing
//! and checkpointing into one resumable pull per query.
//!
//! # Overview
//!
//! 1. **Query**: describe what to pull with a [`crate::QueryDescriptor`]
//! 2. **Execution**: run it with [`executor::ExtractionExecutor`]
//! 3. **Rate Limiting**: every request takes a permit from [`rate_limit::RateLimiter`]
//! 4. **State**: each run walks the [`state::RunState`] machine and reports an
//!    [`result::ExtractionResult`]
//! 5. **Resume Support**: a checkpoint is committed after every persisted page
//!
//! # Quick Start
//!
//! ```no_run
//! use jira_extractor::auth::{Credentials, TokenCredentialProvider};
//! use jira_extractor::extractor::ExtractionExecutor;
//! use jira_extractor::fetcher::JiraHttpSource;
//! use jira_extractor::{QueryDescriptor, RecordType};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::load(None)?;
//! let executor = ExtractionExecutor::new(
//!     Arc::new(TokenCredentialProvider::new(credentials)),
//!     Arc::new(JiraHttpSource::new()),
//!     "./data",
//!     "./checkpoints",
//! )?;
//!
//! let query = QueryDescriptor::for_project("DEMO", RecordType::Issue);
//! let result = executor.run_extraction(&query).await;
//! println!("{}", result.summary());
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Component errors are aggregated into [`ExtractError`]. The executor never returns it
//! directly: a failed run is reported in [`ExtractionResult::last_error`] with its
//! [`ErrorKind`], and its checkpoint is left at the last committed page.

use crate::auth::AuthError;
use crate::fetcher::{PaginationError, TransportError};
use crate::normalize::SchemaError;
use crate::output::OutputError;
use crate::query::QueryError;
use crate::resume::ResumeError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod executor;
pub mod rate_limit;
pub mod result;
pub mod state;

pub use executor::ExtractionExecutor;
pub use rate_limit::{RateLimitError, RateLimiter};
pub use result::{ExtractionFailure, ExtractionResult, ExtractionStatus};
pub use state::{RunState, RunStateMachine, StateError};

/// Handling of records that violate the normalized schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaErrorPolicy {
    /// Fail the run on the first violation
    #[default]
    Fail,
    /// Drop the offending record, count it and continue
    Skip,
}

impl std::str::FromStr for SchemaErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail" => Ok(SchemaErrorPolicy::Fail),
            "skip" => Ok(SchemaErrorPolicy::Skip),
            other => Err(format!("Invalid schema error policy: '{}'. Valid: fail, skip", other)),
        }
    }
}

/// Coarse classification of a run failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credentials missing, malformed or rejected
    Auth,
    /// Network, server or rate-limit failure that outlasted the retry budget
    Transient,
    /// Request the service refuses, or a response that cannot be decoded
    MalformedRequest,
    /// Repeated continuation token or page ceiling reached
    PaginationStall,
    /// Raw record violating the normalized schema
    Schema,
    /// Dataset or checkpoint file failure
    Io,
    /// Query descriptor rejected before any request
    InvalidQuery,
    /// Shutdown requested
    Cancelled,
    /// Orchestrator invariant broken
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Transient => "transient",
            ErrorKind::MalformedRequest => "malformed_request",
            ErrorKind::PaginationStall => "pagination_stall",
            ErrorKind::Schema => "schema",
            ErrorKind::Io => "io",
            ErrorKind::InvalidQuery => "invalid_query",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(text)
    }
}

/// Extraction errors
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Credential failure
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Pagination failure
    #[error("pagination error: {0}")]
    Pagination(#[from] PaginationError),

    /// Schema violation under the fail policy
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Dataset write failure
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// Checkpoint failure
    #[error("checkpoint error: {0}")]
    Resume(#[from] ResumeError),

    /// Invalid query descriptor
    #[error("invalid query: {0}")]
    Query(#[from] QueryError),

    /// Illegal state transition
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Shutdown requested between pages
    #[error("cancelled by shutdown request")]
    Cancelled,
}

impl ExtractError {
    /// Classification reported in [`ExtractionResult`]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::Auth(_) => ErrorKind::Auth,
            ExtractError::Transport(err) => match err {
                TransportError::Transient { .. } => ErrorKind::Transient,
                TransportError::Auth { .. } | TransportError::Reauthentication(_) => ErrorKind::Auth,
                TransportError::MalformedRequest { .. } => ErrorKind::MalformedRequest,
                TransportError::Cancelled => ErrorKind::Cancelled,
            },
            ExtractError::Pagination(_) => ErrorKind::PaginationStall,
            ExtractError::Schema(_) => ErrorKind::Schema,
            ExtractError::Output(_) | ExtractError::Resume(_) => ErrorKind::Io,
            ExtractError::Query(_) => ErrorKind::InvalidQuery,
            ExtractError::State(_) => ErrorKind::Internal,
            ExtractError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the run stopped because shutdown was requested
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}
