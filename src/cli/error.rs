//! CLI error types and conversions

use crate::auth::AuthError;
use crate::extractor::ExtractError;
use crate::query::QueryError;
use crate::resume::ResumeError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Credential error
    #[error("authentication error: {0}")]
    AuthError(#[from] AuthError),

    /// Query error
    #[error("query error: {0}")]
    QueryError(#[from] QueryError),

    /// Extraction setup error
    #[error("extraction error: {0}")]
    ExtractError(#[from] ExtractError),

    /// Checkpoint error
    #[error("checkpoint error: {0}")]
    ResumeError(#[from] ResumeError),

    /// One or more queries did not complete
    #[error("{failed} of {total} extraction(s) did not complete")]
    ExtractionFailed {
        /// Runs that failed or were cancelled
        failed: usize,
        /// Runs attempted
        total: usize,
    },

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),
}
