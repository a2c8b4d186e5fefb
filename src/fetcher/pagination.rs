//! Pagination cursor engine
//!
//! Produces page requests one at a time, each built from the continuation of the previous
//! result. Includes two safety mechanisms:
//! - a repeated continuation is a stall and fails on its second observation
//! - a hard iteration ceiling stops runaway result sets

use crate::fetcher::{Cursor, PageRequest, PageResult};
use crate::QueryDescriptor;
use tracing::debug;

/// Maximum number of pages fetched for one query
pub const MAX_ITERATIONS: u64 = 10_000;

/// Pagination errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaginationError {
    /// The service returned the same continuation twice in a row
    #[error("pagination stalled on page {page_number}: continuation {cursor} repeated")]
    Stall {
        /// Repeated continuation
        cursor: Cursor,
        /// Page that returned it
        page_number: u64,
    },

    /// The page ceiling was reached before a terminal page
    #[error("pagination exceeded {limit} pages without reaching the end")]
    IterationLimit {
        /// Ceiling
        limit: u64,
    },

    /// A result was applied after the engine finished
    #[error("pagination already finished")]
    Finished,
}

/// Sequential cursor over the pages of one query
#[derive(Debug, Clone)]
pub struct PaginationEngine<'q> {
    query: &'q QueryDescriptor,
    cursor: Option<Cursor>,
    pages_fetched: u64,
    finished: bool,
    max_iterations: u64,
}

impl<'q> PaginationEngine<'q> {
    /// Start from the first page
    pub fn new(query: &'q QueryDescriptor) -> Self {
        Self::resume_from(query, None, 0)
    }

    /// Continue after `pages_committed` pages, at `cursor`
    pub fn resume_from(query: &'q QueryDescriptor, cursor: Option<Cursor>, pages_committed: u64) -> Self {
        Self {
            query,
            cursor,
            pages_fetched: pages_committed,
            finished: false,
            max_iterations: MAX_ITERATIONS,
        }
    }

    /// Override the page ceiling
    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Request for the next page, or `None` once the terminal page has been applied
    pub fn next_request(&self) -> Result<Option<PageRequest<'q>>, PaginationError> {
        if self.finished {
            return Ok(None);
        }
        if self.pages_fetched >= self.max_iterations {
            return Err(PaginationError::IterationLimit {
                limit: self.max_iterations,
            });
        }
        Ok(Some(PageRequest::new(
            self.query,
            self.cursor.clone(),
            self.pages_fetched + 1,
        )))
    }

    /// Apply a fetched page and move to its continuation
    ///
    /// # Errors
    ///
    /// Returns [`PaginationError::Stall`] when the continuation equals the cursor the page was
    /// requested with.
    pub fn advance(&mut self, result: &PageResult) -> Result<(), PaginationError> {
        if self.finished {
            return Err(PaginationError::Finished);
        }
        let page_number = self.pages_fetched + 1;
        if let (Some(previous), Some(next)) = (&self.cursor, result.next_cursor()) {
            if previous == next {
                return Err(PaginationError::Stall {
                    cursor: next.clone(),
                    page_number,
                });
            }
        }

        self.pages_fetched = page_number;
        self.cursor = result.next_cursor().cloned();
        self.finished = result.is_terminal();

        debug!(
            page = page_number,
            records = result.len(),
            next = ?self.cursor,
            finished = self.finished,
            "Pagination advanced"
        );
        Ok(())
    }

    /// Cursor of the next page to request
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Pages applied so far, including pages committed before a resume
    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    /// Whether the terminal page has been applied
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
