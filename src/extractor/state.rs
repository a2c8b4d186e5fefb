//! Run state machine
//!
//! ```text
//! Idle -> Authenticating -> Resuming -> Fetching -> Normalizing -> Persisting
//!      -> Checkpointing -> (Fetching | Completed) -> Done
//! ```
//!
//! `Failed` and `Cancelled` are reachable from every state before `Done`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Stage of an extraction run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Not started
    #[default]
    Idle,
    /// Acquiring a session
    Authenticating,
    /// Loading the checkpoint
    Resuming,
    /// Sending a page request
    Fetching,
    /// Converting raw records
    Normalizing,
    /// Writing records to the dataset
    Persisting,
    /// Committing the checkpoint
    Checkpointing,
    /// Result set exhausted and checkpoint marked complete
    Completed,
    /// Run finished successfully
    Done,
    /// Run stopped on an error
    Failed,
    /// Run stopped on a shutdown request
    Cancelled,
}

impl RunState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed | RunState::Cancelled)
    }

    /// Whether `next` may follow this state
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Cancelled) {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Authenticating)
                | (Authenticating, Resuming)
                | (Resuming, Fetching)
                | (Resuming, Completed)
                | (Fetching, Normalizing)
                | (Normalizing, Persisting)
                | (Persisting, Checkpointing)
                | (Checkpointing, Fetching)
                | (Checkpointing, Completed)
                | (Completed, Done)
        )
    }

    fn is_per_page(&self) -> bool {
        matches!(
            self,
            RunState::Fetching | RunState::Normalizing | RunState::Persisting | RunState::Checkpointing
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RunState::Idle => "idle",
            RunState::Authenticating => "authenticating",
            RunState::Resuming => "resuming",
            RunState::Fetching => "fetching",
            RunState::Normalizing => "normalizing",
            RunState::Persisting => "persisting",
            RunState::Checkpointing => "checkpointing",
            RunState::Completed => "completed",
            RunState::Done => "done",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Rejected transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid state transition {from} -> {to}")]
pub struct StateError {
    /// Current state
    pub from: RunState,
    /// Requested state
    pub to: RunState,
}

/// Tracks and logs the state of one run
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    query_hash: String,
    current: RunState,
    history: Vec<RunState>,
}

impl RunStateMachine {
    /// Start in [`RunState::Idle`]
    pub fn new(query_hash: impl Into<String>) -> Self {
        Self {
            query_hash: query_hash.into(),
            current: RunState::Idle,
            history: vec![RunState::Idle],
        }
    }

    /// Current state
    pub fn current(&self) -> RunState {
        self.current
    }

    /// Every state entered, in order
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// Move to `next`
    pub fn transition(&mut self, next: RunState) -> Result<(), StateError> {
        if !self.current.can_transition_to(next) {
            return Err(StateError {
                from: self.current,
                to: next,
            });
        }
        if next.is_per_page() {
            debug!(query_hash = %self.query_hash, from = %self.current, to = %next, "State transition");
        } else {
            info!(query_hash = %self.query_hash, from = %self.current, to = %next, "State transition");
        }
        self.current = next;
        self.history.push(next);
        Ok(())
    }
}
