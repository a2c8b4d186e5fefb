//! Resume capability for extraction runs
//!
//! Provides per-query checkpoints with atomic writes and file locking.

pub mod checkpoint;
pub mod lock;
pub mod state;

pub use checkpoint::{CheckpointEntry, CheckpointStatus};
pub use lock::{with_exclusive_lock, with_shared_lock, LockError};
pub use state::{CheckpointRecord, CheckpointStore, ResumeError, VerifyReport};
