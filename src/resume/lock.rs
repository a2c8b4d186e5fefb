//! Advisory file locking for checkpoint and dataset files
//!
//! A sibling `.lock` file is locked with fd-lock for the duration of a closure, so the
//! guard cannot be dropped before the protected work finishes.

use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lock acquisition failures
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The lock file could not be created or opened
    #[error("failed to open lock file {path}: {message}")]
    Open {
        /// Lock file path
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// The lock could not be taken
    #[error("failed to acquire lock {path}: {message}")]
    Acquire {
        /// Lock file path
        path: PathBuf,
        /// Underlying error
        message: String,
    },
}

/// Path of the lock file guarding `path`
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

fn open_lock_file(path: &Path) -> Result<RwLock<File>, LockError> {
    let lock_path = lock_path(path);
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LockError::Open {
            path: lock_path.clone(),
            message: e.to_string(),
        })?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| LockError::Open {
            path: lock_path.clone(),
            message: e.to_string(),
        })?;
    Ok(RwLock::new(file))
}

/// Run `f` while holding an exclusive lock on `path`
///
/// Blocks until the lock is available.
pub fn with_exclusive_lock<T, E, F>(path: &Path, f: F) -> Result<T, E>
where
    E: From<LockError>,
    F: FnOnce() -> Result<T, E>,
{
    let mut lock = open_lock_file(path)?;
    debug!(path = %path.display(), "Acquiring exclusive lock");
    let _guard = lock.write().map_err(|e| LockError::Acquire {
        path: lock_path(path),
        message: e.to_string(),
    })?;
    f()
}

/// Run `f` while holding a shared lock on `path`
pub fn with_shared_lock<T, E, F>(path: &Path, f: F) -> Result<T, E>
where
    E: From<LockError>,
    F: FnOnce() -> Result<T, E>,
{
    let lock = open_lock_file(path)?;
    debug!(path = %path.display(), "Acquiring shared lock");
    let _guard = lock.read().map_err(|e| LockError::Acquire {
        path: lock_path(path),
        message: e.to_string(),
    })?;
    f()
}
