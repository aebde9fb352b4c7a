//! core::locks
//!
//! Per-path exclusive locks for branch mutations, and the OS file lock
//! that serializes writers of one state file across processes.
//!
//! # Invariants
//!
//! - At most one guard exists per path at a time
//! - Waiting is bounded; a caller that cannot obtain the lock in time
//!   gets [`LockError::Timeout`] instead of blocking forever
//! - Locks are not reentrant: a thread holding a path must not lock it
//!   again
//! - Guards release on drop

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use fs2::FileExt;
use thiserror::Error;

use super::types::BranchPath;

/// Errors from locking operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("couldn't lock path '{path}' in {waited:?}")]
    Timeout { path: String, waited: Duration },
}

/// A set of named locks, one per branch path.
#[derive(Debug)]
pub struct PathLocks {
    /// Paths with a live guard; a path is removed when its guard drops,
    /// so the set never grows past the number of concurrent holders.
    held: Mutex<HashSet<BranchPath>>,
    released: Condvar,
    timeout: Duration,
}

impl PathLocks {
    /// Create a lock set whose waits give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Block until `path` is free, then take it.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if the path stays held for longer
    /// than the configured timeout.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use branchline::core::locks::PathLocks;
    /// use branchline::core::types::BranchPath;
    ///
    /// let locks = PathLocks::new(Duration::from_millis(10));
    /// let guard = locks.lock(&BranchPath::main()).unwrap();
    /// assert!(locks.lock(&BranchPath::main()).is_err());
    /// drop(guard);
    /// assert!(locks.lock(&BranchPath::main()).is_ok());
    /// ```
    pub fn lock(&self, path: &BranchPath) -> Result<PathGuard<'_>, LockError> {
        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut held, result) = self
            .released
            .wait_timeout_while(held, self.timeout, |held| held.contains(path))
            .unwrap_or_else(PoisonError::into_inner);

        if result.timed_out() && held.contains(path) {
            tracing::warn!(path = %path, "timed out waiting for branch lock");
            return Err(LockError::Timeout {
                path: path.to_string(),
                waited: self.timeout,
            });
        }

        held.insert(path.clone());
        Ok(PathGuard {
            locks: self,
            path: path.clone(),
        })
    }

    fn release(&self, path: &BranchPath) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(path);
        self.released.notify_all();
    }
}

/// Holds one path of a [`PathLocks`] set until dropped.
#[derive(Debug)]
pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: BranchPath,
}

impl PathGuard<'_> {
    pub fn path(&self) -> &BranchPath {
        &self.path
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.path);
    }
}

/// Exclusive OS lock on a `<file>.lock` sibling, released on drop.
///
/// Every reader-modifier-writer of a shared state file holds one of these
/// for its whole cycle.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// The lock file guarding `path`.
    pub fn sibling_of(path: &Path) -> PathBuf {
        let mut name = OsString::from(path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Block until the lock at `lock_path` is ours. The file is created if
    /// missing.
    pub fn acquire(lock_path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
