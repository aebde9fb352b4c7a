//! core::store::racing
//!
//! Test store that lands a commit on one path at a chosen moment, the
//! way another writer would between two steps of an operation.

use std::sync::{Mutex, PoisonError};

use super::{BranchQuery, BranchStore, MemoryStore, SearchField, StoreError};
use crate::core::branch::Branch;
use crate::core::types::{BranchPath, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// On the n-th `get` of the path from now, counting from 1.
    Read(usize),
    /// On each of the next n `replace` calls on the path.
    Writes(usize),
}

#[derive(Debug)]
struct Armed {
    path: BranchPath,
    head: Timestamp,
    trigger: Trigger,
}

/// [`MemoryStore`] that moves one branch head when armed.
#[derive(Debug, Default)]
pub(crate) struct RacingStore {
    inner: MemoryStore,
    armed: Mutex<Option<Armed>>,
}

impl RacingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Move `path` to `head` right before the `nth` read of it returns.
    pub(crate) fn commit_on_read(&self, path: &BranchPath, nth: usize, head: Timestamp) {
        self.arm(path, head, Trigger::Read(nth));
    }

    /// Move `path` forward right before each of its next `times` CAS
    /// calls, first to `head`, then one tick further each time.
    pub(crate) fn commit_on_writes(&self, path: &BranchPath, head: Timestamp, times: usize) {
        self.arm(path, head, Trigger::Writes(times));
    }

    fn arm(&self, path: &BranchPath, head: Timestamp, trigger: Trigger) {
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner) = Some(Armed {
            path: path.clone(),
            head,
            trigger,
        });
    }

    /// Fire if armed for this access of `path`.
    fn interfere(&self, path: &BranchPath, write: bool) -> Result<(), StoreError> {
        let mut guard = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(armed) = guard.as_mut().filter(|a| a.path == *path) else {
            return Ok(());
        };
        let head = armed.head;
        let (fire, done) = match (&mut armed.trigger, write) {
            (Trigger::Read(n), false) => {
                *n -= 1;
                (*n == 0, *n == 0)
            }
            (Trigger::Writes(n), true) => {
                *n -= 1;
                armed.head = Timestamp::new(head.get() + 1);
                (true, *n == 0)
            }
            _ => (false, false),
        };
        if done {
            *guard = None;
        }
        if !fire {
            return Ok(());
        }
        if let Some(current) = self.inner.get(path)? {
            let moved = current
                .with_head_timestamp(head)
                .expect("armed head must be ahead of the stored head");
            self.inner.replace(path, Some(&current), &moved)?;
        }
        Ok(())
    }
}

impl BranchStore for RacingStore {
    fn get(&self, path: &BranchPath) -> Result<Option<Branch>, StoreError> {
        self.interfere(path, false)?;
        self.inner.get(path)
    }

    fn put(&self, path: &BranchPath, branch: &Branch) -> Result<(), StoreError> {
        self.inner.put(path, branch)
    }

    fn replace(
        &self,
        path: &BranchPath,
        expected: Option<&Branch>,
        new: &Branch,
    ) -> Result<(), StoreError> {
        self.interfere(path, true)?;
        self.inner.replace(path, expected, new)
    }

    fn search(
        &self,
        query: &BranchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Branch>, StoreError> {
        self.inner.search(query, offset, limit)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear()
    }

    fn configure_searchable(&self, field: SearchField) -> Result<(), StoreError> {
        self.inner.configure_searchable(field)
    }
}
