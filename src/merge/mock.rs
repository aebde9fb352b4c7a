//! merge::mock
//!
//! Mock change-set applier for deterministic testing.
//!
//! # Design
//!
//! The mock never looks at content. A non-dry-run apply returns the next
//! queued head timestamp, or `target.head + step` when the queue is
//! empty. Dry runs return `target.head`. Failures can be scripted and
//! every call is recorded for verification.
//!
//! # Example
//!
//! ```
//! use branchline::core::branch::Branch;
//! use branchline::core::types::{BranchName, Metadata, Timestamp};
//! use branchline::merge::{ApplyRequest, ChangeSetApplier, MockApplier};
//!
//! let applier = MockApplier::new().with_heads([160]);
//! let main = Branch::main(Timestamp::new(0), Timestamp::new(100)).unwrap();
//! let a = Branch::child(&main, BranchName::new("a").unwrap(), Metadata::new());
//!
//! let outcome = applier
//!     .apply(&ApplyRequest {
//!         target: main,
//!         source: a,
//!         dry_run: false,
//!         commit_message: "merge".into(),
//!     })
//!     .unwrap();
//! assert_eq!(outcome.head, Timestamp::new(160));
//! assert_eq!(applier.operations().len(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ApplyError, ApplyOutcome, ApplyRequest, ChangeSetApplier};
use crate::core::types::{BranchPath, Timestamp};

/// Head increment used when no head is queued.
pub const DEFAULT_STEP: u64 = 10;

/// Mock applier for testing.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping; clones share state.
#[derive(Debug, Clone)]
pub struct MockApplier {
    inner: Arc<Mutex<MockApplierInner>>,
}

#[derive(Debug)]
struct MockApplierInner {
    /// Heads handed out by successive non-dry-run applies.
    heads: VecDeque<Timestamp>,
    step: u64,
    fail_on: Option<FailOn>,
    operations: Vec<MockOperation>,
}

/// Configuration for which applies should fail.
#[derive(Debug, Clone)]
pub enum FailOn {
    /// Fail every apply.
    Always(ApplyError),
    /// Fail only applies that would commit.
    Commit(ApplyError),
    /// Fail applies whose source lives at this path.
    Source(BranchPath, ApplyError),
}

/// Recorded call for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOperation {
    Apply {
        target: BranchPath,
        source: BranchPath,
        dry_run: bool,
        commit_message: String,
    },
}

impl MockApplier {
    /// Create a mock with an empty head queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockApplierInner {
                heads: VecDeque::new(),
                step: DEFAULT_STEP,
                fail_on: None,
                operations: Vec::new(),
            })),
        }
    }

    /// Queue heads for the next non-dry-run applies, in order.
    pub fn with_heads(self, heads: impl IntoIterator<Item = u64>) -> Self {
        self.lock()
            .heads
            .extend(heads.into_iter().map(Timestamp::new));
        self
    }

    /// Set the increment used once the queue is empty.
    pub fn with_step(self, step: u64) -> Self {
        self.lock().step = step;
        self
    }

    /// Configure the mock to fail.
    ///
    /// # Example
    ///
    /// ```
    /// use branchline::merge::mock::{FailOn, MockApplier};
    /// use branchline::merge::{ApplyError, MergeConflict};
    ///
    /// let applier = MockApplier::new()
    ///     .fail_on(FailOn::Always(ApplyError::Conflict(MergeConflict::default())));
    /// ```
    pub fn fail_on(self, fail_on: FailOn) -> Self {
        self.lock().fail_on = Some(fail_on);
        self
    }

    /// Clear the failure configuration.
    pub fn clear_fail_on(&self) {
        self.lock().fail_on = None;
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<MockOperation> {
        self.lock().operations.clone()
    }

    /// Clear recorded operations.
    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    fn lock(&self) -> MutexGuard<'_, MockApplierInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockApplier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeSetApplier for MockApplier {
    fn apply(&self, request: &ApplyRequest) -> Result<ApplyOutcome, ApplyError> {
        let mut inner = self.lock();
        inner.operations.push(MockOperation::Apply {
            target: request.target.path().clone(),
            source: request.source.path().clone(),
            dry_run: request.dry_run,
            commit_message: request.commit_message.clone(),
        });

        let failure = match &inner.fail_on {
            Some(FailOn::Always(e)) => Some(e.clone()),
            Some(FailOn::Commit(e)) if !request.dry_run => Some(e.clone()),
            Some(FailOn::Source(path, e)) if request.source.path() == path => Some(e.clone()),
            _ => None,
        };
        if let Some(e) = failure {
            return Err(e);
        }

        let current = request.target.head_timestamp();
        if request.dry_run {
            return Ok(ApplyOutcome {
                head: current,
                handle: None,
            });
        }

        let head = match inner.heads.pop_front() {
            Some(head) => head,
            None => Timestamp::new(current.get() + inner.step),
        };
        Ok(ApplyOutcome { head, handle: None })
    }
}
