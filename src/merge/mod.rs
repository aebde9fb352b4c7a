//! merge
//!
//! Change-set application between branches.
//!
//! # Architecture
//!
//! The branch manager never touches content. For merge and rebase it
//! hands both branch snapshots to a [`ChangeSetApplier`] and only
//! interprets the result: a new head timestamp, or a conflict.
//!
//! # Contract
//!
//! - All of the source's changes since `source.base` land on the target
//!   at one new timestamp, or nothing lands
//! - A successful non-dry-run apply returns a head strictly greater than
//!   `target.head`
//! - A dry run records nothing and returns `target.head` unchanged
//!
//! # Implementations
//!
//! - [`local::LocalApplier`] - replays a [`changes::ChangeLog`] through a
//!   [`conflict::ConflictProcessor`]
//! - [`mock::MockApplier`] - scripted applier for tests

pub mod changes;
pub mod conflict;
pub mod local;
pub mod mock;

use thiserror::Error;

use crate::core::branch::{Branch, StorageHandle};
use crate::core::types::Timestamp;

pub use conflict::{ConflictKind, ConflictProcessor, ConflictRecord, DefaultConflictProcessor};
pub use local::LocalApplier;
pub use mock::MockApplier;

/// Changes that could not be merged automatically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeConflict {
    pub conflicts: Vec<ConflictRecord>,
}

impl MergeConflict {
    pub fn new(conflicts: Vec<ConflictRecord>) -> Self {
        Self { conflicts }
    }

    /// Human-readable description of each conflict.
    pub fn descriptions(&self) -> Vec<String> {
        self.conflicts.iter().map(ToString::to_string).collect()
    }
}

impl std::fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.conflicts.as_slice() {
            [] => write!(f, "merge conflict"),
            [only] => write!(f, "merge conflict: {only}"),
            many => write!(f, "{} merge conflicts", many.len()),
        }
    }
}

/// Errors from change-set application.
#[derive(Debug, Clone, Error)]
pub enum ApplyError {
    /// The changes collide and could not be resolved.
    #[error("{0}")]
    Conflict(MergeConflict),

    /// A change is malformed.
    #[error("invalid change: {0}")]
    InvalidChange(String),

    /// Content storage failed.
    #[error("content storage error: {0}")]
    Storage(String),

    /// The applier failed for another reason.
    #[error("change-set application failed: {0}")]
    Failed(String),
}

/// Input of one apply call.
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    /// Branch receiving the changes.
    pub target: Branch,
    /// Branch whose changes since its base are replayed.
    pub source: Branch,
    /// Detect conflicts only; commit nothing.
    pub dry_run: bool,
    pub commit_message: String,
}

/// Result of a successful apply.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    /// New head of the target (`target.head` for dry runs).
    pub head: Timestamp,
    /// Updated storage handle for the target, if the applier changed it.
    pub handle: Option<StorageHandle>,
}

/// Replays one branch's changes onto another.
pub trait ChangeSetApplier: Send + Sync {
    /// Apply `request.source`'s committed changes onto `request.target`.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::Conflict`] if the changes collide; nothing is
    /// recorded in that case.
    fn apply(&self, request: &ApplyRequest) -> Result<ApplyOutcome, ApplyError>;
}
