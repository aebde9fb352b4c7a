//! core::branch
//!
//! The immutable branch value and divergence classification.
//!
//! # Model
//!
//! A [`Branch`] is one version of a lineage segment. It is never mutated
//! in place: committing, deleting, reopening or rebasing produces a new
//! value that replaces the previous version under the same path.
//!
//! # Invariants
//!
//! - `head >= base`
//! - The root branch lives at `MAIN`, has no parent and is never deleted
//! - The storage handle is opaque here; only the change-set applier reads it
//!
//! # Example
//!
//! ```
//! use branchline::core::branch::{Branch, BranchState};
//! use branchline::core::types::{BranchName, Metadata, Timestamp};
//!
//! let main = Branch::main(Timestamp::new(0), Timestamp::new(100)).unwrap();
//! let child = Branch::child(&main, BranchName::new("a").unwrap(), Metadata::new());
//! assert_eq!(child.state_against(&main).unwrap(), BranchState::UpToDate);
//!
//! let committed = child.with_head_timestamp(Timestamp::new(150)).unwrap();
//! assert_eq!(committed.state_against(&main).unwrap(), BranchState::Forward);
//! ```

pub mod schema;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{BranchName, BranchPath, Fingerprint, Metadata, Timestamp};

/// Violations of branch value invariants.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvariantError {
    #[error("head timestamp {head} of '{path}' precedes base timestamp {base}")]
    HeadBeforeBase {
        path: String,
        base: Timestamp,
        head: Timestamp,
    },

    #[error("new head timestamp {proposed} of '{path}' must be greater than current head {current}")]
    NonMonotonicHead {
        path: String,
        current: Timestamp,
        proposed: Timestamp,
    },

    #[error("branch '{0}' has no parent to compare with")]
    NoComparisonPoint(String),
}

/// Divergence of a branch relative to a comparison branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchState {
    /// No commits on either side since the lineage point.
    UpToDate,
    /// Own commits; the comparison branch has not advanced.
    Forward,
    /// No own commits; the comparison branch advanced.
    Behind,
    /// Both sides committed independently.
    Diverged,
    /// The lineage point predates the comparison branch's lineage point.
    Stale,
}

impl BranchState {
    /// Classify from the four timestamps. First matching rule wins.
    pub fn compute(
        self_base: Timestamp,
        self_head: Timestamp,
        target_base: Timestamp,
        target_head: Timestamp,
    ) -> Self {
        if self_base < target_base {
            BranchState::Stale
        } else if self_head > self_base && target_head <= self_base {
            BranchState::Forward
        } else if self_head == self_base && target_head > self_base {
            BranchState::Behind
        } else if self_head > self_base && target_head > self_base {
            BranchState::Diverged
        } else {
            BranchState::UpToDate
        }
    }

    /// Only a `Forward` branch may be merged into its comparison branch.
    pub fn is_mergeable(self) -> bool {
        self == BranchState::Forward
    }

    /// `Behind`, `Diverged` and `Stale` branches must be rebased first.
    pub fn needs_rebase(self) -> bool {
        matches!(
            self,
            BranchState::Behind | BranchState::Diverged | BranchState::Stale
        )
    }
}

impl std::fmt::Display for BranchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BranchState::UpToDate => "UP_TO_DATE",
            BranchState::Forward => "FORWARD",
            BranchState::Behind => "BEHIND",
            BranchState::Diverged => "DIVERGED",
            BranchState::Stale => "STALE",
        };
        f.write_str(s)
    }
}

/// Variant tag replacing a subclass hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    /// The permanent root at `MAIN`.
    Main,
    /// Any branch created under another branch.
    Child,
}

/// Storage-engine bookkeeping attached to a branch.
///
/// Assigned by the manager when a lineage starts; the payload belongs to
/// the change-set applier and is carried through unchanged otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageHandle {
    /// Manager-assigned identifier, unique per lineage segment.
    pub id: u64,
    /// Applier-owned extension data.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl StorageHandle {
    /// Create a handle with an empty payload.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            payload: serde_json::Value::Null,
        }
    }
}

/// One immutable version of a branch.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    path: BranchPath,
    base: Timestamp,
    head: Timestamp,
    deleted: bool,
    metadata: Metadata,
    handle: Option<StorageHandle>,
}

impl Branch {
    /// Create the root branch.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantError::HeadBeforeBase`] if `head < base`.
    pub fn main(base: Timestamp, head: Timestamp) -> Result<Self, InvariantError> {
        Self::from_parts(BranchPath::main(), base, head, false, Metadata::new(), None)
    }

    /// Create a fresh child lineage of `parent` at the parent's head.
    pub fn child(parent: &Branch, name: BranchName, metadata: Metadata) -> Self {
        Self {
            path: parent.path.child(&name),
            base: parent.head,
            head: parent.head,
            deleted: false,
            metadata,
            handle: None,
        }
    }

    /// Start a clean lineage at `path` with `base = head = at`.
    ///
    /// This is how reopening and rebasing replace a branch's history.
    pub fn fresh(path: BranchPath, at: Timestamp, metadata: Metadata, handle: StorageHandle) -> Self {
        Self {
            path,
            base: at,
            head: at,
            deleted: false,
            metadata,
            handle: Some(handle),
        }
    }

    /// Assemble a branch from stored parts, checking invariants.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantError::HeadBeforeBase`] if `head < base`.
    pub fn from_parts(
        path: BranchPath,
        base: Timestamp,
        head: Timestamp,
        deleted: bool,
        metadata: Metadata,
        handle: Option<StorageHandle>,
    ) -> Result<Self, InvariantError> {
        if head < base {
            return Err(InvariantError::HeadBeforeBase {
                path: path.to_string(),
                base,
                head,
            });
        }
        Ok(Self {
            path,
            base,
            head,
            deleted,
            metadata,
            handle,
        })
    }

    pub fn path(&self) -> &BranchPath {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.name()
    }

    /// Path of the parent branch, `None` for the root.
    pub fn parent_path(&self) -> Option<BranchPath> {
        self.path.parent()
    }

    pub fn base_timestamp(&self) -> Timestamp {
        self.base
    }

    pub fn head_timestamp(&self) -> Timestamp {
        self.head
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn handle(&self) -> Option<&StorageHandle> {
        self.handle.as_ref()
    }

    pub fn kind(&self) -> BranchKind {
        if self.path.is_main() {
            BranchKind::Main
        } else {
            BranchKind::Child
        }
    }

    pub fn is_main(&self) -> bool {
        self.kind() == BranchKind::Main
    }

    /// Check if this branch has commits of its own since its lineage point.
    pub fn has_own_commits(&self) -> bool {
        self.head > self.base
    }

    /// Derive a version whose head moved to `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantError::NonMonotonicHead`] unless `timestamp > head`.
    pub fn with_head_timestamp(&self, timestamp: Timestamp) -> Result<Self, InvariantError> {
        if timestamp <= self.head {
            return Err(InvariantError::NonMonotonicHead {
                path: self.path.to_string(),
                current: self.head,
                proposed: timestamp,
            });
        }
        Ok(Self {
            head: timestamp,
            ..self.clone()
        })
    }

    /// Derive the tombstoned version of this branch.
    pub fn with_deleted(&self) -> Self {
        Self {
            deleted: true,
            ..self.clone()
        }
    }

    pub fn with_metadata(&self, metadata: Metadata) -> Self {
        Self {
            metadata,
            ..self.clone()
        }
    }

    pub fn with_handle(&self, handle: StorageHandle) -> Self {
        Self {
            handle: Some(handle),
            ..self.clone()
        }
    }

    /// Classify this branch relative to `target`.
    ///
    /// A branch compared with its own path is always `UpToDate`.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantError::NoComparisonPoint`] when the root is
    /// compared with any other branch.
    pub fn state_against(&self, target: &Branch) -> Result<BranchState, InvariantError> {
        if self.path == target.path {
            return Ok(BranchState::UpToDate);
        }
        if self.is_main() {
            return Err(InvariantError::NoComparisonPoint(self.path.to_string()));
        }
        Ok(BranchState::compute(
            self.base,
            self.head,
            target.base,
            target.head,
        ))
    }

    /// Fingerprint of the state-relevant fields of this version.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.path, self.base, self.head, self.deleted)
    }
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}..{}]", self.path, self.base, self.head)?;
        if self.deleted {
            write!(f, " (deleted)")?;
        }
        Ok(())
    }
}
