//! merge::conflict
//!
//! Per-object merge decisions.
//!
//! # Overview
//!
//! While replaying a source's changes onto a target, the applier asks a
//! [`ConflictProcessor`] what to do whenever a source change touches an
//! object the target also touched since the source's lineage point. Each
//! callback returns a [`Resolution`]: apply the source change, skip it,
//! or report a conflict.
//!
//! The hooks run in this order for one apply:
//! 1. [`ConflictProcessor::pre_process`]
//! 2. one decision callback per source change that meets a target change
//! 3. [`ConflictProcessor::collect_conflicts`]
//! 4. [`ConflictProcessor::post_process`] (only if no conflict remains)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::changes::{Change, ObjectHistory, ObjectId};
use crate::core::branch::Branch;

/// The situations in which source and target changes collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides added the same object.
    AddedInBoth,
    /// Source (re)added an object the target detached.
    AddedInSourceDetachedInTarget,
    /// Target (re)added an object the source detached.
    AddedInTargetDetachedInSource,
    /// Source changed an object the target detached.
    ChangedInSourceDetachedInTarget,
    /// Target changed an object the source detached.
    ChangedInTargetDetachedInSource,
    /// Both sides set the same single-valued feature to different values.
    ChangedInBoth,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConflictKind::AddedInBoth => "added in both source and target",
            ConflictKind::AddedInSourceDetachedInTarget => "added in source, detached in target",
            ConflictKind::AddedInTargetDetachedInSource => "added in target, detached in source",
            ConflictKind::ChangedInSourceDetachedInTarget => {
                "changed in source, detached in target"
            }
            ConflictKind::ChangedInTargetDetachedInSource => {
                "changed in target, detached in source"
            }
            ConflictKind::ChangedInBoth => "changed in both source and target",
        };
        f.write_str(s)
    }
}

/// One unresolved collision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub object: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    pub kind: ConflictKind,
}

impl ConflictRecord {
    pub fn new(object: ObjectId, feature: Option<String>, kind: ConflictKind) -> Self {
        Self {
            object,
            feature,
            kind,
        }
    }
}

impl std::fmt::Display for ConflictRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.feature {
            Some(feature) => write!(f, "{}.{}: {}", self.object, feature, self.kind),
            None => write!(f, "{}: {}", self.object, self.kind),
        }
    }
}

/// Outcome of one decision callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Replay the source change onto the target.
    Apply,
    /// Drop the source change; the target already has the right content.
    Skip,
    /// The change cannot be merged automatically.
    Conflict(ConflictKind),
}

/// Domain policy consulted by the applier for colliding changes.
///
/// Only the four collision callbacks are required; the hooks default to
/// no-ops.
pub trait ConflictProcessor: Send + Sync {
    /// Called once before any decision.
    fn pre_process(&self, _source: &Branch, _target: &Branch) {}

    /// Source added `object`; `target` is the target's history of it.
    fn added_in_source(&self, object: &ObjectId, target: &ObjectHistory) -> Resolution;

    /// Source detached `object`; the target did not change it.
    fn detached_in_source(&self, object: &ObjectId, target: &ObjectHistory) -> Resolution;

    /// Source detached `object` which the target changed.
    fn changed_in_target_detached_in_source(
        &self,
        object: &ObjectId,
        target: &ObjectHistory,
    ) -> Resolution;

    /// Both sides set the single-valued `feature` of `object`.
    fn changed_in_source_and_target(
        &self,
        object: &ObjectId,
        feature: &str,
        source_value: &Value,
        target_value: &Value,
    ) -> Resolution;

    /// Source changed `object` which the target detached.
    fn changed_in_source_detached_in_target(
        &self,
        _object: &ObjectId,
        _feature: &str,
    ) -> Resolution {
        Resolution::Conflict(ConflictKind::ChangedInSourceDetachedInTarget)
    }

    /// Final say over the collected conflicts; returning an empty list
    /// lets the apply go through.
    fn collect_conflicts(&self, conflicts: Vec<ConflictRecord>) -> Vec<ConflictRecord> {
        conflicts
    }

    /// Adjust the accepted changes before they are committed.
    fn post_process(&self, changes: Vec<Change>) -> Vec<Change> {
        changes
    }
}

/// Conservative policy: any real collision is a conflict.
///
/// Identical edits on both sides are skipped rather than reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConflictProcessor;

impl ConflictProcessor for DefaultConflictProcessor {
    fn added_in_source(&self, _object: &ObjectId, target: &ObjectHistory) -> Resolution {
        if target.detached {
            Resolution::Conflict(ConflictKind::AddedInSourceDetachedInTarget)
        } else if target.added {
            Resolution::Conflict(ConflictKind::AddedInBoth)
        } else {
            Resolution::Apply
        }
    }

    fn detached_in_source(&self, _object: &ObjectId, target: &ObjectHistory) -> Resolution {
        if target.detached {
            Resolution::Skip
        } else if target.added {
            Resolution::Conflict(ConflictKind::AddedInTargetDetachedInSource)
        } else {
            Resolution::Apply
        }
    }

    fn changed_in_target_detached_in_source(
        &self,
        _object: &ObjectId,
        _target: &ObjectHistory,
    ) -> Resolution {
        Resolution::Conflict(ConflictKind::ChangedInTargetDetachedInSource)
    }

    fn changed_in_source_and_target(
        &self,
        _object: &ObjectId,
        _feature: &str,
        source_value: &Value,
        target_value: &Value,
    ) -> Resolution {
        if source_value == target_value {
            Resolution::Skip
        } else {
            Resolution::Conflict(ConflictKind::ChangedInBoth)
        }
    }
}
