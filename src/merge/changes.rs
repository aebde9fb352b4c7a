//! merge::changes
//!
//! Content changes recorded per branch lineage.
//!
//! # Model
//!
//! Branch content is a set of objects, each with single-valued features.
//! A commit on a branch records a [`ChangeSet`] at the commit timestamp.
//! The content of a branch is its parent's content at the branch's base
//! plus the branch's own commits in `(base, head]`.
//!
//! Commits are tagged with the lineage id (the branch's storage handle
//! id) they were made on, so commits from a discarded lineage never leak
//! into a reopened branch at the same path.
//!
//! # Storage
//!
//! [`ChangeLog`] serializes to a JSON document with `kind` and
//! `schema_version`, like branch records.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;

use super::ApplyError;
use crate::core::types::{BranchPath, Timestamp};

/// The kind identifier for change log files.
pub const CHANGELOG_KIND: &str = "branchline.changes";

/// Current change log version.
pub const CHANGELOG_VERSION: u32 = 1;

/// Identifier of a content object.
///
/// Non-empty, ASCII alphanumerics plus `-`, `_` and `:`. The `.` is
/// reserved as the object/feature separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(String);

impl ObjectId {
    /// Create a validated object id.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::InvalidChange`] for empty ids or ids with
    /// characters outside the allowed set.
    pub fn new(id: impl Into<String>) -> Result<Self, ApplyError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'));
        if !valid {
            return Err(ApplyError::InvalidChange(format!(
                "invalid object id '{id}'"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ObjectId {
    type Error = ApplyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One content change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    /// A new object with its initial feature values.
    Added {
        object: ObjectId,
        #[serde(default)]
        features: BTreeMap<String, Value>,
    },
    /// A single-valued feature set to a new value.
    Changed {
        object: ObjectId,
        feature: String,
        value: Value,
    },
    /// The object was removed.
    Detached { object: ObjectId },
}

impl Change {
    pub fn object(&self) -> &ObjectId {
        match self {
            Change::Added { object, .. }
            | Change::Changed { object, .. }
            | Change::Detached { object } => object,
        }
    }
}

/// What one side did to an object within a window of commits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectHistory {
    /// The object was added (and not detached afterwards).
    pub added: bool,
    /// The object was detached (and not re-added afterwards).
    pub detached: bool,
    /// Latest value of every feature set in the window.
    pub features: BTreeMap<String, Value>,
}

impl ObjectHistory {
    /// Check if any feature of the object was set.
    pub fn changed(&self) -> bool {
        !self.features.is_empty()
    }
}

/// Ordered changes of one or more commits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(Vec<Change>);

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: Change) {
        self.0.push(change);
    }

    pub fn changes(&self) -> &[Change] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Fold the changes into a per-object history.
    pub fn history(&self) -> BTreeMap<ObjectId, ObjectHistory> {
        let mut history: BTreeMap<ObjectId, ObjectHistory> = BTreeMap::new();
        for change in &self.0 {
            let entry = history.entry(change.object().clone()).or_default();
            match change {
                Change::Added { features, .. } => {
                    entry.added = true;
                    entry.detached = false;
                    entry.features.extend(features.clone());
                }
                Change::Changed { feature, value, .. } => {
                    entry.features.insert(feature.clone(), value.clone());
                }
                Change::Detached { .. } => {
                    entry.added = false;
                    entry.detached = true;
                    entry.features.clear();
                }
            }
        }
        history
    }
}

impl From<Vec<Change>> for ChangeSet {
    fn from(changes: Vec<Change>) -> Self {
        Self(changes)
    }
}

impl IntoIterator for ChangeSet {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Extend<Change> for ChangeSet {
    fn extend<T: IntoIterator<Item = Change>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

/// One commit on one branch lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommitRecord {
    pub path: BranchPath,
    /// Storage handle id of the lineage the commit was made on.
    pub lineage: u64,
    pub timestamp: Timestamp,
    pub message: String,
    pub changes: ChangeSet,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChangeLogFile {
    kind: String,
    schema_version: u32,
    #[serde(default)]
    commits: Vec<CommitRecord>,
}

/// Every recorded commit, in timestamp order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeLog {
    commits: Vec<CommitRecord>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a commit, keeping timestamp order.
    pub fn record(&mut self, commit: CommitRecord) {
        let at = self
            .commits
            .partition_point(|c| c.timestamp <= commit.timestamp);
        self.commits.insert(at, commit);
    }

    /// Drop the commit at `timestamp` on `path`. Returns whether one was
    /// removed.
    pub fn remove(&mut self, path: &BranchPath, timestamp: Timestamp) -> bool {
        let before = self.commits.len();
        self.commits
            .retain(|c| !(c.path == *path && c.timestamp == timestamp));
        self.commits.len() != before
    }

    pub fn commits(&self) -> &[CommitRecord] {
        &self.commits
    }

    /// All commits on `path`, any lineage.
    pub fn commits_on<'a>(&'a self, path: &'a BranchPath) -> impl Iterator<Item = &'a CommitRecord> {
        self.commits.iter().filter(move |c| c.path == *path)
    }

    /// Changes of one lineage with timestamps in `(after, up_to]`.
    pub fn lineage_changes(
        &self,
        path: &BranchPath,
        lineage: u64,
        after: Timestamp,
        up_to: Timestamp,
    ) -> ChangeSet {
        self.collect(|c| {
            c.path == *path && c.lineage == lineage && c.timestamp > after && c.timestamp <= up_to
        })
    }

    /// Changes on `path` from any lineage with timestamps in `(after, up_to]`.
    pub fn path_changes(&self, path: &BranchPath, after: Timestamp, up_to: Timestamp) -> ChangeSet {
        self.collect(|c| c.path == *path && c.timestamp > after && c.timestamp <= up_to)
    }

    fn collect(&self, keep: impl Fn(&CommitRecord) -> bool) -> ChangeSet {
        let mut set = ChangeSet::new();
        for commit in self.commits.iter().filter(|c| keep(c)) {
            set.extend(commit.changes.changes().iter().cloned());
        }
        set
    }

    /// Largest recorded timestamp.
    pub fn latest_timestamp(&self) -> Option<Timestamp> {
        self.commits.last().map(|c| c.timestamp)
    }

    /// Read a change log file; a missing file is an empty log.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::Storage`] on I/O or decoding failures.
    pub fn load(path: &Path) -> Result<Self, ApplyError> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => {
                return Err(ApplyError::Storage(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let file: ChangeLogFile = serde_json::from_str(&json)
            .map_err(|e| ApplyError::Storage(format!("corrupt {}: {}", path.display(), e)))?;
        if file.kind != CHANGELOG_KIND || file.schema_version != CHANGELOG_VERSION {
            return Err(ApplyError::Storage(format!(
                "unsupported change log '{}' v{}",
                file.kind, file.schema_version
            )));
        }

        let mut log = Self::new();
        for commit in file.commits {
            log.record(commit);
        }
        Ok(log)
    }

    /// Write the log atomically.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::Storage`] on I/O or encoding failures.
    pub fn save(&self, path: &Path) -> Result<(), ApplyError> {
        let file = ChangeLogFile {
            kind: CHANGELOG_KIND.to_string(),
            schema_version: CHANGELOG_VERSION,
            commits: self.commits.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| ApplyError::Storage(e.to_string()))?;

        let storage = |e: std::io::Error| ApplyError::Storage(format!("{}: {}", path.display(), e));
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(storage)?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(storage)?;
        tmp.write_all(json.as_bytes()).map_err(storage)?;
        tmp.persist(path).map_err(|e| storage(e.error))?;
        Ok(())
    }
}
