//! core::store
//!
//! Branch record persistence.
//!
//! # Architecture
//!
//! The manager talks to storage only through the [`BranchStore`] trait.
//! Every branch version is registered under its path; a newer version
//! replaces the older one. Records are never physically removed, except
//! by [`BranchStore::clear`] during initialization of an empty store.
//!
//! # CAS Semantics
//!
//! [`BranchStore::replace`] is the atomicity boundary for a single path.
//! It only succeeds if the stored record equals `expected`; passing
//! `None` means the path must not resolve yet (put-if-absent).
//!
//! # Implementations
//!
//! - [`memory::MemoryStore`] - in-process map
//! - [`file::FileStore`] - JSON file guarded by an OS file lock

pub mod file;
pub mod memory;
#[cfg(test)]
pub(crate) mod racing;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::branch::schema::SchemaError;
use super::branch::Branch;
use super::types::BranchPath;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Errors from branch storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// CAS precondition failed - the record changed since it was read.
    #[error("CAS precondition failed for '{path}': expected {expected}, found {actual}")]
    CasFailed {
        path: String,
        expected: String,
        actual: String,
    },

    /// The query filters on a field that was never made searchable.
    #[error("field '{0}' is not searchable")]
    NotSearchable(SearchField),

    /// A record was offered under a path other than its own.
    #[error("cannot register '{branch}' under '{path}'")]
    PathMismatch { path: String, branch: String },

    /// Failed to acquire the store lock.
    #[error("failed to lock store: {0}")]
    LockFailed(String),

    /// Stored data could not be decoded.
    #[error("corrupt store: {0}")]
    Corrupt(#[from] SchemaError),

    /// I/O error while reading or writing the store.
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to (de)serialize the store file.
    #[error("store serialization error: {0}")]
    Serialize(String),
}

/// Branch fields a [`BranchQuery`] may filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchField {
    Path,
    ParentPath,
    Name,
    Deleted,
}

impl std::fmt::Display for SearchField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SearchField::Path => "path",
            SearchField::ParentPath => "parent_path",
            SearchField::Name => "name",
            SearchField::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Filter over branch records. Unset filters match everything.
///
/// # Example
///
/// ```
/// use branchline::core::store::BranchQuery;
/// use branchline::core::types::BranchPath;
///
/// let query = BranchQuery::descendants_of(&BranchPath::main()).with_deleted(false);
/// assert_eq!(query.path_prefix.as_deref(), Some("MAIN/"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchQuery {
    /// Path must start with this prefix.
    pub path_prefix: Option<String>,
    /// Parent path must equal this path.
    pub parent_path: Option<BranchPath>,
    /// Last path segment must equal this name.
    pub name: Option<String>,
    /// Deletion flag must equal this value.
    pub deleted: Option<bool>,
}

impl BranchQuery {
    /// Match every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match every strict descendant of `path`.
    pub fn descendants_of(path: &BranchPath) -> Self {
        Self {
            path_prefix: Some(path.descendant_prefix()),
            ..Self::default()
        }
    }

    /// Match direct children of `path`.
    pub fn children_of(path: &BranchPath) -> Self {
        Self {
            parent_path: Some(path.clone()),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = Some(deleted);
        self
    }

    /// The fields this query filters on.
    pub fn fields(&self) -> Vec<SearchField> {
        let mut fields = Vec::new();
        if self.path_prefix.is_some() {
            fields.push(SearchField::Path);
        }
        if self.parent_path.is_some() {
            fields.push(SearchField::ParentPath);
        }
        if self.name.is_some() {
            fields.push(SearchField::Name);
        }
        if self.deleted.is_some() {
            fields.push(SearchField::Deleted);
        }
        fields
    }

    /// Check if a record satisfies every filter.
    pub fn matches(&self, branch: &Branch) -> bool {
        if let Some(prefix) = &self.path_prefix {
            if !branch.path().as_str().starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(parent) = &self.parent_path {
            if branch.parent_path().as_ref() != Some(parent) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if branch.name() != name {
                return false;
            }
        }
        if let Some(deleted) = self.deleted {
            if branch.is_deleted() != deleted {
                return false;
            }
        }
        true
    }
}

/// Keyed, searchable persistence for branch records.
///
/// Implementations must be safe to share between threads; the manager
/// calls them concurrently.
pub trait BranchStore: Send + Sync {
    /// Look up the current version registered under `path`.
    fn get(&self, path: &BranchPath) -> Result<Option<Branch>, StoreError>;

    /// Register `branch` under `path`, overwriting any previous version.
    fn put(&self, path: &BranchPath, branch: &Branch) -> Result<(), StoreError>;

    /// Compare-and-swap the record under `path`.
    ///
    /// Succeeds only if the current record equals `expected` (`None`: no
    /// record). Fails with [`StoreError::CasFailed`] otherwise.
    fn replace(
        &self,
        path: &BranchPath,
        expected: Option<&Branch>,
        new: &Branch,
    ) -> Result<(), StoreError>;

    /// Records matching `query`, ordered by path, paged by `offset`/`limit`.
    fn search(
        &self,
        query: &BranchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Branch>, StoreError>;

    /// Remove every record.
    fn clear(&self) -> Result<(), StoreError>;

    /// Allow queries to filter on `field`.
    fn configure_searchable(&self, field: SearchField) -> Result<(), StoreError>;
}

/// Reject queries on fields outside `searchable`.
pub(crate) fn check_searchable(
    searchable: &BTreeSet<SearchField>,
    query: &BranchQuery,
) -> Result<(), StoreError> {
    match query.fields().into_iter().find(|f| !searchable.contains(f)) {
        Some(field) => Err(StoreError::NotSearchable(field)),
        None => Ok(()),
    }
}

/// Reject a record offered under a different path.
pub(crate) fn check_path(path: &BranchPath, branch: &Branch) -> Result<(), StoreError> {
    if branch.path() != path {
        return Err(StoreError::PathMismatch {
            path: path.to_string(),
            branch: branch.path().to_string(),
        });
    }
    Ok(())
}

/// Evaluate the CAS precondition against the current record.
pub(crate) fn check_expected(
    path: &BranchPath,
    current: Option<&Branch>,
    expected: Option<&Branch>,
) -> Result<(), StoreError> {
    if current == expected {
        return Ok(());
    }
    Err(StoreError::CasFailed {
        path: path.to_string(),
        expected: describe(expected),
        actual: describe(current),
    })
}

fn describe(branch: Option<&Branch>) -> String {
    match branch {
        Some(b) => b.to_string(),
        None => "no record".to_string(),
    }
}
