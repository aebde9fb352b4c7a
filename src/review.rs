//! review
//!
//! Review gate for merges.
//!
//! # Overview
//!
//! A review pins the state of a source and a target branch at the moment
//! it was opened. A merge that names the review only proceeds while both
//! branches still match those snapshots; any commit, merge, rebase,
//! reopen or deletion of either side makes the review stale.
//!
//! # Storage
//!
//! [`ReviewStore::open`] keeps reviews in a JSON document with `kind` and
//! `schema_version`. Every access holds an OS lock on `<file>.lock` and
//! reloads the document; creation rewrites it atomically before the lock
//! is released, so processes sharing a state directory never drop each
//! other's reviews.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use uuid::Uuid;

use crate::core::branch::Branch;
use crate::core::locks::FileLock;
use crate::core::types::{BranchPath, Fingerprint, UtcTimestamp};

/// The kind identifier for review files.
pub const REVIEWS_KIND: &str = "branchline.reviews";

/// Current review file version.
pub const REVIEWS_VERSION: u32 = 1;

/// Errors from review operations.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("review '{0}' not found")]
    NotFound(Uuid),

    #[error("review storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("review serialization error: {0}")]
    Serialize(String),
}

/// Snapshot of a source/target pair awaiting merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Review {
    pub id: Uuid,
    pub source: BranchPath,
    pub target: BranchPath,
    pub source_fingerprint: Fingerprint,
    pub target_fingerprint: Fingerprint,
    pub created_at: UtcTimestamp,
}

impl Review {
    /// Open a review over the current versions of both branches.
    pub fn new(source: &Branch, target: &Branch) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.path().clone(),
            target: target.path().clone(),
            source_fingerprint: source.fingerprint(),
            target_fingerprint: target.fingerprint(),
            created_at: UtcTimestamp::now(),
        }
    }

    /// Compare the pinned snapshots with the current branch versions.
    pub fn status(&self, source: &Branch, target: &Branch) -> ReviewStatus {
        if source.fingerprint() == self.source_fingerprint
            && target.fingerprint() == self.target_fingerprint
        {
            ReviewStatus::Current
        } else {
            ReviewStatus::Stale
        }
    }

    /// Check if the review covers exactly this source and target.
    pub fn covers(&self, source: &BranchPath, target: &BranchPath) -> bool {
        self.source == *source && self.target == *target
    }
}

/// Whether a review still describes the branches it was opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Current,
    Stale,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewStatus::Current => write!(f, "current"),
            ReviewStatus::Stale => write!(f, "stale"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReviewFile {
    kind: String,
    schema_version: u32,
    #[serde(default)]
    reviews: Vec<Review>,
}

/// Reviews by id, optionally persisted to a file.
#[derive(Debug, Default)]
pub struct ReviewStore {
    reviews: RwLock<BTreeMap<Uuid, Review>>,
    file: Option<PathBuf>,
}

impl ReviewStore {
    /// In-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by the file at `path`; a missing file is empty.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError`] if the file exists but cannot be decoded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ReviewError> {
        let path = path.into();
        let dir = parent_dir(&path);
        fs::create_dir_all(dir)?;
        let reviews = {
            let _lock = FileLock::acquire(&FileLock::sibling_of(&path))?;
            load(&path)?
        };

        Ok(Self {
            reviews: RwLock::new(reviews),
            file: Some(path),
        })
    }

    /// Open and store a review of `source` against `target`.
    pub fn create(&self, source: &Branch, target: &Branch) -> Result<Review, ReviewError> {
        let review = Review::new(source, target);
        let mut reviews = self.reviews.write().unwrap_or_else(PoisonError::into_inner);
        let _lock = self.reload(&mut reviews)?;
        reviews.insert(review.id, review.clone());
        if let Err(e) = self.persist(&reviews) {
            reviews.remove(&review.id);
            return Err(e);
        }
        tracing::debug!(id = %review.id, source = %review.source, target = %review.target, "created review");
        Ok(review)
    }

    /// Look up a review.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError::NotFound`] for unknown ids.
    pub fn get(&self, id: Uuid) -> Result<Review, ReviewError> {
        self.current()?
            .get(&id)
            .cloned()
            .ok_or(ReviewError::NotFound(id))
    }

    /// All reviews, ordered by id.
    pub fn list(&self) -> Result<Vec<Review>, ReviewError> {
        Ok(self.current()?.into_values().collect())
    }

    /// The reviews as currently stored.
    fn current(&self) -> Result<BTreeMap<Uuid, Review>, ReviewError> {
        let mut reviews = self.reviews.write().unwrap_or_else(PoisonError::into_inner);
        let _lock = self.reload(&mut reviews)?;
        Ok(reviews.clone())
    }

    /// Replace `reviews` with the file contents and return the file lock,
    /// which the caller holds until its write is done.
    fn reload(
        &self,
        reviews: &mut BTreeMap<Uuid, Review>,
    ) -> Result<Option<FileLock>, ReviewError> {
        let Some(path) = &self.file else {
            return Ok(None);
        };
        let lock = FileLock::acquire(&FileLock::sibling_of(path))?;
        *reviews = load(path)?;
        Ok(Some(lock))
    }

    fn persist(&self, reviews: &BTreeMap<Uuid, Review>) -> Result<(), ReviewError> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let file = ReviewFile {
            kind: REVIEWS_KIND.to_string(),
            schema_version: REVIEWS_VERSION,
            reviews: reviews.values().cloned().collect(),
        };
        let json =
            serde_json::to_string_pretty(&file).map_err(|e| ReviewError::Serialize(e.to_string()))?;

        let mut tmp = NamedTempFile::new_in(parent_dir(path))?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(path).map_err(|e| ReviewError::Io(e.error))?;
        Ok(())
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Read the review file at `path`; a missing file is empty.
fn load(path: &Path) -> Result<BTreeMap<Uuid, Review>, ReviewError> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    let file: ReviewFile =
        serde_json::from_str(&json).map_err(|e| ReviewError::Serialize(e.to_string()))?;
    if file.kind != REVIEWS_KIND || file.schema_version != REVIEWS_VERSION {
        return Err(ReviewError::Serialize(format!(
            "unsupported review file '{}' v{}",
            file.kind, file.schema_version
        )));
    }
    Ok(file.reviews.into_iter().map(|r| (r.id, r)).collect())
}
