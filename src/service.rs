//! service
//!
//! Request-level branch operations.
//!
//! # Overview
//!
//! Each operation maps onto one manager call and adds the request-level
//! rules a dispatch layer relies on:
//!
//! - A missing branch named as an *input* of create, reopen, merge or
//!   review is the caller's mistake and becomes `BadRequest`; a missing
//!   branch that is the *subject* of a read or delete stays `NotFound`
//! - Merge picks its direction from the branch relation: a child merges
//!   into its parent, a parent as source rebases its child, anything
//!   else is rejected
//! - A merge naming a review only runs while the review is current. The
//!   review is checked up front and again by the manager once it holds
//!   the branch locks, so a commit landing in between still stales it

use std::sync::Arc;

use uuid::Uuid;

use crate::core::branch::Branch;
use crate::core::types::{BranchName, BranchPath, Fingerprint, Metadata};
use crate::manager::{BranchError, BranchManager, Pin};
use crate::review::{Review, ReviewError, ReviewStatus, ReviewStore};

/// Input of [`BranchService::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub source: BranchPath,
    pub target: BranchPath,
    pub commit_message: Option<String>,
    pub review_id: Option<Uuid>,
}

impl MergeRequest {
    pub fn new(source: BranchPath, target: BranchPath) -> Self {
        Self {
            source,
            target,
            commit_message: None,
            review_id: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.commit_message = Some(message.into());
        self
    }

    pub fn with_review(mut self, review_id: Uuid) -> Self {
        self.review_id = Some(review_id);
        self
    }
}

impl From<ReviewError> for BranchError {
    fn from(err: ReviewError) -> Self {
        match err {
            ReviewError::NotFound(_) => BranchError::BadRequest(err.to_string()),
            other => BranchError::Internal(other.to_string()),
        }
    }
}

/// Request-level front of a [`BranchManager`].
#[derive(Debug, Clone)]
pub struct BranchService {
    manager: Arc<BranchManager>,
    reviews: Arc<ReviewStore>,
}

impl BranchService {
    pub fn new(manager: Arc<BranchManager>, reviews: Arc<ReviewStore>) -> Self {
        Self { manager, reviews }
    }

    pub fn manager(&self) -> &BranchManager {
        &self.manager
    }

    /// Every branch, deleted ones included.
    pub fn read_all(&self) -> Result<Vec<Branch>, BranchError> {
        self.manager.get_branches()
    }

    pub fn read_branch(&self, path: &BranchPath) -> Result<Branch, BranchError> {
        self.manager.get_branch(path)
    }

    /// Every branch below `path`.
    pub fn read_children(&self, path: &BranchPath) -> Result<Vec<Branch>, BranchError> {
        let branch = self.manager.get_branch(path)?;
        self.manager.get_children(&branch)
    }

    pub fn create_branch(
        &self,
        parent: &BranchPath,
        name: BranchName,
        metadata: Metadata,
    ) -> Result<Branch, BranchError> {
        let parent = self.resolve(parent, "parent")?;
        self.manager.create_child(&parent, name, metadata)
    }

    /// Start a fresh lineage for the branch at `path`, keeping its
    /// metadata.
    pub fn reopen_branch(&self, path: &BranchPath) -> Result<Branch, BranchError> {
        let branch = self.resolve(path, "reopened")?;
        let Some(parent_path) = branch.parent_path() else {
            return Err(BranchError::BadRequest(format!(
                "root branch '{path}' cannot be reopened"
            )));
        };
        let parent = self.resolve(&parent_path, "parent")?;
        let name = BranchName::new(branch.name())
            .map_err(|e| BranchError::BadRequest(e.to_string()))?;
        self.manager
            .reopen(&parent, name, branch.metadata().clone())
    }

    /// Tombstone the branch at `path` and its subtree.
    pub fn delete_branch(&self, path: &BranchPath) -> Result<Branch, BranchError> {
        let branch = self.manager.get_branch(path)?;
        self.manager.delete(&branch)
    }

    /// Merge or rebase depending on how source and target are related.
    ///
    /// Returns the merged target or the rebased branch.
    ///
    /// # Errors
    ///
    /// - [`BranchError::BadRequest`] for unknown branches or reviews, a
    ///   review over other branches, or unrelated endpoints
    /// - [`BranchError::Conflict`] for a stale review or colliding changes
    pub fn merge(&self, request: &MergeRequest) -> Result<Branch, BranchError> {
        let source = self.resolve(&request.source, "source")?;
        let target = self.resolve(&request.target, "target")?;

        let review = match request.review_id {
            Some(id) => Some(self.check_review(id, &source, &target)?),
            None => None,
        };

        let message = request.commit_message.as_deref();
        if source.parent_path().as_ref() == Some(target.path()) {
            let pin = review
                .as_ref()
                .map(|r| review_pin(r, &r.source_fingerprint, &r.target_fingerprint));
            self.manager
                .merge_pinned(&target, &source, message, pin.as_ref())
        } else if target.parent_path().as_ref() == Some(source.path()) {
            // The child moves onto the parent: the review's target is the
            // rebased branch.
            let pin = review
                .as_ref()
                .map(|r| review_pin(r, &r.target_fingerprint, &r.source_fingerprint));
            self.manager
                .rebase_pinned(&target, &source, message, pin.as_ref())
        } else {
            Err(BranchError::BadRequest(format!(
                "cannot merge '{}' into '{}': no relation between them",
                source.path(),
                target.path()
            )))
        }
    }

    /// Pin the current state of `source` and `target` for a later merge.
    pub fn create_review(
        &self,
        source: &BranchPath,
        target: &BranchPath,
    ) -> Result<Review, BranchError> {
        let source = self.resolve(source, "source")?;
        let target = self.resolve(target, "target")?;
        Ok(self.reviews.create(&source, &target)?)
    }

    /// A review together with its status against the current branches.
    pub fn get_review(&self, id: Uuid) -> Result<(Review, ReviewStatus), BranchError> {
        let review = self.reviews.get(id)?;
        let source = self.manager.get_branch(&review.source)?;
        let target = self.manager.get_branch(&review.target)?;
        let status = review.status(&source, &target);
        Ok((review, status))
    }

    fn check_review(
        &self,
        id: Uuid,
        source: &Branch,
        target: &Branch,
    ) -> Result<Review, BranchError> {
        let review = self.reviews.get(id)?;
        if !review.covers(source.path(), target.path()) {
            return Err(BranchError::BadRequest(format!(
                "review '{id}' covers '{}' into '{}', not '{}' into '{}'",
                review.source,
                review.target,
                source.path(),
                target.path()
            )));
        }
        if review.status(source, target) == ReviewStatus::Stale {
            tracing::debug!(%id, "review is stale");
            return Err(BranchError::Conflict {
                message: format!(
                    "review '{id}' is stale: '{}' or '{}' changed since it was created",
                    source.path(),
                    target.path()
                ),
                conflicts: Vec::new(),
            });
        }
        Ok(review)
    }

    /// Look up an input branch; a missing one is a bad request.
    fn resolve(&self, path: &BranchPath, role: &str) -> Result<Branch, BranchError> {
        self.manager.get_branch(path).map_err(|e| match e {
            BranchError::NotFound { path } => {
                BranchError::BadRequest(format!("{role} branch '{path}' does not exist"))
            }
            other => other,
        })
    }
}

/// Pin of `review` where `moving` is the branch whose commits move.
fn review_pin(review: &Review, moving: &Fingerprint, fixed: &Fingerprint) -> Pin {
    Pin {
        label: format!("review '{}'", review.id),
        source: moving.clone(),
        target: fixed.clone(),
    }
}
