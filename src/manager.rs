//! manager
//!
//! The branch manager: lifecycle, commits, merge and rebase.
//!
//! # Architecture
//!
//! The manager owns every invariant of the branch tree. It reads and
//! writes records only through a [`BranchStore`] and delegates content
//! work to a [`ChangeSetApplier`]. Branch values are immutable; every
//! operation installs a new version under the same path.
//!
//! # Concurrency
//!
//! - Mutations of a branch record run under the lock of its parent path
//!   (create, reopen, merge, rebase) or its own path (commit, metadata),
//!   taken top-down when both are needed
//! - Every write is a CAS against the version read under the lock, so a
//!   concurrent change is detected instead of overwritten
//! - Locks are not reentrant; public operations take locks, private
//!   helpers never do
//! - Listeners run after all locks are released
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use branchline::core::branch::{Branch, BranchState};
//! use branchline::core::store::MemoryStore;
//! use branchline::core::types::{BranchName, Metadata, Timestamp};
//! use branchline::manager::{BranchManager, ManagerSettings};
//! use branchline::merge::MockApplier;
//!
//! let manager = BranchManager::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MockApplier::new().with_heads([160])),
//!     ManagerSettings::default(),
//! );
//! let main = manager
//!     .initialize(Branch::main(Timestamp::new(0), Timestamp::new(100)).unwrap())
//!     .unwrap();
//!
//! let a = manager
//!     .create_child(&main, BranchName::new("a").unwrap(), Metadata::new())
//!     .unwrap();
//! let a = manager.handle_commit(&a, Timestamp::new(150)).unwrap();
//! assert_eq!(manager.branch_state(a.path()).unwrap(), BranchState::Forward);
//!
//! let main = manager.merge(&main, &a, None).unwrap();
//! assert_eq!(main.head_timestamp(), Timestamp::new(160));
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tracing::instrument;

use crate::core::branch::{Branch, BranchState, InvariantError, StorageHandle};
use crate::core::config::{Config, DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_MAX_COMMIT_RETRIES};
use crate::core::locks::{LockError, PathLocks};
use crate::core::store::{BranchQuery, BranchStore, SearchField, StoreError};
use crate::core::tree::BranchTree;
use crate::core::types::{BranchName, BranchPath, Fingerprint, Metadata, Timestamp};
use crate::merge::{ApplyError, ApplyOutcome, ApplyRequest, ChangeSetApplier};

/// Branch operation failures, as seen by callers.
#[derive(Debug, Error)]
pub enum BranchError {
    /// The path does not resolve to any record.
    #[error("branch '{path}' not found")]
    NotFound { path: String },

    /// The request is invalid for the current branch tree.
    #[error("{0}")]
    BadRequest(String),

    /// A record already exists at the path, deleted or not.
    #[error("branch '{path}' already exists")]
    AlreadyExists { path: String },

    /// The change collides with content or with a concurrent change.
    #[error("{message}")]
    Conflict {
        message: String,
        conflicts: Vec<String>,
    },

    /// A branch lock could not be obtained in time.
    #[error("couldn't lock path '{path}'")]
    RequestTimeout { path: String },

    /// Branch storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A collaborator broke its contract.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Classification of a [`BranchError`] for a dispatch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    AlreadyExists,
    Conflict,
    RequestTimeout,
    Internal,
}

impl BranchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BranchError::NotFound { .. } => ErrorKind::NotFound,
            BranchError::BadRequest(_) => ErrorKind::BadRequest,
            BranchError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            BranchError::Conflict { .. } => ErrorKind::Conflict,
            BranchError::RequestTimeout { .. } => ErrorKind::RequestTimeout,
            BranchError::Store(_) | BranchError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-style status code for the error kind.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::BadRequest => 400,
            ErrorKind::AlreadyExists | ErrorKind::Conflict => 409,
            ErrorKind::RequestTimeout => 408,
            ErrorKind::Internal => 500,
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        BranchError::Conflict {
            message: message.into(),
            conflicts: Vec::new(),
        }
    }
}

impl From<LockError> for BranchError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { path, .. } => BranchError::RequestTimeout { path },
        }
    }
}

impl From<InvariantError> for BranchError {
    fn from(err: InvariantError) -> Self {
        BranchError::BadRequest(err.to_string())
    }
}

/// Tunables of a [`BranchManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    /// How long to wait for a branch lock.
    pub lock_timeout: Duration,
    /// How often a commit retries after losing a CAS race.
    pub max_commit_retries: u32,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            max_commit_retries: DEFAULT_MAX_COMMIT_RETRIES,
        }
    }
}

impl From<&Config> for ManagerSettings {
    fn from(config: &Config) -> Self {
        Self {
            lock_timeout: config.lock_timeout(),
            max_commit_retries: config.max_commit_retries(),
        }
    }
}

/// Versions a merge or rebase must still find once its locks are held.
///
/// `source` is the branch whose commits move and `target` the branch they
/// land on: the merge target, or the branch a rebase moves onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    /// Names the pin in the conflict message, e.g. `review '<id>'`.
    pub label: String,
    pub source: Fingerprint,
    pub target: Fingerprint,
}

impl Pin {
    fn check(&self, source: &Branch, target: &Branch) -> Result<(), BranchError> {
        if source.fingerprint() == self.source && target.fingerprint() == self.target {
            return Ok(());
        }
        tracing::debug!(pin = %self.label, "pinned versions moved");
        Err(BranchError::conflict(format!(
            "{} is stale: '{}' or '{}' changed since it was created",
            self.label,
            source.path(),
            target.path()
        )))
    }
}

/// What happened to a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Created,
    Reopened,
    Committed,
    Merged,
    Rebased,
    Deleted,
    MetadataUpdated,
}

/// Notification passed to change listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchChange {
    pub path: BranchPath,
    pub event: ChangeEvent,
}

/// Callback invoked after a branch changed.
pub type ChangeListener = Box<dyn Fn(&BranchChange) + Send + Sync>;

/// Orchestrates the branch tree.
pub struct BranchManager {
    store: Arc<dyn BranchStore>,
    applier: Arc<dyn ChangeSetApplier>,
    locks: PathLocks,
    listeners: RwLock<Vec<ChangeListener>>,
    settings: ManagerSettings,
    next_handle: AtomicU64,
}

impl std::fmt::Debug for BranchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchManager")
            .field("settings", &self.settings)
            .field("next_handle", &self.next_handle)
            .finish_non_exhaustive()
    }
}

impl BranchManager {
    /// Create a manager. Call [`BranchManager::initialize`] before
    /// anything else.
    pub fn new(
        store: Arc<dyn BranchStore>,
        applier: Arc<dyn ChangeSetApplier>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            store,
            applier,
            locks: PathLocks::new(settings.lock_timeout),
            listeners: RwLock::new(Vec::new()),
            settings,
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Register a callback for every branch change.
    pub fn add_change_listener(&self, listener: impl Fn(&BranchChange) + Send + Sync + 'static) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(listener));
    }

    // =========================================================================
    // Setup and lookup
    // =========================================================================

    /// Register the root branch unless it already exists.
    ///
    /// On an empty store this clears leftovers, makes every
    /// [`SearchField`] searchable and installs `root`. On an initialized
    /// store it only resumes storage handle numbering and returns the
    /// stored root.
    ///
    /// # Errors
    ///
    /// Returns [`BranchError::BadRequest`] if `root` is not a root branch.
    pub fn initialize(&self, root: Branch) -> Result<Branch, BranchError> {
        if !root.is_main() {
            return Err(BranchError::BadRequest(format!(
                "'{}' is not a root branch",
                root.path()
            )));
        }

        if let Some(existing) = self.store.get(root.path())? {
            let max_id = self
                .store
                .search(&BranchQuery::all(), 0, usize::MAX)?
                .iter()
                .filter_map(|b| b.handle().map(|h| h.id))
                .max()
                .unwrap_or(0);
            self.next_handle.fetch_max(max_id + 1, Ordering::SeqCst);
            tracing::debug!(next_handle = max_id + 1, "branch store already initialized");
            return Ok(existing);
        }

        self.store.clear()?;
        for field in [
            SearchField::Path,
            SearchField::ParentPath,
            SearchField::Name,
            SearchField::Deleted,
        ] {
            self.store.configure_searchable(field)?;
        }

        let root = match root.handle() {
            Some(_) => root,
            None => root.with_handle(StorageHandle::new(0)),
        };
        self.store.put(root.path(), &root)?;
        tracing::info!(root = %root, "initialized branch store");
        Ok(root)
    }

    /// Look up a branch, deleted or not.
    ///
    /// # Errors
    ///
    /// Returns [`BranchError::NotFound`] if no record resolves `path`.
    pub fn get_branch(&self, path: &BranchPath) -> Result<Branch, BranchError> {
        self.store
            .get(path)?
            .ok_or_else(|| BranchError::NotFound {
                path: path.to_string(),
            })
    }

    /// Every record, deleted ones included, ordered by path.
    pub fn get_branches(&self) -> Result<Vec<Branch>, BranchError> {
        Ok(self.store.search(&BranchQuery::all(), 0, usize::MAX)?)
    }

    /// Every record below `branch`, at any depth.
    pub fn get_children(&self, branch: &Branch) -> Result<Vec<Branch>, BranchError> {
        Ok(self
            .store
            .search(&BranchQuery::descendants_of(branch.path()), 0, usize::MAX)?)
    }

    /// Records matching `query`, ordered by path.
    pub fn search(
        &self,
        query: &BranchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Branch>, BranchError> {
        Ok(self.store.search(query, offset, limit)?)
    }

    /// State of the branch at `path` against its parent.
    ///
    /// The root is always `UpToDate`.
    pub fn branch_state(&self, path: &BranchPath) -> Result<BranchState, BranchError> {
        let branch = self.get_branch(path)?;
        match branch.parent_path() {
            None => Ok(BranchState::UpToDate),
            Some(parent) => Ok(branch.state_against(&self.get_branch(&parent)?)?),
        }
    }

    /// State of the branch at `path` against the branch at `other`.
    ///
    /// # Errors
    ///
    /// Returns [`BranchError::BadRequest`] when `path` is the root and
    /// `other` is not.
    pub fn branch_state_against(
        &self,
        path: &BranchPath,
        other: &BranchPath,
    ) -> Result<BranchState, BranchError> {
        let branch = self.get_branch(path)?;
        let other = self.get_branch(other)?;
        Ok(branch.state_against(&other)?)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create a new branch `name` under `parent`.
    ///
    /// # Errors
    ///
    /// - [`BranchError::NotFound`] if the parent does not exist
    /// - [`BranchError::BadRequest`] if the parent is deleted
    /// - [`BranchError::AlreadyExists`] if any record, deleted or not,
    ///   resolves the new path
    pub fn create_child(
        &self,
        parent: &Branch,
        name: BranchName,
        metadata: Metadata,
    ) -> Result<Branch, BranchError> {
        let path = parent.path().child(&name);
        let created = {
            let _guard = self.locks.lock(parent.path())?;
            let parent = self.live_parent(parent.path())?;

            if self.store.get(&path)?.is_some() {
                return Err(BranchError::AlreadyExists {
                    path: path.to_string(),
                });
            }

            let child = self.fresh_lineage(path.clone(), parent.head_timestamp(), metadata);
            self.store
                .replace(&path, None, &child)
                .map_err(|e| match e {
                    StoreError::CasFailed { .. } => BranchError::AlreadyExists {
                        path: path.to_string(),
                    },
                    other => other.into(),
                })?;
            child
        };

        tracing::info!(branch = %created, "created branch");
        self.notify(created.path(), ChangeEvent::Created);
        Ok(created)
    }

    /// Start a fresh lineage for `name` under `parent` at the parent's
    /// head, replacing any previous version.
    ///
    /// # Errors
    ///
    /// - [`BranchError::BadRequest`] if the parent is deleted
    /// - [`BranchError::Conflict`] if the record changed concurrently
    pub fn reopen(
        &self,
        parent: &Branch,
        name: BranchName,
        metadata: Metadata,
    ) -> Result<Branch, BranchError> {
        let path = parent.path().child(&name);
        let reopened = {
            let _guard = self.locks.lock(parent.path())?;
            let parent = self.live_parent(parent.path())?;
            let current = self.store.get(&path)?;

            let reopened = self.fresh_lineage(path.clone(), parent.head_timestamp(), metadata);
            self.install(&path, current.as_ref(), &reopened)?;
            reopened
        };

        tracing::info!(branch = %reopened, "reopened branch");
        self.notify(reopened.path(), ChangeEvent::Reopened);
        Ok(reopened)
    }

    /// Tombstone `branch` and everything below it.
    ///
    /// Descendants are tombstoned deepest first, then the branch itself.
    /// Records that are already deleted are left as they are. Descendants
    /// are not locked; one that changes concurrently is re-read and
    /// tombstoned again once.
    ///
    /// # Errors
    ///
    /// - [`BranchError::BadRequest`] for the root branch
    /// - [`BranchError::Conflict`] if a record kept changing. Branches
    ///   tombstoned before the failure stay deleted and are still
    ///   announced to listeners; the message says how many.
    pub fn delete(&self, branch: &Branch) -> Result<Branch, BranchError> {
        let Some(parent) = branch.parent_path() else {
            return Err(BranchError::BadRequest(format!(
                "root branch '{}' cannot be deleted",
                branch.path()
            )));
        };

        let mut tombstoned = Vec::new();
        let result = {
            let _parent_guard = self.locks.lock(&parent)?;
            let _guard = self.locks.lock(branch.path())?;
            self.tombstone_subtree(branch.path(), &mut tombstoned)
        };

        for path in &tombstoned {
            self.notify(path, ChangeEvent::Deleted);
        }
        let deleted = result?;
        tracing::info!(branch = %deleted.path(), tombstoned = tombstoned.len(), "deleted branch");
        Ok(deleted)
    }

    /// Install a new version of `path` carrying `metadata`.
    pub fn update_metadata(
        &self,
        path: &BranchPath,
        metadata: Metadata,
    ) -> Result<Branch, BranchError> {
        let updated = {
            let _guard = self.locks.lock(path)?;
            let current = self.get_branch(path)?;
            let updated = current.with_metadata(metadata);
            self.install(path, Some(&current), &updated)?;
            updated
        };

        tracing::debug!(branch = %path, "updated metadata");
        self.notify(path, ChangeEvent::MetadataUpdated);
        Ok(updated)
    }

    // =========================================================================
    // Commits, merge and rebase
    // =========================================================================

    /// Advance the head of `branch` to `timestamp` after a direct commit.
    ///
    /// Retries the CAS against the latest stored version up to the
    /// configured number of attempts.
    ///
    /// # Errors
    ///
    /// - [`BranchError::BadRequest`] if the branch is deleted or
    ///   `timestamp` does not exceed the stored head
    /// - [`BranchError::Conflict`] if every attempt lost a race
    pub fn handle_commit(
        &self,
        branch: &Branch,
        timestamp: Timestamp,
    ) -> Result<Branch, BranchError> {
        let path = branch.path();
        let committed = {
            let _guard = self.locks.lock(path)?;
            let mut committed = None;
            for attempt in 1..=self.settings.max_commit_retries {
                let current = self.get_branch(path)?;
                if current.is_deleted() {
                    return Err(BranchError::BadRequest(format!(
                        "cannot commit to deleted branch '{path}'"
                    )));
                }
                let next = current.with_head_timestamp(timestamp)?;
                match self.store.replace(path, Some(&current), &next) {
                    Ok(()) => {
                        committed = Some(next);
                        break;
                    }
                    Err(StoreError::CasFailed { .. }) => {
                        tracing::debug!(branch = %path, attempt, "commit lost CAS race, retrying");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            committed.ok_or_else(|| {
                BranchError::conflict(format!(
                    "could not advance head of '{path}' after {} attempts",
                    self.settings.max_commit_retries
                ))
            })?
        };

        tracing::info!(branch = %committed, "committed");
        self.notify(path, ChangeEvent::Committed);
        Ok(committed)
    }

    /// Replay the commits of a `Forward` `source` onto `target`, then
    /// reopen `source` at the new target head.
    ///
    /// An empty or absent message becomes `"Merge <source> into <target>"`.
    ///
    /// # Errors
    ///
    /// - [`BranchError::BadRequest`] if source and target are the same,
    ///   either is deleted, or the source is not `Forward`
    /// - [`BranchError::Conflict`] if the applier reports a conflict or a
    ///   record changed concurrently
    pub fn merge(
        &self,
        target: &Branch,
        source: &Branch,
        commit_message: Option<&str>,
    ) -> Result<Branch, BranchError> {
        self.merge_pinned(target, source, commit_message, None)
    }

    /// [`BranchManager::merge`], refused with [`BranchError::Conflict`]
    /// unless both records still match `pin` when re-read under lock.
    #[instrument(skip_all, fields(source = %source.path(), target = %target.path()))]
    pub fn merge_pinned(
        &self,
        target: &Branch,
        source: &Branch,
        commit_message: Option<&str>,
        pin: Option<&Pin>,
    ) -> Result<Branch, BranchError> {
        if source.path() == target.path() {
            return Err(BranchError::BadRequest(format!(
                "can't merge branch '{}' onto itself",
                source.path()
            )));
        }

        let (merged, reopened) = {
            let _target_guard = self.locks.lock(target.path())?;
            let _source_guard = self.locks.lock(source.path())?;
            let target = self.get_branch(target.path())?;
            let source = self.get_branch(source.path())?;
            if let Some(pin) = pin {
                pin.check(&source, &target)?;
            }
            Self::ensure_live(&target)?;
            Self::ensure_live(&source)?;

            let state = source.state_against(&target)?;
            if !state.is_mergeable() {
                return Err(BranchError::BadRequest(format!(
                    "'{}' is {} relative to '{}'; only FORWARD branches can be merged",
                    source.path(),
                    state,
                    target.path()
                )));
            }

            let message = message_or(commit_message, || {
                format!("Merge {} into {}", source.path(), target.path())
            });
            let outcome = self.apply(&target, &source, false, message)?;
            let merged = Self::advance(&target, outcome)?;
            self.install(target.path(), Some(&target), &merged)?;

            let reopened = self.fresh_lineage(
                source.path().clone(),
                merged.head_timestamp(),
                source.metadata().clone(),
            );
            self.install(source.path(), Some(&source), &reopened)?;
            (merged, reopened)
        };

        tracing::info!(target = %merged, source = %reopened, "merged");
        self.notify(merged.path(), ChangeEvent::Merged);
        self.notify(reopened.path(), ChangeEvent::Reopened);
        Ok(merged)
    }

    /// Move `source` onto the current head of `onto`.
    ///
    /// The branch is reopened at `onto.head`. If it had commits of its
    /// own they are replayed onto the reopened lineage; a dry run checks
    /// for conflicts first so nothing is installed when they collide. The
    /// store sees a single replacement of the source record.
    ///
    /// An empty or absent message becomes `"Rebase <source> on <onto>"`.
    ///
    /// # Errors
    ///
    /// - [`BranchError::BadRequest`] if the source is not `Behind`,
    ///   `Diverged` or `Stale`, or either branch is deleted
    /// - [`BranchError::Conflict`] if the replay collides or a record
    ///   changed concurrently
    pub fn rebase(
        &self,
        source: &Branch,
        onto: &Branch,
        commit_message: Option<&str>,
    ) -> Result<Branch, BranchError> {
        self.rebase_pinned(source, onto, commit_message, None)
    }

    /// [`BranchManager::rebase`], refused with [`BranchError::Conflict`]
    /// unless both records still match `pin` when re-read under lock.
    /// The pin's target is `onto`.
    #[instrument(skip_all, fields(source = %source.path(), onto = %onto.path()))]
    pub fn rebase_pinned(
        &self,
        source: &Branch,
        onto: &Branch,
        commit_message: Option<&str>,
        pin: Option<&Pin>,
    ) -> Result<Branch, BranchError> {
        if source.path() == onto.path() {
            return Err(BranchError::BadRequest(format!(
                "can't rebase branch '{}' onto itself",
                source.path()
            )));
        }

        let rebased = {
            let _onto_guard = self.locks.lock(onto.path())?;
            let _source_guard = self.locks.lock(source.path())?;
            let onto = self.get_branch(onto.path())?;
            let source = self.get_branch(source.path())?;
            if let Some(pin) = pin {
                pin.check(&source, &onto)?;
            }
            Self::ensure_live(&onto)?;
            Self::ensure_live(&source)?;

            let state = source.state_against(&onto)?;
            if !state.needs_rebase() {
                return Err(BranchError::BadRequest(format!(
                    "'{}' is {} relative to '{}'; only BEHIND, DIVERGED or STALE branches can be rebased",
                    source.path(),
                    state,
                    onto.path()
                )));
            }

            let reopened = self.fresh_lineage(
                source.path().clone(),
                onto.head_timestamp(),
                source.metadata().clone(),
            );

            let rebased = if source.has_own_commits() {
                let message = message_or(commit_message, || {
                    format!("Rebase {} on {}", source.path(), onto.path())
                });
                self.apply(&reopened, &source, true, message.clone())?;
                let outcome = self.apply(&reopened, &source, false, message)?;
                Self::advance(&reopened, outcome)?
            } else {
                reopened
            };

            self.install(source.path(), Some(&source), &rebased)?;
            tracing::debug!(from = %state, "rebase state");
            rebased
        };

        tracing::info!(branch = %rebased, "rebased");
        self.notify(rebased.path(), ChangeEvent::Rebased);
        Ok(rebased)
    }

    // =========================================================================
    // Helpers (never lock)
    // =========================================================================

    /// A brand-new lineage at `path` with `base = head = timestamp`.
    fn fresh_lineage(&self, path: BranchPath, timestamp: Timestamp, metadata: Metadata) -> Branch {
        let handle = StorageHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        Branch::fresh(path, timestamp, metadata, handle)
    }

    /// Re-read a parent and refuse deleted ones.
    fn live_parent(&self, path: &BranchPath) -> Result<Branch, BranchError> {
        let parent = self.get_branch(path)?;
        if parent.is_deleted() {
            return Err(BranchError::BadRequest(format!(
                "parent branch '{path}' is deleted"
            )));
        }
        Ok(parent)
    }

    /// Tombstone the subtree at `path`, pushing every path it deletes.
    fn tombstone_subtree(
        &self,
        path: &BranchPath,
        tombstoned: &mut Vec<BranchPath>,
    ) -> Result<Branch, BranchError> {
        let current = self.get_branch(path)?;
        let descendants = self.get_children(&current)?;
        let tree = BranchTree::from_branches(descendants.iter().chain([&current]));
        let live = descendants.iter().filter(|b| !b.is_deleted()).count()
            + usize::from(!current.is_deleted());

        let partial = |err: BranchError, done: usize| match err {
            BranchError::Conflict { message, conflicts } if done > 0 => BranchError::Conflict {
                message: format!(
                    "{message}; subtree of '{path}' partially tombstoned ({done} of {live} branches)"
                ),
                conflicts,
            },
            other => other,
        };

        for below in tree.descendants_deepest_first(current.path()) {
            let Some(record) = descendants.iter().find(|b| *b.path() == below) else {
                continue;
            };
            if record.is_deleted() {
                continue;
            }
            match self.tombstone_one(record) {
                Ok(true) => tombstoned.push(below),
                Ok(false) => {}
                Err(e) => return Err(partial(e, tombstoned.len())),
            }
        }

        let deleted = current.with_deleted();
        if !current.is_deleted() {
            self.install(current.path(), Some(&current), &deleted)
                .map_err(|e| partial(e, tombstoned.len()))?;
            tombstoned.push(current.path().clone());
        }
        Ok(deleted)
    }

    /// Tombstone an unlocked descendant, retrying once against a fresh
    /// read. `false` means someone else already deleted it.
    fn tombstone_one(&self, record: &Branch) -> Result<bool, BranchError> {
        match self.install(record.path(), Some(record), &record.with_deleted()) {
            Ok(()) => Ok(true),
            Err(BranchError::Conflict { .. }) => {
                let fresh = self.get_branch(record.path())?;
                if fresh.is_deleted() {
                    return Ok(false);
                }
                tracing::debug!(branch = %record.path(), "retrying tombstone after concurrent change");
                self.install(fresh.path(), Some(&fresh), &fresh.with_deleted())?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    fn ensure_live(branch: &Branch) -> Result<(), BranchError> {
        if branch.is_deleted() {
            return Err(BranchError::BadRequest(format!(
                "branch '{}' is deleted",
                branch.path()
            )));
        }
        Ok(())
    }

    /// CAS-replace a record; losing the race is a conflict.
    fn install(
        &self,
        path: &BranchPath,
        expected: Option<&Branch>,
        new: &Branch,
    ) -> Result<(), BranchError> {
        self.store.replace(path, expected, new).map_err(|e| match e {
            StoreError::CasFailed { .. } => {
                tracing::warn!(branch = %path, "record changed concurrently");
                BranchError::conflict(format!("branch '{path}' changed concurrently"))
            }
            other => other.into(),
        })
    }

    fn apply(
        &self,
        target: &Branch,
        source: &Branch,
        dry_run: bool,
        commit_message: String,
    ) -> Result<ApplyOutcome, BranchError> {
        let request = ApplyRequest {
            target: target.clone(),
            source: source.clone(),
            dry_run,
            commit_message,
        };
        self.applier.apply(&request).map_err(|e| match e {
            ApplyError::Conflict(conflict) => BranchError::Conflict {
                message: format!(
                    "could not merge '{}' into '{}': {}",
                    source.path(),
                    target.path(),
                    conflict
                ),
                conflicts: conflict.descriptions(),
            },
            ApplyError::InvalidChange(msg) => BranchError::BadRequest(msg),
            other => BranchError::Internal(other.to_string()),
        })
    }

    /// The target after a successful apply.
    fn advance(target: &Branch, outcome: ApplyOutcome) -> Result<Branch, BranchError> {
        let advanced = target.with_head_timestamp(outcome.head).map_err(|e| {
            BranchError::Internal(format!("change-set applier returned a stale head: {e}"))
        })?;
        Ok(match outcome.handle {
            Some(handle) => advanced.with_handle(handle),
            None => advanced,
        })
    }

    fn notify(&self, path: &BranchPath, event: ChangeEvent) {
        let change = BranchChange {
            path: path.clone(),
            event,
        };
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(&change);
        }
    }
}

/// `message` unless absent or blank, else the default.
fn message_or(message: Option<&str>, default: impl FnOnce() -> String) -> String {
    match message.map(str::trim) {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => default(),
    }
}
