//! merge::local
//!
//! Change-set applier over a [`ChangeLog`].
//!
//! # Algorithm
//!
//! For `apply(target, source)`:
//! 1. Source changes: commits of the source lineage in
//!    `(source.base, source.head]`.
//! 2. Target changes: what the target gained since the source's lineage
//!    point. Normally the target lineage's commits in
//!    `(source.base, target.head]`. When both share a path (a rebased
//!    lineage receiving its old commits), the parent's commits in
//!    `(source.base, target.base]`.
//! 3. Every source change touching an object the target also touched is
//!    decided by the [`ConflictProcessor`].
//! 4. Any remaining conflict fails the apply with nothing recorded.
//!    Otherwise the accepted changes are recorded as one commit on the
//!    target at a fresh timestamp from the [`Clock`].
//!
//! # Persistence
//!
//! [`LocalApplier::open`] binds the log to a file shared by every process
//! working on the same state directory. Each operation holds an OS lock on
//! `<file>.lock`, reloads the log, and rewrites it atomically after a
//! recorded commit, so concurrent writers never drop each other's
//! commits. New timestamps exceed every timestamp already in the reloaded
//! log. If the write fails, the commit is rolled back in memory too.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

use super::changes::{Change, ChangeLog, ChangeSet, CommitRecord, ObjectHistory};
use super::conflict::{ConflictProcessor, ConflictRecord, DefaultConflictProcessor, Resolution};
use super::{ApplyError, ApplyOutcome, ApplyRequest, ChangeSetApplier, MergeConflict};
use crate::core::branch::Branch;
use crate::core::locks::FileLock;
use crate::core::types::Timestamp;

/// Source of commit timestamps.
pub trait Clock: Send + Sync {
    /// A timestamp strictly greater than `after` and than every earlier
    /// tick of this clock.
    fn tick(&self, after: Timestamp) -> Timestamp;
}

/// Wall-clock milliseconds, forced strictly increasing.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock whose first tick is greater than `floor`.
    pub fn starting_after(floor: Timestamp) -> Self {
        Self {
            last: AtomicU64::new(floor.get()),
        }
    }
}

impl Clock for MonotonicClock {
    fn tick(&self, after: Timestamp) -> Timestamp {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        let next = |prev: u64| {
            now.max(prev.saturating_add(1))
                .max(after.get().saturating_add(1))
        };
        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| Some(next(prev)))
            .unwrap_or_else(|prev| prev);
        Timestamp::new(next(prev))
    }
}

/// Applier that keeps content changes in a [`ChangeLog`].
///
/// # Example
///
/// ```
/// use branchline::core::branch::{Branch, StorageHandle};
/// use branchline::core::types::{BranchName, Metadata, Timestamp};
/// use branchline::merge::changes::{Change, ChangeSet, ObjectId};
/// use branchline::merge::{ApplyRequest, ChangeSetApplier, LocalApplier};
///
/// let applier = LocalApplier::new();
/// let main = Branch::main(Timestamp::new(0), Timestamp::new(100))
///     .unwrap()
///     .with_handle(StorageHandle::new(0));
/// let a = Branch::child(&main, BranchName::new("a").unwrap(), Metadata::new())
///     .with_handle(StorageHandle::new(1));
///
/// let change = Change::Detached { object: ObjectId::new("x").unwrap() };
/// let t = applier.commit(&a, "drop x", ChangeSet::from(vec![change])).unwrap();
/// let a = a.with_head_timestamp(t).unwrap();
///
/// let outcome = applier
///     .apply(&ApplyRequest {
///         target: main.clone(),
///         source: a,
///         dry_run: false,
///         commit_message: "Merge MAIN/a into MAIN".into(),
///     })
///     .unwrap();
/// assert!(outcome.head > main.head_timestamp());
/// ```
pub struct LocalApplier {
    log: Mutex<ChangeLog>,
    file: Option<PathBuf>,
    processor: Box<dyn ConflictProcessor>,
    clock: Box<dyn Clock>,
}

impl std::fmt::Debug for LocalApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalApplier")
            .field("file", &self.file)
            .finish_non_exhaustive()
    }
}

impl Default for LocalApplier {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalApplier {
    /// In-memory applier with the default conflict policy.
    pub fn new() -> Self {
        Self {
            log: Mutex::new(ChangeLog::new()),
            file: None,
            processor: Box::new(DefaultConflictProcessor),
            clock: Box::new(MonotonicClock::new()),
        }
    }

    /// Applier persisted to the change log file at `path`.
    ///
    /// The parent directory is created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::Storage`] if the file exists but cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ApplyError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|e| {
                    ApplyError::Storage(format!("cannot create {}: {}", dir.display(), e))
                })?;
            }
        }
        let log = {
            let _lock = Self::lock_file(&path)?;
            ChangeLog::load(&path)?
        };
        let floor = log.latest_timestamp().unwrap_or_default();
        Ok(Self {
            log: Mutex::new(log),
            file: Some(path),
            processor: Box::new(DefaultConflictProcessor),
            clock: Box::new(MonotonicClock::starting_after(floor)),
        })
    }

    pub fn with_processor(mut self, processor: impl ConflictProcessor + 'static) -> Self {
        self.processor = Box::new(processor);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Location of the backing file, if any.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Snapshot of the recorded commits.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::Storage`] if the backing file cannot be read.
    pub fn log(&self) -> Result<ChangeLog, ApplyError> {
        self.with_log(|log| Ok(log.clone()))
    }

    /// Record a direct commit on `branch` and return its timestamp.
    ///
    /// The branch head itself is not moved; the caller passes the
    /// returned timestamp to the branch manager.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::Storage`] if the log cannot be persisted.
    pub fn commit(
        &self,
        branch: &Branch,
        message: &str,
        changes: ChangeSet,
    ) -> Result<Timestamp, ApplyError> {
        let timestamp = self.with_log(|log| {
            let timestamp = self.tick(log, branch.head_timestamp());
            self.record(
                log,
                CommitRecord {
                    path: branch.path().clone(),
                    lineage: lineage(branch),
                    timestamp,
                    message: message.to_string(),
                    changes,
                },
            )?;
            Ok(timestamp)
        })?;
        tracing::debug!(path = %branch.path(), %timestamp, "recorded commit");
        Ok(timestamp)
    }

    /// Remove a commit recorded by [`LocalApplier::commit`] whose head
    /// advance was refused.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::Storage`] if the log cannot be persisted.
    pub fn discard(&self, branch: &Branch, timestamp: Timestamp) -> Result<(), ApplyError> {
        self.with_log(|log| {
            if log.remove(branch.path(), timestamp) {
                self.persist(log)?;
            }
            Ok(())
        })
    }

    fn lock_log(&self) -> MutexGuard<'_, ChangeLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_file(path: &Path) -> Result<FileLock, ApplyError> {
        let lock_path = FileLock::sibling_of(path);
        FileLock::acquire(&lock_path).map_err(|e| {
            ApplyError::Storage(format!("cannot lock {}: {}", lock_path.display(), e))
        })
    }

    /// Run `f` against the current log.
    ///
    /// With a backing file, the in-process mutex and then the file lock are
    /// held for the whole call and the log is reloaded from disk first.
    fn with_log<T>(
        &self,
        f: impl FnOnce(&mut ChangeLog) -> Result<T, ApplyError>,
    ) -> Result<T, ApplyError> {
        let mut log = self.lock_log();
        let _lock = match &self.file {
            Some(path) => {
                let lock = Self::lock_file(path)?;
                *log = ChangeLog::load(path)?;
                Some(lock)
            }
            None => None,
        };
        f(&mut log)
    }

    /// A fresh timestamp after `after` and after everything in `log`.
    fn tick(&self, log: &ChangeLog, after: Timestamp) -> Timestamp {
        let floor = log.latest_timestamp().map_or(after, |latest| latest.max(after));
        self.clock.tick(floor)
    }

    fn record(&self, log: &mut ChangeLog, commit: CommitRecord) -> Result<(), ApplyError> {
        let (path, timestamp) = (commit.path.clone(), commit.timestamp);
        log.record(commit);
        if let Err(e) = self.persist(log) {
            log.remove(&path, timestamp);
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self, log: &ChangeLog) -> Result<(), ApplyError> {
        match &self.file {
            Some(path) => log.save(path),
            None => Ok(()),
        }
    }

    fn target_window(log: &ChangeLog, source: &Branch, target: &Branch) -> ChangeSet {
        if source.path() == target.path() {
            match source.parent_path() {
                Some(parent) => log.path_changes(
                    &parent,
                    source.base_timestamp(),
                    target.base_timestamp(),
                ),
                None => ChangeSet::new(),
            }
        } else {
            log.lineage_changes(
                target.path(),
                lineage(target),
                source.base_timestamp(),
                target.head_timestamp(),
            )
        }
    }

    fn decide(&self, change: &Change, target: &ObjectHistory) -> (Resolution, Option<String>) {
        let p = &self.processor;
        match change {
            Change::Added { object, .. } => (p.added_in_source(object, target), None),
            Change::Detached { object } => {
                let resolution = if target.changed() && !target.added && !target.detached {
                    p.changed_in_target_detached_in_source(object, target)
                } else {
                    p.detached_in_source(object, target)
                };
                (resolution, None)
            }
            Change::Changed {
                object,
                feature,
                value,
            } => {
                let resolution = if target.detached {
                    p.changed_in_source_detached_in_target(object, feature)
                } else if let Some(target_value) = target.features.get(feature) {
                    p.changed_in_source_and_target(object, feature, value, target_value)
                } else {
                    Resolution::Apply
                };
                (resolution, Some(feature.clone()))
            }
        }
    }

    fn apply_to(
        &self,
        log: &mut ChangeLog,
        target: &Branch,
        source: &Branch,
        dry_run: bool,
        commit_message: &str,
    ) -> Result<ApplyOutcome, ApplyError> {
        let source_changes = log.lineage_changes(
            source.path(),
            lineage(source),
            source.base_timestamp(),
            source.head_timestamp(),
        );
        let target_history = Self::target_window(log, source, target).history();

        self.processor.pre_process(source, target);

        let mut accepted = Vec::new();
        let mut conflicts = Vec::new();
        for change in source_changes {
            let (resolution, feature) = match target_history.get(change.object()) {
                Some(history) => self.decide(&change, history),
                None => (Resolution::Apply, None),
            };
            match resolution {
                Resolution::Apply => accepted.push(change),
                Resolution::Skip => {}
                Resolution::Conflict(kind) => {
                    conflicts.push(ConflictRecord::new(change.object().clone(), feature, kind))
                }
            }
        }

        let conflicts = self.processor.collect_conflicts(conflicts);
        if !conflicts.is_empty() {
            tracing::debug!(
                source = %source.path(),
                target = %target.path(),
                conflicts = conflicts.len(),
                "change sets collide"
            );
            return Err(ApplyError::Conflict(MergeConflict::new(conflicts)));
        }

        let accepted = ChangeSet::from(self.processor.post_process(accepted));
        if dry_run {
            return Ok(ApplyOutcome {
                head: target.head_timestamp(),
                handle: None,
            });
        }

        let head = self.tick(log, target.head_timestamp());
        let applied = accepted.len();
        self.record(
            log,
            CommitRecord {
                path: target.path().clone(),
                lineage: lineage(target),
                timestamp: head,
                message: commit_message.to_string(),
                changes: accepted,
            },
        )?;
        tracing::debug!(
            source = %source.path(),
            target = %target.path(),
            %head,
            applied,
            "applied change set"
        );

        let handle = target.handle().cloned().map(|mut handle| {
            handle.payload = json!({ "last_commit": head.get() });
            handle
        });
        Ok(ApplyOutcome { head, handle })
    }
}

impl ChangeSetApplier for LocalApplier {
    fn apply(&self, request: &ApplyRequest) -> Result<ApplyOutcome, ApplyError> {
        let ApplyRequest {
            target,
            source,
            dry_run,
            commit_message,
        } = request;

        self.with_log(|log| self.apply_to(log, target, source, *dry_run, commit_message))
    }
}

/// Lineage id of a branch version.
fn lineage(branch: &Branch) -> u64 {
    branch.handle().map_or(0, |h| h.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::branch::StorageHandle;
    use crate::core::types::{BranchName, Metadata};
    use crate::merge::changes::ObjectId;
    use crate::merge::conflict::ConflictKind;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    /// Deterministic clock: `after + 10`, never repeating.
    #[derive(Debug, Default)]
    struct StepClock(AtomicU64);

    impl Clock for StepClock {
        fn tick(&self, after: Timestamp) -> Timestamp {
            let want = after.get() + 10;
            let prev = self
                .0
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| Some(want.max(p + 1)))
                .unwrap_or_else(|p| p);
            Timestamp::new(want.max(prev + 1))
        }
    }

    fn obj(id: &str) -> ObjectId {
        ObjectId::new(id).unwrap()
    }

    fn set(id: &str, feature: &str, value: serde_json::Value) -> ChangeSet {
        vec![Change::Changed {
            object: obj(id),
            feature: feature.into(),
            value,
        }]
        .into()
    }

    fn fixture() -> (LocalApplier, Branch, Branch) {
        let applier = LocalApplier::new().with_clock(StepClock::default());
        let main = Branch::main(Timestamp::new(0), Timestamp::new(100))
            .unwrap()
            .with_handle(StorageHandle::new(0));
        let a = Branch::child(&main, BranchName::new("a").unwrap(), Metadata::new())
            .with_handle(StorageHandle::new(1));
        (applier, main, a)
    }

    fn request(target: &Branch, source: &Branch, dry_run: bool) -> ApplyRequest {
        ApplyRequest {
            target: target.clone(),
            source: source.clone(),
            dry_run,
            commit_message: "merge".into(),
        }
    }

    mod clock {
        use super::*;

        #[test]
        fn monotonic_ticks_increase() {
            let clock = MonotonicClock::new();
            let a = clock.tick(Timestamp::new(0));
            let b = clock.tick(Timestamp::new(0));
            assert!(b > a);
        }

        #[test]
        fn tick_exceeds_floor() {
            let far = Timestamp::new(u64::MAX / 2);
            let clock = MonotonicClock::starting_after(far);
            assert!(clock.tick(Timestamp::new(0)) > far);
            assert!(MonotonicClock::new().tick(far) > far);
        }
    }

    #[test]
    fn merge_records_commit_on_target() {
        let (applier, main, a) = fixture();
        let t = applier.commit(&a, "edit", set("x", "title", json!("a"))).unwrap();
        let a = a.with_head_timestamp(t).unwrap();

        let outcome = applier.apply(&request(&main, &a, false)).unwrap();
        assert!(outcome.head > main.head_timestamp());
        assert_eq!(
            outcome.handle.unwrap().payload,
            json!({ "last_commit": outcome.head.get() })
        );

        let log = applier.log().unwrap();
        let merged: Vec<_> = log.commits_on(main.path()).collect();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].changes.len(), 1);
        assert_eq!(merged[0].message, "merge");
    }

    #[test]
    fn dry_run_records_nothing() {
        let (applier, main, a) = fixture();
        let t = applier.commit(&a, "edit", set("x", "title", json!("a"))).unwrap();
        let a = a.with_head_timestamp(t).unwrap();

        let outcome = applier.apply(&request(&main, &a, true)).unwrap();
        assert_eq!(outcome.head, main.head_timestamp());
        assert_eq!(applier.log().unwrap().commits().len(), 1);
    }

    #[test]
    fn changed_in_both_conflicts() {
        let (applier, main, a) = fixture();
        let ta = applier.commit(&a, "a", set("x", "title", json!("a"))).unwrap();
        let tm = applier.commit(&main, "m", set("x", "title", json!("m"))).unwrap();
        let a = a.with_head_timestamp(ta).unwrap();
        let main = main.with_head_timestamp(tm).unwrap();

        let conflict = match applier.apply(&request(&main, &a, false)) {
            Err(ApplyError::Conflict(conflict)) => conflict,
            other => panic!("expected conflict, got {other:?}"),
        };
        assert_eq!(conflict.conflicts.len(), 1);
        assert_eq!(conflict.conflicts[0].kind, ConflictKind::ChangedInBoth);
        assert_eq!(conflict.conflicts[0].feature.as_deref(), Some("title"));
        assert_eq!(applier.log().unwrap().commits().len(), 2);
    }

    #[test]
    fn identical_edits_merge_cleanly() {
        let (applier, main, a) = fixture();
        let ta = applier.commit(&a, "a", set("x", "title", json!("same"))).unwrap();
        let tm = applier.commit(&main, "m", set("x", "title", json!("same"))).unwrap();
        let a = a.with_head_timestamp(ta).unwrap();
        let main = main.with_head_timestamp(tm).unwrap();

        let outcome = applier.apply(&request(&main, &a, false)).unwrap();
        let log = applier.log().unwrap();
        let last = log.commits().last().unwrap();
        assert_eq!(last.timestamp, outcome.head);
        assert!(last.changes.is_empty());
    }

    #[test]
    fn detach_against_target_edit_conflicts() {
        let (applier, main, a) = fixture();
        let ta = applier
            .commit(&a, "a", vec![Change::Detached { object: obj("x") }].into())
            .unwrap();
        let tm = applier.commit(&main, "m", set("x", "title", json!("m"))).unwrap();
        let a = a.with_head_timestamp(ta).unwrap();
        let main = main.with_head_timestamp(tm).unwrap();

        let Err(ApplyError::Conflict(conflict)) = applier.apply(&request(&main, &a, true)) else {
            panic!("expected conflict");
        };
        assert_eq!(
            conflict.conflicts[0].kind,
            ConflictKind::ChangedInTargetDetachedInSource
        );
    }

    #[test]
    fn added_in_both_conflicts() {
        let (applier, main, a) = fixture();
        let add = || -> ChangeSet {
            vec![Change::Added {
                object: obj("x"),
                features: BTreeMap::new(),
            }]
            .into()
        };
        let ta = applier.commit(&a, "a", add()).unwrap();
        let tm = applier.commit(&main, "m", add()).unwrap();
        let a = a.with_head_timestamp(ta).unwrap();
        let main = main.with_head_timestamp(tm).unwrap();

        let Err(ApplyError::Conflict(conflict)) = applier.apply(&request(&main, &a, false)) else {
            panic!("expected conflict");
        };
        assert_eq!(conflict.conflicts[0].kind, ConflictKind::AddedInBoth);
    }

    #[test]
    fn target_commits_before_source_base_are_ignored() {
        let (applier, main, _) = fixture();
        let tm = applier.commit(&main, "m", set("x", "title", json!("m"))).unwrap();
        let main = main.with_head_timestamp(tm).unwrap();
        let a = Branch::child(&main, BranchName::new("a").unwrap(), Metadata::new())
            .with_handle(StorageHandle::new(1));
        let ta = applier.commit(&a, "a", set("x", "title", json!("a"))).unwrap();
        let a = a.with_head_timestamp(ta).unwrap();

        assert!(applier.apply(&request(&main, &a, false)).is_ok());
    }

    #[test]
    fn rebase_replay_checks_parent_window() {
        let (applier, main, a) = fixture();
        let ta = applier.commit(&a, "a", set("x", "title", json!("a"))).unwrap();
        let tm = applier.commit(&main, "m", set("x", "title", json!("m"))).unwrap();
        let a = a.with_head_timestamp(ta).unwrap();
        let main = main.with_head_timestamp(tm).unwrap();

        let rebased = Branch::child(&main, BranchName::new("a").unwrap(), Metadata::new())
            .with_handle(StorageHandle::new(2));
        assert!(matches!(
            applier.apply(&request(&rebased, &a, true)),
            Err(ApplyError::Conflict(_))
        ));
    }

    #[test]
    fn discarded_lineage_does_not_leak() {
        let (applier, main, a) = fixture();
        let ta = applier.commit(&a, "a", set("x", "title", json!("a"))).unwrap();
        let _old = a.with_head_timestamp(ta).unwrap();

        let reopened = Branch::child(&main, BranchName::new("a").unwrap(), Metadata::new())
            .with_handle(StorageHandle::new(9));
        let t = applier.commit(&reopened, "b", ChangeSet::new()).unwrap();
        let reopened = reopened.with_head_timestamp(t).unwrap();

        applier.apply(&request(&main, &reopened, false)).unwrap();
        let log = applier.log().unwrap();
        assert!(log.commits_on(main.path()).all(|c| c.changes.is_empty()));
    }

    #[test]
    fn discard_removes_commit() {
        let (applier, _, a) = fixture();
        let t = applier.commit(&a, "a", ChangeSet::new()).unwrap();
        applier.discard(&a, t).unwrap();
        assert!(applier.log().unwrap().commits().is_empty());
    }

    #[test]
    fn open_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("changes.json");
        let (_, _, a) = fixture();

        let t = {
            let applier = LocalApplier::open(&path).unwrap();
            applier.commit(&a, "a", set("x", "title", json!(1))).unwrap()
        };

        let reopened = LocalApplier::open(&path).unwrap();
        assert_eq!(reopened.file(), Some(path.as_path()));
        assert_eq!(reopened.log().unwrap().latest_timestamp(), Some(t));
        assert!(reopened.commit(&a, "b", ChangeSet::new()).unwrap() > t);
    }

    #[test]
    fn handles_sharing_a_file_keep_each_others_commits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/changes.json");
        let (_, main, a) = fixture();
        let first = LocalApplier::open(&path).unwrap();
        let second = LocalApplier::open(&path).unwrap();

        let ta = first.commit(&a, "a", set("x", "title", json!("a"))).unwrap();
        let tm = second.commit(&main, "m", set("y", "title", json!("m"))).unwrap();
        assert!(tm > ta);

        let log = LocalApplier::open(&path).unwrap().log().unwrap();
        assert_eq!(log.commits().len(), 2);
        assert_eq!(first.log().unwrap(), log);
    }

    #[test]
    fn apply_sees_commits_from_another_handle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("changes.json");
        let (_, main, a) = fixture();
        let writer = LocalApplier::open(&path).unwrap();
        let merger = LocalApplier::open(&path).unwrap();

        let ta = writer.commit(&a, "a", set("x", "title", json!("a"))).unwrap();
        let a = a.with_head_timestamp(ta).unwrap();
        let outcome = merger.apply(&request(&main, &a, false)).unwrap();
        assert!(outcome.head > ta);

        let log = writer.log().unwrap();
        let merged: Vec<_> = log.commits_on(main.path()).collect();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].changes.len(), 1);
    }
}
