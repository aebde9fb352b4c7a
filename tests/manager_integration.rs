//! Integration tests for the branch manager.
//!
//! These tests drive the manager through its public API, both against the
//! scripted applier with exact timestamps and end to end against the
//! file-backed store and change log created in a tempdir.

use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use serde_json::json;
use tempfile::TempDir;

use branchline::core::branch::{Branch, BranchState};
use branchline::core::store::{FileStore, MemoryStore};
use branchline::core::types::{BranchName, BranchPath, Metadata, Timestamp};
use branchline::manager::{BranchChange, BranchError, BranchManager, ChangeEvent, ManagerSettings};
use branchline::merge::changes::{Change, ChangeSet, ObjectId};
use branchline::merge::{LocalApplier, MockApplier};
use branchline::review::ReviewStore;
use branchline::service::{BranchService, MergeRequest};

// =============================================================================
// Test Helpers
// =============================================================================

fn ts(v: u64) -> Timestamp {
    Timestamp::new(v)
}

fn name(s: &str) -> BranchName {
    BranchName::new(s).unwrap()
}

fn path(s: &str) -> BranchPath {
    BranchPath::new(s).unwrap()
}

/// Manager over an in-memory store with a root at `t=100`.
fn scripted(heads: impl IntoIterator<Item = u64>) -> (Arc<BranchManager>, Branch) {
    let manager = BranchManager::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MockApplier::new().with_heads(heads)),
        ManagerSettings::default(),
    );
    let main = manager
        .initialize(Branch::main(ts(0), ts(100)).unwrap())
        .unwrap();
    (Arc::new(manager), main)
}

/// File-backed state with the local applier.
struct Workspace {
    dir: TempDir,
    manager: Arc<BranchManager>,
    applier: Arc<LocalApplier>,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        Self::open(dir)
    }

    fn open(dir: TempDir) -> Self {
        let store = FileStore::open(dir.path().join("branches.json")).unwrap();
        let applier = Arc::new(LocalApplier::open(dir.path().join("changes.json")).unwrap());
        let manager = BranchManager::new(
            Arc::new(store),
            applier.clone(),
            ManagerSettings::default(),
        );
        manager
            .initialize(Branch::main(ts(0), ts(0)).unwrap())
            .unwrap();
        Self {
            dir,
            manager: Arc::new(manager),
            applier,
        }
    }

    fn reopen(self) -> Self {
        Self::open(self.dir)
    }

    fn get(&self, p: &str) -> Branch {
        self.manager.get_branch(&path(p)).unwrap()
    }

    fn commit(&self, p: &str, changes: Vec<Change>) -> Branch {
        let branch = self.get(p);
        let t = self
            .applier
            .commit(&branch, "test commit", ChangeSet::from(changes))
            .unwrap();
        self.manager.handle_commit(&branch, t).unwrap()
    }
}

fn obj(id: &str) -> ObjectId {
    ObjectId::new(id).unwrap()
}

fn set(id: &str, feature: &str, value: serde_json::Value) -> Change {
    Change::Changed {
        object: obj(id),
        feature: feature.to_string(),
        value,
    }
}

// =============================================================================
// Scripted timelines
// =============================================================================

#[test]
fn forward_branch_merges_and_restarts_at_new_head() {
    let (manager, main) = scripted([160]);
    let a = manager.create_child(&main, name("a"), Metadata::new()).unwrap();
    assert_eq!((a.base_timestamp(), a.head_timestamp()), (ts(100), ts(100)));

    let a = manager.handle_commit(&a, ts(150)).unwrap();
    assert_eq!(manager.branch_state(a.path()).unwrap(), BranchState::Forward);

    let main = manager.merge(&main, &a, None).unwrap();
    assert_eq!(main.head_timestamp(), ts(160));

    let a = manager.get_branch(a.path()).unwrap();
    assert_eq!((a.base_timestamp(), a.head_timestamp()), (ts(160), ts(160)));
    assert_eq!(manager.branch_state(a.path()).unwrap(), BranchState::UpToDate);
}

#[test]
fn behind_branch_rebases_to_parent_head() {
    let (manager, main) = scripted([200]);
    let a = manager.create_child(&main, name("a"), Metadata::new()).unwrap();
    let s = manager.create_child(&main, name("s"), Metadata::new()).unwrap();
    let s = manager.handle_commit(&s, ts(150)).unwrap();
    let main = manager.merge(&main, &s, None).unwrap();
    assert_eq!(main.head_timestamp(), ts(200));
    assert_eq!(manager.branch_state(a.path()).unwrap(), BranchState::Behind);

    let a = manager.rebase(&a, &main, None).unwrap();
    assert_eq!((a.base_timestamp(), a.head_timestamp()), (ts(200), ts(200)));
    assert_eq!(manager.branch_state(a.path()).unwrap(), BranchState::UpToDate);
}

#[test]
fn diverged_branch_replays_own_commits_on_parent_head() {
    let (manager, main) = scripted([200, 210]);
    let a = manager.create_child(&main, name("a"), Metadata::new()).unwrap();
    let s = manager.create_child(&main, name("s"), Metadata::new()).unwrap();
    let a = manager.handle_commit(&a, ts(120)).unwrap();
    let s = manager.handle_commit(&s, ts(150)).unwrap();
    let main = manager.merge(&main, &s, None).unwrap();
    assert_eq!(manager.branch_state(a.path()).unwrap(), BranchState::Diverged);

    let a = manager.rebase(&a, &main, None).unwrap();
    assert_eq!((a.base_timestamp(), a.head_timestamp()), (ts(200), ts(210)));
    assert_eq!(manager.branch_state(a.path()).unwrap(), BranchState::Forward);

    // The rebased branch now merges cleanly.
    assert!(manager.merge(&main, &a, None).is_ok());
}

#[test]
fn root_never_deletes() {
    let (manager, main) = scripted([]);
    manager.create_child(&main, name("a"), Metadata::new()).unwrap();
    let err = manager.delete(&main).unwrap_err();
    assert!(matches!(err, BranchError::BadRequest(_)), "{err:?}");
    assert!(!manager.get_branch(&BranchPath::main()).unwrap().is_deleted());
}

#[test]
fn delete_tombstones_whole_subtree_and_notifies_each() {
    let (manager, main) = scripted([]);
    let events = Arc::new(Mutex::new(Vec::<BranchChange>::new()));
    let sink = events.clone();
    manager.add_change_listener(move |change| sink.lock().unwrap().push(change.clone()));

    let a = manager.create_child(&main, name("a"), Metadata::new()).unwrap();
    let b = manager.create_child(&a, name("b"), Metadata::new()).unwrap();
    manager.create_child(&b, name("c"), Metadata::new()).unwrap();
    manager.create_child(&main, name("keep"), Metadata::new()).unwrap();

    manager.delete(&a).unwrap();

    let deleted: Vec<String> = events
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.event == ChangeEvent::Deleted)
        .map(|c| c.path.to_string())
        .collect();
    assert_eq!(deleted, vec!["MAIN/a/b/c", "MAIN/a/b", "MAIN/a"]);

    for p in ["MAIN/a", "MAIN/a/b", "MAIN/a/b/c"] {
        assert!(manager.get_branch(&path(p)).unwrap().is_deleted(), "{p}");
    }
    assert!(!manager.get_branch(&path("MAIN/keep")).unwrap().is_deleted());
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn concurrent_creates_admit_exactly_one() {
    let (manager, main) = scripted([]);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            let main = main.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                manager.create_child(&main, name("race"), Metadata::new())
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, BranchError::AlreadyExists { .. })));
}

#[test]
fn concurrent_commits_keep_highest_head() {
    let (manager, main) = scripted([]);
    let a = manager.create_child(&main, name("a"), Metadata::new()).unwrap();
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (1..=8u64)
        .map(|i| {
            let manager = manager.clone();
            let a = a.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                manager.handle_commit(&a, ts(100 + i))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(results.iter().any(|r| r.is_ok()));
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, BranchError::BadRequest(_))));
    assert_eq!(manager.get_branch(a.path()).unwrap().head_timestamp(), ts(108));
}

// =============================================================================
// End to end with the file store and change log
// =============================================================================

#[test]
fn content_merge_lands_on_parent() {
    let ws = Workspace::new();
    let a = ws
        .manager
        .create_child(&ws.get("MAIN"), name("a"), Metadata::new())
        .unwrap();
    let a_head = ws
        .commit(
            "MAIN/a",
            vec![Change::Added {
                object: obj("doc-1"),
                features: [("title".to_string(), json!("draft"))].into_iter().collect(),
            }],
        )
        .head_timestamp();
    assert_eq!(ws.manager.branch_state(a.path()).unwrap(), BranchState::Forward);

    let main = ws.manager.merge(&ws.get("MAIN"), &ws.get("MAIN/a"), None).unwrap();
    assert!(main.head_timestamp() > a_head);

    let log = ws.applier.log().unwrap();
    let merge_commit = log.commits_on(main.path()).last().unwrap();
    assert_eq!(merge_commit.message, "Merge MAIN/a into MAIN");
    assert_eq!(merge_commit.timestamp, main.head_timestamp());
    assert_eq!(merge_commit.changes.len(), 1);

    let a = ws.get("MAIN/a");
    assert_eq!(a.base_timestamp(), main.head_timestamp());
    assert_eq!(ws.manager.branch_state(a.path()).unwrap(), BranchState::UpToDate);
}

#[test]
fn colliding_rebase_reports_conflict_and_keeps_branch() {
    let ws = Workspace::new();
    let main = ws.get("MAIN");
    ws.manager.create_child(&main, name("a"), Metadata::new()).unwrap();
    ws.manager.create_child(&main, name("b"), Metadata::new()).unwrap();

    ws.commit("MAIN/a", vec![set("doc-1", "title", json!("A"))]);
    ws.manager.merge(&ws.get("MAIN"), &ws.get("MAIN/a"), None).unwrap();
    let b = ws.commit("MAIN/b", vec![set("doc-1", "title", json!("B"))]);
    assert_eq!(ws.manager.branch_state(b.path()).unwrap(), BranchState::Diverged);

    let err = ws.manager.rebase(&b, &ws.get("MAIN"), None).unwrap_err();
    match err {
        BranchError::Conflict { conflicts, .. } => {
            assert_eq!(conflicts, vec!["doc-1.title: changed in both source and target"]);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(ws.get("MAIN/b"), b);
}

#[test]
fn identical_changes_rebase_cleanly() {
    let ws = Workspace::new();
    let main = ws.get("MAIN");
    ws.manager.create_child(&main, name("a"), Metadata::new()).unwrap();
    ws.manager.create_child(&main, name("b"), Metadata::new()).unwrap();

    ws.commit("MAIN/a", vec![set("doc-1", "title", json!("same"))]);
    let main = ws.manager.merge(&ws.get("MAIN"), &ws.get("MAIN/a"), None).unwrap();
    let b = ws.commit("MAIN/b", vec![set("doc-1", "title", json!("same"))]);

    let b = ws.manager.rebase(&b, &main, None).unwrap();
    assert_eq!(b.base_timestamp(), main.head_timestamp());
    assert_ne!(ws.manager.branch_state(b.path()).unwrap(), BranchState::Diverged);
}

#[test]
fn state_survives_reopen() {
    let ws = Workspace::new();
    ws.manager
        .create_child(&ws.get("MAIN"), name("a"), Metadata::new())
        .unwrap();
    let a = ws.commit("MAIN/a", vec![set("doc-1", "title", json!("x"))]);
    let a_handle = a.handle().unwrap().id;

    let ws = ws.reopen();
    assert_eq!(ws.get("MAIN/a"), a);
    assert_eq!(ws.applier.log().unwrap().commits_on(a.path()).count(), 1);

    let b = ws
        .manager
        .create_child(&ws.get("MAIN"), name("b"), Metadata::new())
        .unwrap();
    assert!(b.handle().unwrap().id > a_handle);
}

#[test]
fn stale_review_blocks_merge() {
    let ws = Workspace::new();
    let service = BranchService::new(ws.manager.clone(), Arc::new(ReviewStore::new()));
    service
        .create_branch(&BranchPath::main(), name("a"), Metadata::new())
        .unwrap();
    ws.commit("MAIN/a", vec![set("doc-1", "title", json!("v1"))]);

    let review = service.create_review(&path("MAIN/a"), &BranchPath::main()).unwrap();
    ws.commit("MAIN/a", vec![set("doc-1", "title", json!("v2"))]);

    let request = MergeRequest::new(path("MAIN/a"), BranchPath::main()).with_review(review.id);
    let err = service.merge(&request).unwrap_err();
    assert!(matches!(err, BranchError::Conflict { .. }), "{err:?}");
    assert_eq!(ws.get("MAIN").head_timestamp(), ts(0));

    let fresh = service.create_review(&path("MAIN/a"), &BranchPath::main()).unwrap();
    let merged = service.merge(&request.with_review(fresh.id)).unwrap();
    assert!(merged.head_timestamp() > ts(0));
}
