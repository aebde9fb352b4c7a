//! Integration tests for the `bl` binary.
//!
//! Each test runs the real binary against a state directory in a tempdir,
//! with configuration lookup pointed at the same tempdir.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A state directory plus an isolated home for config lookup.
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    fn initialized() -> Self {
        let sandbox = Self::new();
        sandbox.bl(&["init"]).assert().success();
        sandbox
    }

    fn state(&self) -> std::path::PathBuf {
        self.dir.path().join("state")
    }

    /// Get a command for running bl against this sandbox.
    fn bl(&self, args: &[&str]) -> Command {
        let mut cmd = Command::cargo_bin("bl").unwrap();
        cmd.env("HOME", self.dir.path())
            .env("XDG_CONFIG_HOME", self.dir.path().join("config"))
            .env_remove("BRANCHLINE_CONFIG")
            .env("BRANCHLINE_LOG", "off")
            .arg("--state")
            .arg(self.state())
            .args(args);
        cmd
    }

    fn stdout(&self, args: &[&str]) -> String {
        let output = self.bl(args).output().unwrap();
        assert!(output.status.success(), "bl {args:?} failed: {output:?}");
        String::from_utf8(output.stdout).unwrap()
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        let mut full = vec!["--json"];
        full.extend_from_slice(args);
        serde_json::from_str(&self.stdout(&full)).unwrap()
    }
}

#[test]
fn help_flag_works() {
    Command::cargo_bin("bl")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("merge"));
}

#[test]
fn commands_require_init() {
    let sandbox = Sandbox::new();
    sandbox
        .bl(&["list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("run `bl init` first"));
}

#[test]
fn init_creates_state_and_is_repeatable() {
    let sandbox = Sandbox::new();
    sandbox
        .bl(&["init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("initialized MAIN"));
    assert!(sandbox.state().join("branches.json").exists());

    sandbox.bl(&["init"]).assert().success();
    let root = sandbox.json(&["show", "MAIN"]);
    assert_eq!(root["path"], "MAIN");
    assert_eq!(root["head"], 0);
}

#[test]
fn create_commit_merge_cycle() {
    let sandbox = Sandbox::initialized();
    sandbox
        .bl(&["create", "MAIN", "feature", "--meta", "owner=ana"])
        .assert()
        .success()
        .stdout(predicate::str::contains("created MAIN/feature"));

    sandbox
        .bl(&["commit", "MAIN/feature", "--add", "doc-1", "--set", "doc-1.title=draft"])
        .assert()
        .success()
        .stdout(predicate::str::contains("committed 2 change(s) to MAIN/feature"));

    sandbox
        .bl(&["state", "MAIN/feature"])
        .assert()
        .success()
        .stdout(predicate::str::contains("MAIN/feature against MAIN: FORWARD"));

    let merged = sandbox.json(&["merge", "MAIN/feature", "MAIN"]);
    assert_eq!(merged["path"], "MAIN");

    let feature = sandbox.json(&["show", "MAIN/feature"]);
    assert_eq!(feature["base"], merged["head"]);
    assert_eq!(feature["head"], merged["head"]);
    assert_eq!(feature["metadata"]["owner"], "ana");

    let state = sandbox.json(&["state", "MAIN/feature"]);
    assert_eq!(state["state"], "UP_TO_DATE");
}

#[test]
fn merge_picks_rebase_for_parent_source() {
    let sandbox = Sandbox::initialized();
    sandbox.bl(&["create", "MAIN", "a"]).assert().success();
    sandbox.bl(&["create", "MAIN", "b"]).assert().success();
    sandbox
        .bl(&["commit", "MAIN/a", "--set", "doc.title=\"A\""])
        .assert()
        .success();
    sandbox.bl(&["merge", "MAIN/a", "MAIN"]).assert().success();

    let state = sandbox.json(&["state", "MAIN/b"]);
    assert_eq!(state["state"], "BEHIND");

    let rebased = sandbox.json(&["merge", "MAIN", "MAIN/b"]);
    let main = sandbox.json(&["show", "MAIN"]);
    assert_eq!(rebased["path"], "MAIN/b");
    assert_eq!(rebased["base"], main["head"]);
}

#[test]
fn colliding_rebase_lists_conflicts() {
    let sandbox = Sandbox::initialized();
    sandbox.bl(&["create", "MAIN", "a"]).assert().success();
    sandbox.bl(&["create", "MAIN", "b"]).assert().success();
    sandbox
        .bl(&["commit", "MAIN/a", "--set", "doc.title=\"A\""])
        .assert()
        .success();
    sandbox.bl(&["merge", "MAIN/a", "MAIN"]).assert().success();
    sandbox
        .bl(&["commit", "MAIN/b", "--set", "doc.title=\"B\""])
        .assert()
        .success();

    sandbox
        .bl(&["merge", "MAIN", "MAIN/b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "conflict: doc.title: changed in both source and target",
        ));
}

#[test]
fn unrelated_branches_cannot_merge() {
    let sandbox = Sandbox::initialized();
    sandbox.bl(&["create", "MAIN", "a"]).assert().success();
    sandbox.bl(&["create", "MAIN", "b"]).assert().success();
    sandbox
        .bl(&["merge", "MAIN/a", "MAIN/b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no relation between them"));
}

#[test]
fn duplicate_create_fails_even_after_delete() {
    let sandbox = Sandbox::initialized();
    sandbox.bl(&["create", "MAIN", "a"]).assert().success();
    sandbox.bl(&["delete", "MAIN/a"]).assert().success();
    sandbox
        .bl(&["create", "MAIN", "a"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("branch 'MAIN/a' already exists"));
}

#[test]
fn delete_reports_subtree_and_root_is_protected() {
    let sandbox = Sandbox::initialized();
    sandbox.bl(&["create", "MAIN", "a"]).assert().success();
    sandbox.bl(&["create", "MAIN/a", "b"]).assert().success();
    sandbox
        .bl(&["delete", "MAIN/a"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted MAIN/a and 1 branch below it"));

    let live = sandbox.json(&["list", "--live"]);
    assert_eq!(live.as_array().unwrap().len(), 1);

    sandbox
        .bl(&["delete", "MAIN"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be deleted"));
}

#[test]
fn tree_marks_deleted_branches() {
    let sandbox = Sandbox::initialized();
    sandbox.bl(&["create", "MAIN", "a"]).assert().success();
    sandbox.bl(&["create", "MAIN/a", "b"]).assert().success();
    sandbox.bl(&["create", "MAIN", "c"]).assert().success();
    sandbox.bl(&["delete", "MAIN/c"]).assert().success();

    assert_eq!(sandbox.stdout(&["tree"]), "MAIN\n  a\n    b\n  c (deleted)\n");
}

#[test]
fn stale_review_blocks_merge() {
    let sandbox = Sandbox::initialized();
    sandbox.bl(&["create", "MAIN", "a"]).assert().success();
    sandbox
        .bl(&["commit", "MAIN/a", "--add", "doc"])
        .assert()
        .success();

    let id = sandbox
        .stdout(&["-q", "review", "create", "MAIN/a", "MAIN"])
        .trim()
        .to_string();
    sandbox
        .bl(&["review", "show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("status  current"));

    sandbox
        .bl(&["commit", "MAIN/a", "--set", "doc.n=1"])
        .assert()
        .success();
    sandbox
        .bl(&["review", "show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("status  stale"));
    sandbox
        .bl(&["merge", "MAIN/a", "MAIN", "--review", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is stale"));
}

#[test]
fn commit_without_changes_rejected() {
    let sandbox = Sandbox::initialized();
    sandbox.bl(&["create", "MAIN", "a"]).assert().success();
    sandbox
        .bl(&["commit", "MAIN/a"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nothing to commit"));
}

#[test]
fn invalid_config_is_reported() {
    let sandbox = Sandbox::initialized();
    std::fs::write(
        sandbox.state().join("config.toml"),
        "[locking]\ntimeout_ms = 0\n",
    )
    .unwrap();
    sandbox
        .bl(&["list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("timeout_ms"));
}
