//! Branchline - branch versioning with merge and rebase
//!
//! Branchline keeps a tree of named branches rooted at `MAIN`. Every branch
//! records where it forked from its parent (its base) and its latest
//! commit (its head); comparing those timestamps tells whether a branch is
//! ahead of, behind or diverged from its parent. Content changes are
//! applied by a pluggable change-set applier with a conflict policy.
//!
//! # Architecture
//!
//! The codebase follows a layered architecture:
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to the service)
//! - [`service`] - Request-level operations and the merge review gate
//! - [`manager`] - Branch lifecycle, commits, merge and rebase
//! - [`merge`] - Change-set appliers and conflict processing
//! - [`review`] - Review snapshots over source/target pairs
//! - [`core`] - Domain types, branch store, locks and configuration
//! - [`telemetry`] - Logging setup
//! - [`ui`] - Terminal output
//!
//! # Correctness Invariants
//!
//! Branchline maintains the following invariants:
//!
//! 1. A branch head never precedes its base
//! 2. Every stored version is written by compare-and-set
//! 3. A merge or rebase lands completely or not at all
//! 4. Deleted branches are tombstoned, never removed

pub mod cli;
pub mod core;
pub mod manager;
pub mod merge;
pub mod review;
pub mod service;
pub mod telemetry;
pub mod ui;
