//! ui::output
//!
//! Output formatting and display.
//!
//! # Design
//!
//! Output is formatted consistently and respects the quiet flag.
//! When `--json` is enabled, output is machine-readable JSON.

use std::fmt::Display;

use serde::Serialize;

use crate::core::branch::{Branch, BranchState};
use crate::core::types::{Metadata, Timestamp};
use crate::review::{Review, ReviewStatus};

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Quiet mode - minimal output
    Quiet,
    /// Normal mode - standard output
    Normal,
    /// Debug mode - verbose output
    Debug,
}

impl Verbosity {
    /// Create verbosity from flags.
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if debug {
            Verbosity::Debug
        } else {
            Verbosity::Normal
        }
    }
}

/// Print a message (respects quiet mode).
pub fn print(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        println!("{}", message);
    }
}

/// Print an error message (always shown).
pub fn error(message: impl Display) {
    eprintln!("error: {}", message);
}

/// Print a warning message (respects quiet mode).
pub fn warn(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        eprintln!("warning: {}", message);
    }
}

/// Print a value as pretty JSON (always shown).
pub fn json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Flat view of a branch version for display.
#[derive(Debug, Clone, Serialize)]
pub struct BranchView {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub base: Timestamp,
    pub head: Timestamp,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl From<&Branch> for BranchView {
    fn from(branch: &Branch) -> Self {
        Self {
            path: branch.path().to_string(),
            parent: branch.parent_path().map(|p| p.to_string()),
            base: branch.base_timestamp(),
            head: branch.head_timestamp(),
            deleted: branch.is_deleted(),
            metadata: branch.metadata().clone(),
        }
    }
}

/// One-line summary of a branch: `path base..head`, with a deletion marker.
pub fn format_branch(branch: &Branch) -> String {
    let marker = if branch.is_deleted() { " (deleted)" } else { "" };
    format!(
        "{} {}..{}{}",
        branch.path(),
        branch.base_timestamp(),
        branch.head_timestamp(),
        marker
    )
}

/// Multi-line description of a branch.
pub fn format_branch_details(branch: &Branch) -> String {
    let mut lines = vec![format!("path:    {}", branch.path())];
    if let Some(parent) = branch.parent_path() {
        lines.push(format!("parent:  {}", parent));
    }
    lines.push(format!("base:    {}", branch.base_timestamp()));
    lines.push(format!("head:    {}", branch.head_timestamp()));
    if branch.is_deleted() {
        lines.push("deleted: yes".to_string());
    }
    for (key, value) in branch.metadata() {
        lines.push(format!("meta:    {}={}", key, value));
    }
    lines.join("\n")
}

/// State line for `bl state`.
pub fn format_state(path: impl Display, against: impl Display, state: BranchState) -> String {
    format!("{} against {}: {}", path, against, state)
}

/// Review summary with its current status.
pub fn format_review(review: &Review, status: ReviewStatus) -> String {
    format!(
        "review {}\n  {} -> {}\n  created {}\n  status  {}",
        review.id,
        review.source,
        review.target,
        review.created_at.as_datetime().to_rfc3339(),
        status
    )
}

/// Format a list of items.
pub fn format_list<T: Display>(items: &[T], prefix: &str) -> String {
    items
        .iter()
        .map(|item| format!("{}{}", prefix, item))
        .collect::<Vec<_>>()
        .join("\n")
}
