//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--state <dir>`: Directory holding the branch, change and review files
//! - `--debug`: Enable debug logging
//! - `--quiet` / `-q`: Minimal output
//! - `--json`: Machine-readable output

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default state directory, relative to the working directory.
pub const DEFAULT_STATE_DIR: &str = ".branchline";

/// Branchline - branch versioning with merge and rebase
#[derive(Parser, Debug)]
#[command(name = "bl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding branchline state
    #[arg(long, global = true, value_name = "DIR", default_value = DEFAULT_STATE_DIR)]
    pub state: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the state directory and the root branch
    #[command(
        long_about = "Create the state directory and the root branch.\n\n\
            Running init on an existing state directory leaves it untouched and \
            prints the stored root branch."
    )]
    Init,

    /// List every branch, deleted ones included
    List {
        /// Hide deleted branches
        #[arg(long)]
        live: bool,
    },

    /// Show one branch
    Show {
        /// Branch path, e.g. MAIN/feature
        path: String,
    },

    /// List every branch below a branch
    Children {
        /// Branch path
        path: String,
    },

    /// Print the branch hierarchy
    Tree,

    /// Create a child branch
    #[command(after_help = "\
EXAMPLES:
    bl create MAIN feature
    bl create MAIN/feature fix-42 --meta owner=\"ana\" --meta priority=2")]
    Create {
        /// Parent branch path
        parent: String,

        /// Name of the new branch
        name: String,

        /// Metadata entry as key=value; JSON values are parsed, anything else is a string
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Start a fresh lineage for an existing branch
    Reopen {
        /// Branch path
        path: String,
    },

    /// Delete a branch and everything below it
    Delete {
        /// Branch path
        path: String,
    },

    /// Record content changes on a branch
    #[command(
        long_about = "Record content changes on a branch.\n\n\
            Changes are applied in the order: additions, feature updates, detachments.",
        after_help = "\
EXAMPLES:
    bl commit MAIN/feature --add doc-1 -m \"add doc\"
    bl commit MAIN/feature --set doc-1.title='\"Hello\"'
    bl commit MAIN/feature --detach doc-1"
    )]
    Commit {
        /// Branch path
        path: String,

        /// Add an object
        #[arg(long = "add", value_name = "ID")]
        add: Vec<String>,

        /// Set a feature as OBJECT.FEATURE=JSON
        #[arg(long = "set", value_name = "ID.FEATURE=VALUE")]
        set: Vec<String>,

        /// Detach an object
        #[arg(long = "detach", value_name = "ID")]
        detach: Vec<String>,

        /// Commit message
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Merge a child into its parent, or rebase a child onto its parent
    #[command(
        long_about = "Merge a child into its parent, or rebase a child onto its parent.\n\n\
            `bl merge CHILD PARENT` merges the child's commits into the parent. \
            `bl merge PARENT CHILD` rebases the child onto the parent's head.",
        after_help = "\
EXAMPLES:
    # Merge MAIN/feature into MAIN
    bl merge MAIN/feature MAIN

    # Rebase MAIN/feature onto MAIN
    bl merge MAIN MAIN/feature

    # Merge only if nothing changed since a review was opened
    bl merge MAIN/feature MAIN --review 6a1f..."
    )]
    Merge {
        /// Source branch path
        source: String,

        /// Target branch path
        target: String,

        /// Commit message
        #[arg(short, long)]
        message: Option<String>,

        /// Review that must still be current
        #[arg(long, value_name = "ID")]
        review: Option<String>,
    },

    /// Show how a branch relates to its parent or another branch
    State {
        /// Branch path
        path: String,

        /// Compare against this branch instead of the parent
        #[arg(long, value_name = "PATH")]
        against: Option<String>,
    },

    /// Open and inspect merge reviews
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },
}

/// Review subcommands.
#[derive(Subcommand, Debug)]
pub enum ReviewAction {
    /// Pin the current state of a source and target
    Create {
        /// Source branch path
        source: String,

        /// Target branch path
        target: String,
    },

    /// Show a review and whether it is still current
    Show {
        /// Review id
        id: String,
    },
}
