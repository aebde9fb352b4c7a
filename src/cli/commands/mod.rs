//! cli::commands
//!
//! Command handlers. Each handler parses its arguments into domain types,
//! calls the [`crate::service::BranchService`] and prints the result.

mod branch;
mod commit;
mod init;
mod merge;
mod read;
mod review;

pub use branch::{create, delete, reopen};
pub use commit::commit;
pub use init::init;
pub use merge::merge;
pub use read::{children, list, show, state, tree};

use anyhow::{Context as _, Result};

use crate::cli::args::{Command, ReviewAction};
use crate::cli::Context;
use crate::core::types::BranchPath;

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::Init => init(ctx),

        // Reads
        Command::List { live } => list(ctx, live),
        Command::Show { path } => show(ctx, &path),
        Command::Children { path } => children(ctx, &path),
        Command::Tree => tree(ctx),
        Command::State { path, against } => state(ctx, &path, against.as_deref()),

        // Lifecycle
        Command::Create { parent, name, meta } => create(ctx, &parent, &name, &meta),
        Command::Reopen { path } => reopen(ctx, &path),
        Command::Delete { path } => delete(ctx, &path),

        // Content
        Command::Commit {
            path,
            add,
            set,
            detach,
            message,
        } => commit(ctx, &path, &add, &set, &detach, message.as_deref()),
        Command::Merge {
            source,
            target,
            message,
            review,
        } => merge(ctx, &source, &target, message.as_deref(), review.as_deref()),

        Command::Review { action } => match action {
            ReviewAction::Create { source, target } => review::create(ctx, &source, &target),
            ReviewAction::Show { id } => review::show(ctx, &id),
        },
    }
}

/// Parse a branch path argument.
pub(crate) fn parse_path(raw: &str) -> Result<BranchPath> {
    BranchPath::new(raw).with_context(|| format!("invalid branch path '{raw}'"))
}
