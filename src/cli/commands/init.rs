//! init command - Create the state directory and the root branch
//!
//! The root is installed while the [`Context`] is opened, so this command
//! only reports it.

use anyhow::Result;

use crate::cli::Context;
use crate::core::types::BranchPath;
use crate::ui::output::{self, BranchView};

/// Print the root branch of a freshly opened (or existing) state directory.
pub fn init(ctx: &Context) -> Result<()> {
    let root = ctx.service.read_branch(&BranchPath::main())?;
    if ctx.json {
        return output::json(&BranchView::from(&root));
    }
    output::print(
        format!("initialized {} at {}", root.path(), root.head_timestamp()),
        ctx.verbosity,
    );
    Ok(())
}
