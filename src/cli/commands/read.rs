//! list, show, children, tree and state commands - Read-only queries

use anyhow::Result;

use super::parse_path;
use crate::cli::Context;
use crate::core::branch::Branch;
use crate::core::tree::BranchTree;
use crate::core::types::BranchPath;
use crate::ui::output::{self, BranchView};

/// Print every branch, optionally hiding deleted ones.
pub fn list(ctx: &Context, live: bool) -> Result<()> {
    let branches: Vec<Branch> = ctx
        .service
        .read_all()?
        .into_iter()
        .filter(|b| !live || !b.is_deleted())
        .collect();
    print_branches(ctx, &branches)
}

/// Print one branch.
pub fn show(ctx: &Context, path: &str) -> Result<()> {
    let branch = ctx.service.read_branch(&parse_path(path)?)?;
    if ctx.json {
        return output::json(&BranchView::from(&branch));
    }
    println!("{}", output::format_branch_details(&branch));
    Ok(())
}

/// Print every branch below `path`.
///
/// Outputs nothing (exit 0) if the branch has no descendants.
pub fn children(ctx: &Context, path: &str) -> Result<()> {
    let branches = ctx.service.read_children(&parse_path(path)?)?;
    print_branches(ctx, &branches)
}

/// Print the hierarchy rooted at `MAIN`.
pub fn tree(ctx: &Context) -> Result<()> {
    let branches = ctx.service.read_all()?;
    let tree = BranchTree::from_branches(&branches);
    let lines = tree.render(&BranchPath::main());
    if ctx.json {
        return output::json(&lines);
    }
    println!("{}", lines.join("\n"));
    Ok(())
}

/// Print the state of `path` against its parent or `against`.
pub fn state(ctx: &Context, path: &str, against: Option<&str>) -> Result<()> {
    let path = parse_path(path)?;
    let manager = ctx.service.manager();
    let (other, state) = match against {
        Some(other) => {
            let other = parse_path(other)?;
            let state = manager.branch_state_against(&path, &other)?;
            (other.to_string(), state)
        }
        None => {
            let state = manager.branch_state(&path)?;
            let parent = path
                .parent()
                .map_or_else(|| "itself".to_string(), |p| p.to_string());
            (parent, state)
        }
    };

    if ctx.json {
        return output::json(&serde_json::json!({
            "path": path,
            "against": other,
            "state": state,
        }));
    }
    println!("{}", output::format_state(&path, &other, state));
    Ok(())
}

fn print_branches(ctx: &Context, branches: &[Branch]) -> Result<()> {
    if ctx.json {
        let views: Vec<BranchView> = branches.iter().map(BranchView::from).collect();
        return output::json(&views);
    }
    let lines: Vec<String> = branches.iter().map(output::format_branch).collect();
    if !lines.is_empty() {
        println!("{}", output::format_list(&lines, ""));
    }
    Ok(())
}
