//! create, reopen and delete commands - Branch lifecycle

use anyhow::{bail, Context as _, Result};
use serde_json::Value;

use super::parse_path;
use crate::cli::Context;
use crate::core::branch::Branch;
use crate::core::types::{BranchName, Metadata};
use crate::ui::output::{self, BranchView};

/// Create `name` under `parent`.
pub fn create(ctx: &Context, parent: &str, name: &str, meta: &[String]) -> Result<()> {
    let parent = parse_path(parent)?;
    let name = BranchName::new(name).with_context(|| format!("invalid branch name '{name}'"))?;
    let metadata = parse_metadata(meta)?;

    let branch = ctx.service.create_branch(&parent, name, metadata)?;
    report(ctx, &branch, "created")
}

/// Give the branch at `path` a fresh lineage at its parent's head.
pub fn reopen(ctx: &Context, path: &str) -> Result<()> {
    let branch = ctx.service.reopen_branch(&parse_path(path)?)?;
    report(ctx, &branch, "reopened")
}

/// Delete the branch at `path` together with its subtree.
pub fn delete(ctx: &Context, path: &str) -> Result<()> {
    let path = parse_path(path)?;
    let below = ctx
        .service
        .read_children(&path)?
        .iter()
        .filter(|b| !b.is_deleted())
        .count();

    let branch = ctx.service.delete_branch(&path)?;
    if ctx.json {
        return output::json(&BranchView::from(&branch));
    }
    let suffix = match below {
        0 => String::new(),
        1 => " and 1 branch below it".to_string(),
        n => format!(" and {n} branches below it"),
    };
    output::print(format!("deleted {}{}", branch.path(), suffix), ctx.verbosity);
    Ok(())
}

fn report(ctx: &Context, branch: &Branch, verb: &str) -> Result<()> {
    if ctx.json {
        return output::json(&BranchView::from(branch));
    }
    output::print(
        format!("{} {} at {}", verb, branch.path(), branch.base_timestamp()),
        ctx.verbosity,
    );
    Ok(())
}

/// Parse `key=value` pairs. Values that parse as JSON keep their type;
/// anything else becomes a string.
fn parse_metadata(entries: &[String]) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    for entry in entries {
        let Some((key, raw)) = entry.split_once('=') else {
            bail!("invalid metadata '{entry}': expected KEY=VALUE");
        };
        if key.is_empty() {
            bail!("invalid metadata '{entry}': empty key");
        }
        let value =
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}
