//! commit command - Record content changes on a branch
//!
//! The change set goes to the change log first; the branch head only
//! moves once the manager accepts the new timestamp. A refused head
//! advance removes the logged commit again.

use std::collections::BTreeMap;

use anyhow::{bail, Context as _, Result};
use serde_json::Value;

use super::parse_path;
use crate::cli::Context;
use crate::merge::changes::{Change, ChangeSet, ObjectId};
use crate::ui::output::{self, BranchView};

/// Commit additions, feature updates and detachments to `path`.
pub fn commit(
    ctx: &Context,
    path: &str,
    add: &[String],
    set: &[String],
    detach: &[String],
    message: Option<&str>,
) -> Result<()> {
    let path = parse_path(path)?;
    let changes = build_changes(add, set, detach)?;
    if changes.is_empty() {
        bail!("nothing to commit: pass --add, --set or --detach");
    }

    let branch = ctx.service.read_branch(&path)?;
    if branch.is_deleted() {
        bail!("cannot commit to deleted branch '{path}'");
    }

    let message = message.map_or_else(|| format!("Commit on {path}"), str::to_string);
    let count = changes.len();
    let timestamp = ctx.applier.commit(&branch, &message, changes)?;

    let committed = match ctx.service.manager().handle_commit(&branch, timestamp) {
        Ok(committed) => committed,
        Err(err) => {
            if let Err(discard) = ctx.applier.discard(&branch, timestamp) {
                tracing::warn!(%path, %timestamp, error = %discard, "failed to discard refused commit");
            }
            return Err(err.into());
        }
    };

    if ctx.json {
        return output::json(&BranchView::from(&committed));
    }
    output::print(
        format!(
            "committed {} change(s) to {} at {}",
            count,
            committed.path(),
            committed.head_timestamp()
        ),
        ctx.verbosity,
    );
    Ok(())
}

fn build_changes(add: &[String], set: &[String], detach: &[String]) -> Result<ChangeSet> {
    let mut changes = ChangeSet::new();
    for id in add {
        changes.push(Change::Added {
            object: object_id(id)?,
            features: BTreeMap::new(),
        });
    }
    for entry in set {
        let (object, feature, value) = parse_assignment(entry)?;
        changes.push(Change::Changed {
            object,
            feature,
            value,
        });
    }
    for id in detach {
        changes.push(Change::Detached {
            object: object_id(id)?,
        });
    }
    Ok(changes)
}

fn object_id(raw: &str) -> Result<ObjectId> {
    ObjectId::new(raw).with_context(|| format!("invalid object id '{raw}'"))
}

/// Parse `object.feature=json`. A value that is not JSON is taken as a
/// string.
fn parse_assignment(entry: &str) -> Result<(ObjectId, String, Value)> {
    let Some((target, raw)) = entry.split_once('=') else {
        bail!("invalid assignment '{entry}': expected ID.FEATURE=VALUE");
    };
    let Some((object, feature)) = target.split_once('.') else {
        bail!("invalid assignment '{entry}': expected ID.FEATURE=VALUE");
    };
    if feature.is_empty() {
        bail!("invalid assignment '{entry}': empty feature");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((object_id(object)?, feature.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn changes_are_ordered_add_set_detach() {
        let changes = build_changes(
            &["x".to_string()],
            &["x.title=\"t\"".to_string()],
            &["y".to_string()],
        )
        .unwrap();
        let ops: Vec<&str> = changes
            .changes()
            .iter()
            .map(|c| match c {
                Change::Added { .. } => "added",
                Change::Changed { .. } => "changed",
                Change::Detached { .. } => "detached",
            })
            .collect();
        assert_eq!(ops, vec!["added", "changed", "detached"]);
    }

    #[test]
    fn assignment_parses_json_or_string() {
        let (object, feature, value) = parse_assignment("doc-1.count=3").unwrap();
        assert_eq!(object.as_str(), "doc-1");
        assert_eq!(feature, "count");
        assert_eq!(value, json!(3));

        let (_, _, value) = parse_assignment("doc-1.title=hello").unwrap();
        assert_eq!(value, json!("hello"));
    }

    #[test]
    fn malformed_assignments_rejected() {
        assert!(parse_assignment("doc-1=3").is_err());
        assert!(parse_assignment("doc-1.count").is_err());
        assert!(parse_assignment("doc-1.=3").is_err());
        assert!(parse_assignment("bad id.count=3").is_err());
    }
}
