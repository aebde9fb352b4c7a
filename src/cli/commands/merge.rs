//! merge command - Merge a child into its parent or rebase it onto its parent

use anyhow::{Context as _, Result};
use uuid::Uuid;

use super::parse_path;
use crate::cli::Context;
use crate::manager::BranchError;
use crate::service::MergeRequest;
use crate::ui::output::{self, BranchView};

/// Merge `source` into `target`; the service picks merge or rebase from
/// how the two are related.
pub fn merge(
    ctx: &Context,
    source: &str,
    target: &str,
    message: Option<&str>,
    review: Option<&str>,
) -> Result<()> {
    let mut request = MergeRequest::new(parse_path(source)?, parse_path(target)?);
    if let Some(message) = message {
        request = request.with_message(message);
    }
    if let Some(review) = review {
        let id = Uuid::parse_str(review).with_context(|| format!("invalid review id '{review}'"))?;
        request = request.with_review(id);
    }

    let result = match ctx.service.merge(&request) {
        Ok(result) => result,
        Err(BranchError::Conflict { message, conflicts }) if !conflicts.is_empty() => {
            for conflict in &conflicts {
                output::warn(format!("conflict: {conflict}"), ctx.verbosity);
            }
            return Err(BranchError::Conflict { message, conflicts }.into());
        }
        Err(err) => return Err(err.into()),
    };

    if ctx.json {
        return output::json(&BranchView::from(&result));
    }
    output::print(
        format!(
            "{} now at {}..{}",
            result.path(),
            result.base_timestamp(),
            result.head_timestamp()
        ),
        ctx.verbosity,
    );
    Ok(())
}
