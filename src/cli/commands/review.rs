//! review command - Open and inspect merge reviews

use anyhow::{Context as _, Result};
use uuid::Uuid;

use super::parse_path;
use crate::cli::Context;
use crate::review::ReviewStatus;
use crate::ui::output;

/// Open a review over the current `source` and `target`.
pub fn create(ctx: &Context, source: &str, target: &str) -> Result<()> {
    let review = ctx
        .service
        .create_review(&parse_path(source)?, &parse_path(target)?)?;
    if ctx.json {
        return output::json(&review);
    }
    if ctx.verbosity == output::Verbosity::Quiet {
        println!("{}", review.id);
    } else {
        println!("{}", output::format_review(&review, ReviewStatus::Current));
    }
    Ok(())
}

/// Show a review and whether it still matches both branches.
pub fn show(ctx: &Context, id: &str) -> Result<()> {
    let id = Uuid::parse_str(id).with_context(|| format!("invalid review id '{id}'"))?;
    let (review, status) = ctx.service.get_review(id)?;
    if ctx.json {
        return output::json(&serde_json::json!({
            "review": review,
            "status": status,
        }));
    }
    println!("{}", output::format_review(&review, status));
    Ok(())
}
