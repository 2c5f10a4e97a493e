//! `pal history` — every revision of a user, newest first.

use clap::Args;
use palimpsest_core::{BASE_REVISION, Revision, UserId};

use super::{Context, UserView};
use crate::output::render_list;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// User ID.
    pub id: UserId,

    /// Oldest revision to include.
    #[arg(long, default_value_t = BASE_REVISION)]
    pub from: Revision,
}

/// Execute `pal history <id> [--from REV]`.
///
/// # Errors
///
/// Returns an error if the user does not exist, `--from` is past the latest
/// revision, or the delta log has a gap.
pub fn run_history(args: &HistoryArgs, ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let views: Vec<_> = store
        .history(&args.id, args.from)?
        .iter()
        .map(|entry| UserView::new(&entry.user, entry.revision))
        .collect();

    render_list(&views, ctx.output)?;
    Ok(())
}
