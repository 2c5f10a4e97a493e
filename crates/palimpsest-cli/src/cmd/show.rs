//! `pal show` — print a user as of the latest or an earlier revision.

use clap::Args;
use palimpsest_core::{Revision, UserId};

use super::{Context, UserView};
use crate::output::render_item;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// User ID.
    pub id: UserId,

    /// Reconstruct the user as of this revision instead of the latest.
    #[arg(long)]
    pub at: Option<Revision>,
}

/// Execute `pal show <id> [--at REV]`.
///
/// # Errors
///
/// Returns an error if the user or revision does not exist, or the delta log
/// cannot be replayed back to the requested revision.
pub fn run_show(args: &ShowArgs, ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let view = match args.at {
        Some(revision) => UserView::new(&store.get_at(&args.id, revision)?, revision),
        None => {
            let (user, revision) = store.get(&args.id)?;
            UserView::new(&user, revision)
        }
    };

    render_item(&view, ctx.output)?;
    Ok(())
}
