//! `pal create` — add a user at revision 0.

use chrono::NaiveDate;
use clap::Args;
use palimpsest_core::model::user::parse_date;
use palimpsest_core::{Name, Role};

use super::{Context, UserView};
use crate::output::render_item;

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Display name, 1-30 characters.
    #[arg(long)]
    pub name: Name,

    /// Date of birth (YYYY-MM-DD).
    #[arg(long, value_parser = parse_date)]
    pub dob: NaiveDate,

    /// Initial role: guest, support or admin.
    #[arg(long, default_value = "guest")]
    pub role: Role,
}

/// Execute `pal create`.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the insert fails.
pub fn run_create(args: &CreateArgs, ctx: &Context) -> anyhow::Result<()> {
    let mut store = ctx.open_store()?;
    let id = store.create(args.name.clone(), args.dob, args.role)?;
    let (user, revision) = store.get(&id)?;

    render_item(&UserView::new(&user, revision), ctx.output)?;
    Ok(())
}
