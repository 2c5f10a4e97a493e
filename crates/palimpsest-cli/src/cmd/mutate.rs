//! `pal rename`, `pal set-dob`, `pal set-role` — compare-and-set updates.
//!
//! Each command names the revision it read (`--expect`). If the user has
//! moved on since, the write is rejected with a conflict and nothing changes;
//! re-run `pal show` and retry with the new revision.

use chrono::NaiveDate;
use clap::Args;
use palimpsest_core::model::user::parse_date;
use palimpsest_core::{Name, Patch, Revision, Role, UserId};
use tracing::debug;

use super::{Context, UserView};
use crate::output::render_item;

#[derive(Args, Debug)]
pub struct RenameArgs {
    /// User ID.
    pub id: UserId,

    /// Revision the change was based on.
    #[arg(long)]
    pub expect: Revision,

    /// New display name, 1-30 characters.
    pub name: Name,
}

#[derive(Args, Debug)]
pub struct SetDobArgs {
    /// User ID.
    pub id: UserId,

    /// Revision the change was based on.
    #[arg(long)]
    pub expect: Revision,

    /// New date of birth (YYYY-MM-DD).
    #[arg(value_parser = parse_date)]
    pub dob: NaiveDate,
}

#[derive(Args, Debug)]
pub struct SetRoleArgs {
    /// User ID.
    pub id: UserId,

    /// Revision the change was based on.
    #[arg(long)]
    pub expect: Revision,

    /// New role: guest, support or admin.
    pub role: Role,
}

/// Execute `pal rename <id> --expect REV <name>`.
///
/// # Errors
///
/// See [`apply`].
pub fn run_rename(args: &RenameArgs, ctx: &Context) -> anyhow::Result<()> {
    apply(ctx, &args.id, args.expect, Patch::new().name(args.name.clone()))
}

/// Execute `pal set-dob <id> --expect REV <date>`.
///
/// # Errors
///
/// See [`apply`].
pub fn run_set_dob(args: &SetDobArgs, ctx: &Context) -> anyhow::Result<()> {
    apply(ctx, &args.id, args.expect, Patch::new().dob(args.dob))
}

/// Execute `pal set-role <id> --expect REV <role>`.
///
/// # Errors
///
/// See [`apply`].
pub fn run_set_role(args: &SetRoleArgs, ctx: &Context) -> anyhow::Result<()> {
    apply(ctx, &args.id, args.expect, Patch::new().role(args.role))
}

/// Apply `patch` against `expected` and print the user at the revision the
/// write produced.
///
/// # Errors
///
/// Returns the store's conflict / not-found errors unchanged so the caller
/// can render their codes, or an error if the store cannot be opened.
fn apply(ctx: &Context, id: &UserId, expected: Revision, patch: Patch) -> anyhow::Result<()> {
    let mut store = ctx.open_store()?;
    let revision = store.mutate(id, expected, &patch)?;
    debug!(user_id = %id, expected, revision, "cli mutation applied");

    // Read back the produced revision, not "latest": another writer may
    // already have moved past it.
    let user = store.get_at(id, revision)?;
    render_item(&UserView::new(&user, revision), ctx.output)?;
    Ok(())
}
