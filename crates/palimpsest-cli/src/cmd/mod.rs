pub mod create;
pub mod history;
pub mod mutate;
pub mod show;

use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context as _, Result};
use chrono::NaiveDate;
use palimpsest_core::config::{self, StoreConfig};
use palimpsest_core::{Revision, Role, User, UserId, UserStore};
use serde::Serialize;

use crate::output::{self, OutputMode, Renderable, pretty_kv, pretty_section, write_json};

/// Resolved per-invocation settings shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub store: StoreConfig,
    pub output: OutputMode,
}

/// Global flags that feed into [`Context::resolve`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalFlags<'a> {
    pub db: Option<&'a Path>,
    pub timeout_ms: Option<u64>,
    pub format: Option<OutputMode>,
    pub json: bool,
}

impl Context {
    /// Merge config files, environment and flags for a run rooted at
    /// `project_root`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or parsed.
    pub fn resolve(project_root: &Path, flags: GlobalFlags<'_>) -> Result<Self> {
        let effective = config::resolve_config(project_root, flags.db)?;
        let mut store = effective.store;
        if let Some(ms) = flags.timeout_ms {
            store.op_timeout_ms = Some(ms);
        }
        let output =
            output::resolve_output_mode(flags.format, flags.json, effective.user.output.as_deref());

        tracing::debug!(db = %store.db_path.display(), ?output, "resolved cli context");
        Ok(Self { store, output })
    }

    /// Open the configured store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_store(&self) -> Result<UserStore> {
        UserStore::open(&self.store)
            .with_context(|| format!("open user store at {}", self.store.db_path.display()))
    }
}

/// One user at one revision, as printed by every command.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: UserId,
    pub revision: Revision,
    pub name: String,
    pub dob: NaiveDate,
    pub role: Role,
    pub age: u32,
}

impl UserView {
    #[must_use]
    pub fn new(user: &User, revision: Revision) -> Self {
        Self {
            id: user.id,
            revision,
            name: user.name.as_str().to_string(),
            dob: user.dob,
            role: user.role,
            age: user.age(),
        }
    }
}

impl Renderable for UserView {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        pretty_section(w, &format!("User {} @ revision {}", self.id, self.revision))?;
        pretty_kv(w, "Name", &self.name)?;
        pretty_kv(w, "Born", self.dob.to_string())?;
        pretty_kv(w, "Age", self.age.to_string())?;
        pretty_kv(w, "Role", self.role.as_str())?;
        writeln!(w)
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        write_json(w, self)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}",
            self.revision, self.id, self.role, self.dob, self.name
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["REV", "ID", "ROLE", "DOB", "NAME"]
    }
}
