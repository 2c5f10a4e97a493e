use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory (under the project root) holding config and the default database.
pub const PROJECT_DIR: &str = ".palimpsest";

/// Environment variable overriding the database path.
pub const DB_ENV: &str = "PAL_DB";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub store: StoreConfig,
}

/// Storage settings for one [`crate::store::UserStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file; relative paths resolve against the project root.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// How long a writer waits for another writer's lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Per-operation deadline. `None` lets operations run to completion.
    #[serde(default)]
    pub op_timeout_ms: Option<u64>,
    #[serde(default)]
    pub synchronous: Synchronous,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            op_timeout_ms: None,
            synchronous: Synchronous::default(),
        }
    }
}

impl StoreConfig {
    /// Default settings pointing at `db_path`.
    #[must_use]
    pub fn at(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    #[must_use]
    pub fn op_timeout(&self) -> Option<Duration> {
        self.op_timeout_ms.map(Duration::from_millis)
    }
}

/// SQLite `synchronous` pragma level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Synchronous {
    Off,
    #[default]
    Normal,
    Full,
    Extra,
}

impl Synchronous {
    #[must_use]
    pub const fn as_pragma(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
            Self::Extra => "EXTRA",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub project: ProjectConfig,
    pub user: UserConfig,
    /// Store settings with `db_path` made absolute.
    pub store: StoreConfig,
}

pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = project_root.join(PROJECT_DIR).join("config.toml");
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("palimpsest/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Merge defaults, project file, user file, `PAL_DB` and an explicit flag.
pub fn resolve_config(project_root: &Path, db_flag: Option<&Path>) -> Result<EffectiveConfig> {
    let project = load_project_config(project_root)?;
    let user = load_user_config()?;

    let env_db = env::var_os(DB_ENV).map(PathBuf::from);
    let mut store = project.store.clone();
    store.db_path = resolve_db_path(project_root, &project.store.db_path, env_db, db_flag);

    Ok(EffectiveConfig {
        project,
        user,
        store,
    })
}

fn resolve_db_path(
    project_root: &Path,
    configured: &Path,
    env_db: Option<PathBuf>,
    db_flag: Option<&Path>,
) -> PathBuf {
    let chosen = db_flag
        .map(Path::to_path_buf)
        .or(env_db)
        .unwrap_or_else(|| configured.to_path_buf());

    if chosen.is_absolute() {
        chosen
    } else {
        project_root.join(chosen)
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(PROJECT_DIR).join("users.db")
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}
