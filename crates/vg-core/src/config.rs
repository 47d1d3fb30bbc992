use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Per-repository file name checked before the user-level config.
pub const REPO_CONFIG_FILE: &str = ".vibe-git.toml";

/// Top-level configuration.
///
/// Looked up at `<repo-root>/.vibe-git.toml`, then `~/.vibe-git/config.toml`,
/// falling back to defaults. Every section is optional so partial files parse.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub commit: CommitConfig,
    #[serde(default)]
    pub finalize: FinalizeConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Load the config that applies to the repository at `root`.
    pub fn load_for_repo(root: &Path) -> Result<Self, ConfigError> {
        let repo_file = root.join(REPO_CONFIG_FILE);
        if repo_file.exists() {
            return Self::load_from(repo_file);
        }
        let user_file = Self::default_path();
        if user_file.exists() {
            return Self::load_from(user_file);
        }
        let cfg = Config::default();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        self.watcher.validate()?;
        self.commit.validate()?;
        self.commands.validate()?;
        if self.finalize.remote.trim().is_empty() {
            return Err(ConfigError::Validation(
                "finalize.remote must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// `~/.vibe-git/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".vibe-git")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

/// What `start` does when it finds uncommitted changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DirtyPolicy {
    /// Enter `Dirty` and wait for an explicit resolution call.
    #[default]
    Ask,
    Stash,
    Checkpoint,
    Adopt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    #[serde(default)]
    pub dirty_policy: DirtyPolicy,
    /// Fetch the trunk from `finalize.remote` and cut new session
    /// branches from the remote tip.
    #[serde(default = "default_true")]
    pub fetch_on_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            branch_prefix: default_branch_prefix(),
            dirty_policy: DirtyPolicy::default(),
            fetch_on_start: true,
        }
    }
}

impl SessionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let prefix = &self.branch_prefix;
        if prefix.is_empty() {
            return Err(ConfigError::Validation(
                "session.branch_prefix must not be empty".into(),
            ));
        }
        if prefix.starts_with(['-', '/'])
            || !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/'))
        {
            return Err(ConfigError::Validation(format!(
                "session.branch_prefix '{prefix}' may only contain ASCII letters, digits, '-', '_' and '/'"
            )));
        }
        Ok(())
    }
}

fn default_branch_prefix() -> String {
    "vibe-".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Quiet period after the last qualifying event before a flush.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Minimum spacing between two auto-commits.
    #[serde(default)]
    pub min_commit_interval_ms: u64,
    #[serde(default = "default_ignore_dirs")]
    pub ignore_dirs: Vec<String>,
    #[serde(default = "default_true")]
    pub respect_gitignore: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            min_commit_interval_ms: 0,
            ignore_dirs: default_ignore_dirs(),
            respect_gitignore: true,
        }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn min_commit_interval(&self) -> Duration {
        Duration::from_millis(self.min_commit_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms == 0 {
            return Err(ConfigError::Validation(
                "watcher.debounce_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_ignore_dirs() -> Vec<String> {
    [
        ".git",
        "target",
        "node_modules",
        ".venv",
        "__pycache__",
        "dist",
        "build",
        ".idea",
        ".vscode",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    /// Subject prefix that marks a commit as an auto-commit.
    #[serde(default = "default_marker")]
    pub marker: String,
    /// Pass `--no-verify` on auto-commits.
    #[serde(default = "default_true")]
    pub skip_hooks: bool,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            skip_hooks: true,
        }
    }
}

impl CommitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.marker.trim().is_empty() {
            return Err(ConfigError::Validation(
                "commit.marker must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn default_marker() -> String {
    "vibe-git auto-commit".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeConfig {
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_true")]
    pub create_pr: bool,
    #[serde(default = "default_true")]
    pub return_to_trunk: bool,
    /// Pass `--no-verify` on the squash commit.
    #[serde(default)]
    pub skip_hooks: bool,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            create_pr: true,
            return_to_trunk: true,
            skip_hooks: false,
        }
    }
}

fn default_remote() -> String {
    "origin".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_git_bin")]
    pub git_bin: String,
    #[serde(default = "default_hosting_bin")]
    pub hosting_bin: String,
    /// Upper bound on any single git or hosting-CLI invocation.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            git_bin: default_git_bin(),
            hosting_bin: default_hosting_bin(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CommandsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "commands.timeout_secs must be greater than zero".into(),
            ));
        }
        if self.git_bin.trim().is_empty() || self.hosting_bin.trim().is_empty() {
            return Err(ConfigError::Validation(
                "commands.git_bin and commands.hosting_bin must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn default_git_bin() -> String {
    "git".into()
}
fn default_hosting_bin() -> String {
    "gh".into()
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Records older than this are not resumed automatically.
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_after_hours: default_stale_after_hours(),
        }
    }
}

impl PersistenceConfig {
    pub fn stale_after(&self) -> chrono::Duration {
        // Clamped so absurd values cannot overflow chrono's range.
        chrono::Duration::hours(self.stale_after_hours.min(1_000_000) as i64)
    }
}

fn default_stale_after_hours() -> u64 {
    24
}
