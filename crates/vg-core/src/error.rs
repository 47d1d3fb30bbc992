use std::path::PathBuf;
use std::time::Duration;

use crate::config::ConfigError;
use crate::finalize::FinalizeStep;
use crate::persistence::PersistenceError;

/// Every failure the session engine can surface.
///
/// Messages always name the branch or paths involved so the caller can act
/// on them without digging through logs.
#[derive(Debug, thiserror::Error)]
pub enum VibeError {
    #[error("not a git repository (searched upward from {})", .0.display())]
    NotARepository(PathBuf),

    #[error("no trunk branch in {}: neither 'main' nor 'master' exists", .0.display())]
    NoTrunkBranch(PathBuf),

    #[error("uncommitted changes on branch '{branch}': {}", .paths.join(", "))]
    DirtyWorkingTree { branch: String, paths: Vec<String> },

    /// Non-fatal: the session is already running and nothing changed.
    #[error("already vibing on branch '{branch}'")]
    AlreadyVibing { branch: String },

    #[error("nothing to finalize on branch '{branch}': no changes since {base}")]
    NothingToFinalize { branch: String, base: String },

    #[error("rebase of '{branch}' onto '{onto}' conflicted in: {}", .paths.join(", "))]
    RebaseConflict {
        branch: String,
        onto: String,
        paths: Vec<String>,
    },

    #[error("push of branch '{branch}' to '{remote}' rejected: {reason}")]
    PushRejected {
        branch: String,
        remote: String,
        reason: String,
    },

    #[error("'{program}' must be authenticated before a pull request can be opened for '{branch}': {detail}")]
    HostingAuthRequired {
        program: String,
        branch: String,
        detail: String,
    },

    #[error("failed to launch '{program}': {source}")]
    SubprocessLaunchFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program} {args}' timed out after {timeout:?}")]
    CommandTimeout {
        program: String,
        args: String,
        timeout: Duration,
    },

    #[error("failed to watch {}: {source}", .path.display())]
    WatcherSetupFailure {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("watcher for branch '{branch}' is no longer running")]
    WatcherGone { branch: String },

    #[error("git {command} failed: {stderr}")]
    GitCommand { command: String, stderr: String },

    #[error("{program} {command} failed for branch '{branch}': {stderr}")]
    HostingCommand {
        program: String,
        command: String,
        branch: String,
        stderr: String,
    },

    #[error("invalid branch name '{0}'")]
    InvalidBranchName(String),

    #[error("invalid commit message: {0}")]
    InvalidMessage(String),

    #[error("session on branch '{branch}' is held by live process {pid}")]
    SessionOwnedElsewhere { branch: String, pid: u32 },

    #[error("session on branch '{branch}' is stale ({reason}); resume or discard it explicitly")]
    StaleSession { branch: String, reason: String },

    #[error("no orphaned session to {0}")]
    NoOrphanSession(&'static str),

    #[error("session persistence: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("finalize failed at step '{step}' on branch '{branch}': {source}")]
    Finalize {
        step: FinalizeStep,
        branch: String,
        #[source]
        source: Box<VibeError>,
    },
}

impl VibeError {
    /// `false` only for outcomes that leave the session exactly as it was
    /// and need no remediation.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, VibeError::AlreadyVibing { .. })
    }

    /// The pipeline step that failed, for errors raised by `stop`.
    pub fn finalize_step(&self) -> Option<FinalizeStep> {
        match self {
            VibeError::Finalize { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// The underlying cause with any finalize wrapper removed.
    pub fn root_cause(&self) -> &VibeError {
        match self {
            VibeError::Finalize { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, VibeError>;
