use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Result, VibeError};
use crate::watcher::WatcherHandle;

/// Upper bound on the first line of a finalize message.
pub const MAX_TITLE_CHARS: usize = 256;

// ---------------------------------------------------------------------------
// SessionPhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Vibing,
    Dirty,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionPhase::Idle => "Idle",
            SessionPhase::Vibing => "Vibing",
            SessionPhase::Dirty => "Dirty",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// BranchName
// ---------------------------------------------------------------------------

/// A branch name restricted to characters that are safe on every platform
/// and never need quoting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let charset_ok = raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
        let shape_ok = !raw.is_empty()
            && !raw.starts_with(['-', '/', '.'])
            && !raw.ends_with(['/', '.'])
            && !raw.ends_with(".lock")
            && !raw.contains("..")
            && !raw.contains("//")
            && !raw.contains("/.");
        if charset_ok && shape_ok {
            Ok(Self(raw))
        } else {
            Err(VibeError::InvalidBranchName(raw))
        }
    }

    /// `<prefix><UTC %Y%m%d-%H%M%S>`.
    pub fn generate(prefix: &str, now: DateTime<Utc>) -> Result<Self> {
        Self::parse(format!("{prefix}{}", now.format("%Y%m%d-%H%M%S")))
    }

    /// Disambiguates a generated name that is already taken.
    pub fn with_suffix(&self, n: u32) -> Self {
        Self(format!("{}-{n}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BranchName {
    type Error = VibeError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<BranchName> for String {
    fn from(value: BranchName) -> Self {
        value.0
    }
}

// ---------------------------------------------------------------------------
// CommitMessage
// ---------------------------------------------------------------------------

/// A user-supplied finalize message: first line is the title, the whole
/// text is the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMessage(String);

impl CommitMessage {
    pub fn parse(raw: &str) -> Result<Self> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(VibeError::InvalidMessage("message must not be empty".into()));
        }
        let title_len = text.lines().next().unwrap_or_default().chars().count();
        if title_len > MAX_TITLE_CHARS {
            return Err(VibeError::InvalidMessage(format!(
                "title is {title_len} characters, limit is {MAX_TITLE_CHARS}"
            )));
        }
        Ok(Self(text.to_string()))
    }

    pub fn title(&self) -> &str {
        self.0.lines().next().unwrap_or_default().trim()
    }

    pub fn body(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The one live session of a repository.
///
/// Only `Vibing` owns a watcher, and `Idle` has no branch, so neither
/// invariant can be broken by a stray flag.
#[derive(Debug, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Vibing(VibingSession),
    Dirty(DirtySession),
}

#[derive(Debug)]
pub struct VibingSession {
    pub session_id: Uuid,
    pub branch: BranchName,
    pub trunk: String,
    /// Trunk commit the branch was cut from, when known.
    pub base_commit: Option<String>,
    pub started_at: DateTime<Utc>,
    pub watcher: WatcherHandle,
}

/// Uncommitted changes were found at `start` and no resolution was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtySession {
    /// The branch the changes live on, or `HEAD` when detached.
    pub branch: String,
    pub paths: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Vibing(_) => SessionPhase::Vibing,
            SessionState::Dirty(_) => SessionPhase::Dirty,
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match self {
            SessionState::Idle => None,
            SessionState::Vibing(v) => Some(v.branch.as_str()),
            SessionState::Dirty(d) => Some(d.branch.as_str()),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanDisposition {
    /// Will be re-attached by the next `start` or `stop`.
    Resumable,
    /// Needs an explicit resume or discard.
    Stale,
    /// Another live process holds it.
    OwnedElsewhere,
}

/// A persisted session left behind by an earlier process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanNotice {
    pub branch: String,
    pub state: SessionPhase,
    pub started_at: DateTime<Utc>,
    pub pid: u32,
    pub disposition: OrphanDisposition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Snapshot returned by `start` and `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: SessionPhase,
    pub branch: Option<String>,
    pub trunk: Option<String>,
    pub base_commit: Option<String>,
    pub pending_paths: Vec<String>,
    pub auto_commits: u64,
    pub last_commit_at: Option<DateTime<Utc>>,
    pub last_commit_error: Option<String>,
    pub dirty_paths: Vec<String>,
    pub orphan: Option<OrphanNotice>,
    pub note: Option<String>,
}

impl StatusReport {
    pub fn idle() -> Self {
        Self {
            state: SessionPhase::Idle,
            branch: None,
            trunk: None,
            base_commit: None,
            pending_paths: Vec::new(),
            auto_commits: 0,
            last_commit_at: None,
            last_commit_error: None,
            dirty_paths: Vec::new(),
            orphan: None,
            note: None,
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.branch {
            Some(branch) => write!(f, "{} on '{}'", self.state, branch)?,
            None => write!(f, "{}", self.state)?,
        }
        if self.state == SessionPhase::Vibing {
            write!(
                f,
                ", {} auto-commit(s), {} pending path(s)",
                self.auto_commits,
                self.pending_paths.len()
            )?;
        }
        if !self.dirty_paths.is_empty() {
            write!(f, ", uncommitted: {}", self.dirty_paths.join(", "))?;
        }
        if let Some(err) = &self.last_commit_error {
            write!(f, ", last commit failed: {err}")?;
        }
        if let Some(orphan) = &self.orphan {
            write!(
                f,
                ", orphaned session on '{}' ({:?})",
                orphan.branch, orphan.disposition
            )?;
        }
        if let Some(note) = &self.note {
            write!(f, " ({note})")?;
        }
        Ok(())
    }
}
