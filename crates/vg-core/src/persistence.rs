use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::probe::RepoRoot;
use crate::session::{OrphanDisposition, OrphanNotice, SessionPhase};

pub const SESSION_FILE: &str = "vibe-session.json";
pub const EVENTS_FILE: &str = "vibe-events.jsonl";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Durable record of a non-idle session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub session_id: Uuid,
    pub state: SessionPhase,
    pub branch_name: String,
    #[serde(default)]
    pub base_commit: Option<String>,
    #[serde(default)]
    pub trunk: Option<String>,
    pub started_at: DateTime<Utc>,
    pub pid: u32,
}

/// One line of the append-only event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionSaved {
        timestamp: DateTime<Utc>,
        state: PersistedSession,
    },
    SessionEnded {
        timestamp: DateTime<Utc>,
        branch_name: Option<String>,
    },
    SessionDiscarded {
        timestamp: DateTime<Utc>,
        branch_name: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Session record and event log kept inside the repository's git directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn for_repo(root: &RepoRoot) -> Self {
        Self::new(root.gitdir().to_path_buf())
    }

    /// Store backed by an arbitrary directory (useful for testing).
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    pub fn events_path(&self) -> PathBuf {
        self.dir.join(EVENTS_FILE)
    }

    /// Replace the record atomically and log a `session_saved` event.
    pub fn save(&self, record: &PersistedSession) -> Result<(), PersistenceError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.session_path();
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        debug!(branch = %record.branch_name, state = %record.state, "session record saved");
        self.append_event(&SessionEvent::SessionSaved {
            timestamp: Utc::now(),
            state: record.clone(),
        })
    }

    /// Load the record. A corrupt file is removed and reported as absent.
    pub fn load(&self) -> Result<Option<PersistedSession>, PersistenceError> {
        let path = self.session_path();
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&data) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "removing unreadable session record");
                remove_if_exists(&path)?;
                Ok(None)
            }
        }
    }

    /// Remove the record after a session ended normally.
    pub fn end(&self, branch: Option<&str>) -> Result<(), PersistenceError> {
        remove_if_exists(&self.session_path())?;
        self.append_event(&SessionEvent::SessionEnded {
            timestamp: Utc::now(),
            branch_name: branch.map(str::to_string),
        })
    }

    /// Remove the record of an abandoned session.
    pub fn discard(&self, branch: Option<&str>) -> Result<(), PersistenceError> {
        remove_if_exists(&self.session_path())?;
        self.append_event(&SessionEvent::SessionDiscarded {
            timestamp: Utc::now(),
            branch_name: branch.map(str::to_string),
        })
    }

    pub fn append_event(&self, event: &SessionEvent) -> Result<(), PersistenceError> {
        std::fs::create_dir_all(&self.dir)?;
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path())?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// All parseable events, oldest first. Malformed lines are skipped.
    pub fn read_events(&self) -> Result<Vec<SessionEvent>, PersistenceError> {
        let data = match std::fs::read_to_string(self.events_path()) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(data
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

fn remove_if_exists(path: &Path) -> Result<(), PersistenceError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Orphan reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrphanStatus {
    OwnedElsewhere,
    Stale { reason: String },
    Resumable,
}

/// A record left behind by an earlier process, with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    pub record: PersistedSession,
    pub status: OrphanStatus,
}

impl Orphan {
    pub fn notice(&self) -> OrphanNotice {
        let (disposition, reason) = match &self.status {
            OrphanStatus::OwnedElsewhere => (
                OrphanDisposition::OwnedElsewhere,
                Some(format!("process {} is still running", self.record.pid)),
            ),
            OrphanStatus::Stale { reason } => (OrphanDisposition::Stale, Some(reason.clone())),
            OrphanStatus::Resumable => (OrphanDisposition::Resumable, None),
        };
        OrphanNotice {
            branch: self.record.branch_name.clone(),
            state: self.record.state,
            started_at: self.record.started_at,
            pid: self.record.pid,
            disposition,
            reason,
        }
    }
}

/// Decide what to do with a persisted `Vibing` record.
///
/// A live owner wins over age, and age wins over a missing branch.
pub fn classify(
    record: &PersistedSession,
    own_pid: u32,
    now: DateTime<Utc>,
    stale_after: Duration,
    branch_exists: bool,
) -> OrphanStatus {
    if record.pid != own_pid && pid_alive(record.pid) {
        return OrphanStatus::OwnedElsewhere;
    }
    let age = now - record.started_at;
    if age > stale_after {
        return OrphanStatus::Stale {
            reason: format!(
                "started {} hour(s) ago, limit is {}",
                age.num_hours(),
                stale_after.num_hours()
            ),
        };
    }
    if !branch_exists {
        return OrphanStatus::Stale {
            reason: format!("branch '{}' no longer exists", record.branch_name),
        };
    }
    OrphanStatus::Resumable
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: kill with signal 0 checks existence without sending a signal.
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    // Assume alive so a foreign record is never taken over by accident.
    true
}
