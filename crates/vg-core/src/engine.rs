//! The session engine: one per repository root.
//!
//! All state-changing operations hold one async lock for their whole
//! duration, so `start`, `stop` and the resolution calls never interleave.
//! `status` reads a snapshot published over a watch channel and never waits
//! on that lock.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::commit::{CommitDriver, CommitOutcome, CommitStats};
use crate::config::{Config, DirtyPolicy};
use crate::error::{Result, VibeError};
use crate::finalize::{FinalizePipeline, FinalizeReport, FinalizeRequest};
use crate::gateway::{CommandRunner, GitGateway, ProcessRunner};
use crate::persistence::{classify, Orphan, OrphanStatus, PersistedSession, SessionStore};
use crate::probe::{self, RepoRoot};
use crate::session::{
    BranchName, CommitMessage, DirtySession, OrphanNotice, SessionPhase, SessionState,
    StatusReport, VibingSession,
};
use crate::watcher;

pub const STASH_MESSAGE: &str = "vibe-git: pre-session stash";
pub const CHECKPOINT_MESSAGE: &str = "WIP: pre-vibe checkpoint";

/// Highest numeric suffix tried when a generated branch name is taken.
const MAX_BRANCH_SUFFIX: u32 = 100;

// ---------------------------------------------------------------------------
// StopReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopReport {
    /// The session was not vibing; no git command ran.
    NothingToStop {
        state: SessionPhase,
        orphan: Option<OrphanNotice>,
    },
    Finalized(FinalizeReport),
}

impl std::fmt::Display for StopReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReport::NothingToStop { state, .. } => {
                write!(f, "nothing to stop (session is {state})")
            }
            StopReport::Finalized(report) => write!(f, "{report}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    state: SessionState,
    orphan: Option<Orphan>,
    note: Option<String>,
}

/// What `status` needs, minus the live commit counters.
#[derive(Clone, Default)]
struct Snapshot {
    state: Option<SessionPhase>,
    branch: Option<String>,
    trunk: Option<String>,
    base_commit: Option<String>,
    dirty_paths: Vec<String>,
    orphan: Option<OrphanNotice>,
    note: Option<String>,
    stats: Option<Arc<CommitStats>>,
}

impl Snapshot {
    fn of(inner: &Inner) -> Self {
        let mut snap = Snapshot {
            state: Some(inner.state.phase()),
            branch: inner.state.branch().map(str::to_string),
            orphan: inner.orphan.as_ref().map(Orphan::notice),
            note: inner.note.clone(),
            ..Default::default()
        };
        match &inner.state {
            SessionState::Vibing(v) => {
                snap.trunk = Some(v.trunk.clone());
                snap.base_commit = v.base_commit.clone();
                snap.stats = Some(v.watcher.stats());
            }
            SessionState::Dirty(d) => snap.dirty_paths = d.paths.clone(),
            SessionState::Idle => {}
        }
        snap
    }

    fn report(&self) -> StatusReport {
        let mut report = StatusReport::idle();
        report.state = self.state.unwrap_or(SessionPhase::Idle);
        report.branch = self.branch.clone();
        report.trunk = self.trunk.clone();
        report.base_commit = self.base_commit.clone();
        report.dirty_paths = self.dirty_paths.clone();
        report.orphan = self.orphan.clone();
        report.note = self.note.clone();
        if let Some(stats) = &self.stats {
            report.pending_paths = stats.pending_paths();
            report.auto_commits = stats.auto_commits();
            report.last_commit_at = stats.last_commit_at();
            report.last_commit_error = stats.last_error();
        }
        report
    }
}

/// Everything needed to put a session into `Vibing`.
struct Launch {
    session_id: Uuid,
    branch: BranchName,
    trunk: String,
    base_commit: Option<String>,
    started_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// VibeEngine
// ---------------------------------------------------------------------------

pub struct VibeEngine {
    root: RepoRoot,
    config: Config,
    git: GitGateway,
    store: SessionStore,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<Snapshot>,
}

impl VibeEngine {
    /// Locate the repository containing `start`, load its config, and
    /// reconcile any session left behind by an earlier process.
    pub async fn open(start: &Path) -> Result<Self> {
        let root = probe::locate(start)?;
        let config = Config::load_for_repo(root.workdir())?;
        Self::with_runner(root, config, Arc::new(ProcessRunner)).await
    }

    pub async fn with_runner(
        root: RepoRoot,
        config: Config,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        config.validate()?;
        let git = GitGateway::new(runner, root.workdir(), &config);
        let store = SessionStore::for_repo(&root);
        let orphan = reconcile(&git, &store, &config).await?;

        let inner = Inner {
            orphan,
            ..Default::default()
        };
        let (status_tx, _) = watch::channel(Snapshot::of(&inner));
        Ok(Self {
            root,
            config,
            git,
            store,
            inner: Mutex::new(inner),
            status_tx,
        })
    }

    pub fn root(&self) -> &RepoRoot {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current status. Never mutates and never waits on a running operation.
    pub fn status(&self) -> StatusReport {
        self.status_tx.borrow().report()
    }

    // -- start ---------------------------------------------------------------

    /// `Idle → Vibing` on a clean tree. Idempotent while vibing.
    pub async fn start(&self) -> Result<StatusReport> {
        let mut inner = self.inner.lock().await;
        if let SessionState::Vibing(v) = &mut inner.state {
            debug!(branch = %v.branch, "start while vibing is a no-op");
            self.ensure_watcher(v)?;
            return Ok(self.publish(&inner));
        }

        if let Some(orphan) = &inner.orphan {
            if let Some(err) = orphan_blocker(orphan) {
                return Err(err);
            }
            self.attach_orphan(&mut inner).await?;
            return Ok(self.publish(&inner));
        }

        let paths = self.git.dirty_paths().await?;
        if paths.is_empty() {
            self.start_fresh(&mut inner).await?;
            return Ok(self.publish(&inner));
        }

        match self.config.session.dirty_policy {
            DirtyPolicy::Ask => {
                let branch = self
                    .git
                    .current_branch()
                    .await?
                    .unwrap_or_else(|| "HEAD".to_string());
                info!(%branch, paths = paths.len(), "uncommitted changes, session is dirty");
                inner.state = SessionState::Dirty(DirtySession {
                    branch: branch.clone(),
                    paths: paths.clone(),
                    detected_at: Utc::now(),
                });
                self.persist(&inner);
                self.publish(&inner);
                Err(VibeError::DirtyWorkingTree { branch, paths })
            }
            DirtyPolicy::Stash => self.resolve(&mut inner, Resolution::Stash).await,
            DirtyPolicy::Checkpoint => self.resolve(&mut inner, Resolution::Checkpoint).await,
            DirtyPolicy::Adopt => self.resolve(&mut inner, Resolution::Adopt).await,
        }
    }

    /// Stash everything (untracked files included), then start from trunk.
    pub async fn stash_and_start(&self) -> Result<StatusReport> {
        let mut inner = self.inner.lock().await;
        self.guard_resolution(&mut inner)?;
        self.resolve(&mut inner, Resolution::Stash).await
    }

    /// Commit everything as a checkpoint, then start from trunk.
    pub async fn commit_checkpoint_and_start(&self) -> Result<StatusReport> {
        let mut inner = self.inner.lock().await;
        self.guard_resolution(&mut inner)?;
        self.resolve(&mut inner, Resolution::Checkpoint).await
    }

    /// Vibe in place; uncommitted work becomes the first auto-commit.
    pub async fn adopt_current_and_start(&self) -> Result<StatusReport> {
        let mut inner = self.inner.lock().await;
        self.guard_resolution(&mut inner)?;
        self.resolve(&mut inner, Resolution::Adopt).await
    }

    fn guard_resolution(&self, inner: &mut Inner) -> Result<()> {
        if let SessionState::Vibing(v) = &inner.state {
            return Err(VibeError::AlreadyVibing {
                branch: v.branch.to_string(),
            });
        }
        if let Some(orphan) = &inner.orphan {
            if let Some(err) = orphan_blocker(orphan) {
                return Err(err);
            }
            warn!(
                branch = %orphan.record.branch_name,
                "starting a new session supersedes the resumable one"
            );
            inner.orphan = None;
        }
        Ok(())
    }

    async fn resolve(&self, inner: &mut Inner, how: Resolution) -> Result<StatusReport> {
        let dirty = !self.git.dirty_paths().await?.is_empty();
        let mut note = None;
        match how {
            Resolution::Stash if dirty => {
                self.git
                    .git_checked(&["stash", "push", "--include-untracked", "-m", STASH_MESSAGE])
                    .await?;
                info!("uncommitted changes stashed");
                note = Some(format!(
                    "uncommitted changes stashed as '{STASH_MESSAGE}'; restore with 'git stash pop'"
                ));
            }
            Resolution::Checkpoint if dirty => {
                let branch = self.commit_checkpoint().await?;
                note = Some(format!("uncommitted changes checkpointed on '{branch}'"));
            }
            Resolution::Adopt => {
                self.adopt(inner, dirty).await?;
                return Ok(self.publish(inner));
            }
            _ => {}
        }
        self.start_fresh(inner).await?;
        inner.note = note;
        Ok(self.publish(inner))
    }

    /// Commits on the current branch unless that is the trunk or a detached
    /// HEAD, in which case the checkpoint goes to a side branch.
    async fn commit_checkpoint(&self) -> Result<String> {
        let trunk = probe::resolve_trunk(&self.git).await?;
        let branch = match self.git.current_branch().await? {
            Some(current) if current != trunk => current,
            _ => {
                let prefix = format!("{}checkpoint-", self.config.session.branch_prefix);
                let side = self.allocate_branch(&prefix).await?;
                self.git
                    .git_checked(&["checkout", "-b", side.as_str()])
                    .await?;
                side.to_string()
            }
        };
        self.git.git_checked(&["add", "-A"]).await?;
        self.git
            .git_checked(&["commit", "-m", CHECKPOINT_MESSAGE, "--no-verify"])
            .await?;
        info!(%branch, "checkpoint committed");
        Ok(branch)
    }

    async fn adopt(&self, inner: &mut Inner, dirty: bool) -> Result<()> {
        let trunk = probe::resolve_trunk(&self.git).await?;
        let prefix = &self.config.session.branch_prefix;
        let current = self.git.current_branch().await?;
        let reusable = current
            .as_deref()
            .filter(|b| b.starts_with(prefix.as_str()) && *b != trunk)
            .and_then(|b| BranchName::parse(b).ok());

        let (branch, base_commit, created) = match reusable {
            Some(branch) => {
                info!(%branch, "adopting existing session branch");
                (branch, None, false)
            }
            None => {
                let base = self.git.head_commit().await?;
                let branch = self.allocate_branch(prefix).await?;
                self.git
                    .git_checked(&["checkout", "-b", branch.as_str()])
                    .await?;
                info!(%branch, "adopting working tree on a new branch");
                (branch, Some(base), true)
            }
        };

        let launched = self.begin_vibing(
            inner,
            Launch {
                session_id: Uuid::new_v4(),
                branch: branch.clone(),
                trunk,
                base_commit,
                started_at: Utc::now(),
            },
        );
        if let Err(e) = launched {
            if created {
                self.abandon_branch(&branch, current.as_deref()).await;
            }
            return Err(e);
        }
        if dirty {
            self.flush_adopted(inner).await;
            inner.note = Some("uncommitted changes adopted as the first auto-commit".into());
        }
        Ok(())
    }

    async fn flush_adopted(&self, inner: &Inner) {
        if let SessionState::Vibing(v) = &inner.state {
            match v.watcher.flush_now().await {
                Ok(CommitOutcome::Failed { reason }) => {
                    warn!(branch = %v.branch, %reason, "could not commit adopted changes")
                }
                Ok(_) => {}
                Err(e) => warn!(branch = %v.branch, error = %e, "could not commit adopted changes"),
            }
        }
    }

    /// Cut a new session branch from the trunk and start watching.
    async fn start_fresh(&self, inner: &mut Inner) -> Result<()> {
        let trunk = probe::resolve_trunk(&self.git).await?;
        let previous = self.git.current_branch().await?;
        let start_point = self.start_point(&trunk).await?;
        let branch = self.allocate_branch(&self.config.session.branch_prefix).await?;
        self.git
            .git_checked(&["checkout", "--no-track", "-b", branch.as_str(), &start_point])
            .await?;
        let base = self.git.head_commit().await?;
        debug!(%branch, %start_point, %base, "session branch cut");

        let launched = self.begin_vibing(
            inner,
            Launch {
                session_id: Uuid::new_v4(),
                branch: branch.clone(),
                trunk,
                base_commit: Some(base),
                started_at: Utc::now(),
            },
        );
        if let Err(e) = launched {
            self.abandon_branch(&branch, previous.as_deref()).await;
            return Err(e);
        }
        Ok(())
    }

    /// The commit a new session branch starts from: the remote trunk after
    /// a fetch, or the local trunk when there is no remote or the fetch
    /// fails.
    async fn start_point(&self, trunk: &str) -> Result<String> {
        let remote = self.config.finalize.remote.as_str();
        if !self.config.session.fetch_on_start || !self.git.remote_exists(remote).await? {
            return Ok(trunk.to_string());
        }
        match self.git.git(&["fetch", remote, trunk]).await {
            Ok(out) if out.success() => {}
            Ok(out) => {
                warn!(%remote, %trunk, detail = %out.diagnostic(), "fetch failed, starting from local trunk");
                return Ok(trunk.to_string());
            }
            Err(e) => {
                warn!(%remote, %trunk, error = %e, "fetch failed, starting from local trunk");
                return Ok(trunk.to_string());
            }
        }
        let tracking = format!("{remote}/{trunk}");
        let reference = format!("refs/remotes/{tracking}");
        let known = self
            .git
            .git(&["rev-parse", "--verify", "--quiet", &reference])
            .await?
            .success();
        Ok(if known { tracking } else { trunk.to_string() })
    }

    /// Leave a freshly cut branch whose session never started, then delete it.
    async fn abandon_branch(&self, branch: &BranchName, previous: Option<&str>) {
        let back = match previous {
            Some(prev) => self.git.git_checked(&["checkout", prev]).await,
            None => self.git.git_checked(&["checkout", "--detach"]).await,
        };
        if let Err(e) = back {
            warn!(%branch, previous = ?previous, error = %e, "could not leave abandoned branch");
            return;
        }
        if let Err(e) = self.git.git_checked(&["branch", "-D", branch.as_str()]).await {
            warn!(%branch, error = %e, "could not delete abandoned branch");
        }
    }

    /// `<prefix><timestamp>`, suffixed until no local branch has the name.
    async fn allocate_branch(&self, prefix: &str) -> Result<BranchName> {
        let base = BranchName::generate(prefix, Utc::now())?;
        if !self.git.branch_exists(base.as_str()).await? {
            return Ok(base);
        }
        for n in 2..=MAX_BRANCH_SUFFIX {
            let candidate = base.with_suffix(n);
            if !self.git.branch_exists(candidate.as_str()).await? {
                return Ok(candidate);
            }
        }
        Err(VibeError::InvalidBranchName(format!(
            "{base}: suffixes up to {MAX_BRANCH_SUFFIX} are taken"
        )))
    }

    fn begin_vibing(&self, inner: &mut Inner, launch: Launch) -> Result<()> {
        let driver = CommitDriver::new(self.git.clone(), &self.config.commit);
        let handle = watcher::spawn(
            &self.root,
            launch.branch.as_str(),
            &self.config.watcher,
            driver,
        )?;
        info!(branch = %launch.branch, trunk = %launch.trunk, "session vibing");
        inner.state = SessionState::Vibing(VibingSession {
            session_id: launch.session_id,
            branch: launch.branch,
            trunk: launch.trunk,
            base_commit: launch.base_commit,
            started_at: launch.started_at,
            watcher: handle,
        });
        inner.orphan = None;
        inner.note = None;
        self.persist(inner);
        Ok(())
    }

    /// Respawn the watcher if its task has died.
    fn ensure_watcher(&self, v: &mut VibingSession) -> Result<()> {
        if v.watcher.is_alive() {
            return Ok(());
        }
        warn!(branch = %v.branch, "watcher task died, restarting it");
        let driver = CommitDriver::new(self.git.clone(), &self.config.commit);
        v.watcher = watcher::spawn(&self.root, v.branch.as_str(), &self.config.watcher, driver)?;
        Ok(())
    }

    // -- orphans -------------------------------------------------------------

    /// Re-attach a stale orphan whose branch still exists.
    pub async fn resume_orphan(&self) -> Result<StatusReport> {
        let mut inner = self.inner.lock().await;
        if let SessionState::Vibing(v) = &inner.state {
            return Err(VibeError::AlreadyVibing {
                branch: v.branch.to_string(),
            });
        }
        let Some(orphan) = &inner.orphan else {
            return Err(VibeError::NoOrphanSession("resume"));
        };
        if orphan.status == OrphanStatus::OwnedElsewhere {
            return Err(VibeError::SessionOwnedElsewhere {
                branch: orphan.record.branch_name.clone(),
                pid: orphan.record.pid,
            });
        }
        let branch = orphan.record.branch_name.clone();
        if !self.git.branch_exists(&branch).await? {
            return Err(VibeError::StaleSession {
                branch: branch.clone(),
                reason: format!("branch '{branch}' no longer exists"),
            });
        }
        self.attach_orphan(&mut inner).await?;
        Ok(self.publish(&inner))
    }

    /// Forget an orphaned record. Git is not touched.
    pub async fn discard_orphan(&self) -> Result<StatusReport> {
        let mut inner = self.inner.lock().await;
        let Some(orphan) = inner.orphan.take() else {
            return Err(VibeError::NoOrphanSession("discard"));
        };
        if orphan.status == OrphanStatus::OwnedElsewhere {
            warn!(
                branch = %orphan.record.branch_name,
                pid = orphan.record.pid,
                "discarding a session record held by a live process"
            );
        }
        if let Err(e) = self.store.discard(Some(&orphan.record.branch_name)) {
            warn!(error = %e, "could not remove session record");
        }
        info!(branch = %orphan.record.branch_name, "orphaned session discarded");
        Ok(self.publish(&inner))
    }

    async fn attach_orphan(&self, inner: &mut Inner) -> Result<()> {
        let Some(orphan) = inner.orphan.clone() else {
            return Err(VibeError::NoOrphanSession("resume"));
        };
        let record = orphan.record;
        let branch = BranchName::parse(record.branch_name.clone())?;

        let current = self.git.current_branch().await?;
        let dirty = self.git.dirty_paths().await?;
        if current.as_deref() != Some(branch.as_str()) {
            if !dirty.is_empty() {
                return Err(VibeError::DirtyWorkingTree {
                    branch: current.unwrap_or_else(|| "HEAD".to_string()),
                    paths: dirty,
                });
            }
            self.git
                .git_checked(&["checkout", branch.as_str()])
                .await?;
        }
        let trunk = match record.trunk {
            Some(t) => t,
            None => probe::resolve_trunk(&self.git).await?,
        };

        info!(%branch, previous_pid = record.pid, "resuming orphaned session");
        self.begin_vibing(
            inner,
            Launch {
                session_id: record.session_id,
                branch,
                trunk,
                base_commit: record.base_commit,
                started_at: record.started_at,
            },
        )?;
        // Work left uncommitted by the crashed process belongs to the session.
        if !dirty.is_empty() {
            self.flush_adopted(inner).await;
        }
        inner.note = Some(format!("resumed session from process {}", record.pid));
        Ok(())
    }

    // -- stop ----------------------------------------------------------------

    /// Finalize a vibing session. Anything else is a no-op report.
    pub async fn stop(&self, message: &str) -> Result<StopReport> {
        let mut inner = self.inner.lock().await;

        if !matches!(inner.state, SessionState::Vibing(_)) {
            let resumable = matches!(
                inner.orphan.as_ref().map(|o| &o.status),
                Some(OrphanStatus::Resumable)
            );
            if !resumable {
                let state = inner.state.phase();
                if let SessionState::Dirty(d) = &inner.state {
                    debug!(branch = %d.branch, "stop on dirty session returns to idle");
                    if let Err(e) = self.store.end(Some(&d.branch)) {
                        warn!(error = %e, "could not remove session record");
                    }
                    inner.state = SessionState::Idle;
                }
                let orphan = inner.orphan.as_ref().map(Orphan::notice);
                self.publish(&inner);
                return Ok(StopReport::NothingToStop { state, orphan });
            }
            self.attach_orphan(&mut inner).await?;
            self.publish(&inner);
        }

        let message = CommitMessage::parse(message)?;
        let request = {
            let SessionState::Vibing(v) = &mut inner.state else {
                return Err(VibeError::NoOrphanSession("stop"));
            };
            self.ensure_watcher(v)?;
            // Any in-flight commit finishes first; the range below is final.
            if let CommitOutcome::Failed { reason } = v.watcher.pause().await? {
                warn!(branch = %v.branch, %reason, "last auto-commit before finalize failed");
            }
            FinalizeRequest {
                branch: v.branch.to_string(),
                trunk: v.trunk.clone(),
                base_commit: v.base_commit.clone(),
                message,
            }
        };

        info!(branch = %request.branch, "finalizing session");
        match FinalizePipeline::new(&self.git, &self.config).run(&request).await {
            Ok(report) => {
                if let SessionState::Vibing(v) = std::mem::take(&mut inner.state) {
                    v.watcher.shutdown(false).await;
                }
                if let Err(e) = self.store.end(Some(&request.branch)) {
                    warn!(error = %e, "could not remove session record");
                }
                inner.note = None;
                self.publish(&inner);
                Ok(StopReport::Finalized(report))
            }
            Err(e) => {
                warn!(branch = %request.branch, error = %e, "finalize failed, session keeps vibing");
                if let SessionState::Vibing(v) = &mut inner.state {
                    if let Err(respawn) = self.ensure_watcher(v) {
                        warn!(branch = %v.branch, error = %respawn, "could not restart watcher");
                    } else if let Err(resume) = v.watcher.resume() {
                        warn!(branch = %v.branch, error = %resume, "could not resume watcher");
                    }
                }
                inner.note = Some(format!("last stop failed: {e}"));
                self.publish(&inner);
                Err(e)
            }
        }
    }

    // -- shutdown --------------------------------------------------------------

    /// Detach the watcher without finalizing. The persisted record stays so a
    /// later process, or a later `start` here, resumes the session.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        if !matches!(inner.state, SessionState::Vibing(_)) {
            return;
        }
        let SessionState::Vibing(v) = std::mem::take(&mut inner.state) else {
            return;
        };
        let record = self.record_for_vibing(&v);
        v.watcher.shutdown(true).await;
        info!(branch = %record.branch_name, "session detached, record kept");
        inner.orphan = Some(Orphan {
            record,
            status: OrphanStatus::Resumable,
        });
        inner.note = Some("watcher detached; start or stop resumes the session".into());
        self.publish(&inner);
    }

    // -- helpers -------------------------------------------------------------

    fn publish(&self, inner: &Inner) -> StatusReport {
        let snap = Snapshot::of(inner);
        let report = snap.report();
        self.status_tx.send_replace(snap);
        report
    }

    fn record_for_vibing(&self, v: &VibingSession) -> PersistedSession {
        PersistedSession {
            session_id: v.session_id,
            state: SessionPhase::Vibing,
            branch_name: v.branch.to_string(),
            base_commit: v.base_commit.clone(),
            trunk: Some(v.trunk.clone()),
            started_at: v.started_at,
            pid: std::process::id(),
        }
    }

    /// Best effort: a failed write is logged, the session carries on.
    fn persist(&self, inner: &Inner) {
        if !self.config.persistence.enabled {
            return;
        }
        let record = match &inner.state {
            SessionState::Vibing(v) => self.record_for_vibing(v),
            SessionState::Dirty(d) => PersistedSession {
                session_id: Uuid::new_v4(),
                state: SessionPhase::Dirty,
                branch_name: d.branch.clone(),
                base_commit: None,
                trunk: None,
                started_at: d.detected_at,
                pid: std::process::id(),
            },
            SessionState::Idle => return,
        };
        if let Err(e) = self.store.save(&record) {
            warn!(branch = %record.branch_name, error = %e, "could not persist session");
        }
    }
}

/// The error that keeps a new session from starting, if any.
fn orphan_blocker(orphan: &Orphan) -> Option<VibeError> {
    let branch = orphan.record.branch_name.clone();
    match &orphan.status {
        OrphanStatus::OwnedElsewhere => Some(VibeError::SessionOwnedElsewhere {
            branch,
            pid: orphan.record.pid,
        }),
        OrphanStatus::Stale { reason } => Some(VibeError::StaleSession {
            branch,
            reason: reason.clone(),
        }),
        OrphanStatus::Resumable => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum Resolution {
    Stash,
    Checkpoint,
    Adopt,
}

/// Classify whatever record an earlier process left behind.
async fn reconcile(
    git: &GitGateway,
    store: &SessionStore,
    config: &Config,
) -> Result<Option<Orphan>> {
    if !config.persistence.enabled {
        return Ok(None);
    }
    let record = match store.load() {
        Ok(Some(record)) => record,
        Ok(None) => return Ok(None),
        Err(e) => {
            warn!(error = %e, "could not read session record");
            return Ok(None);
        }
    };
    if record.state != SessionPhase::Vibing {
        debug!(branch = %record.branch_name, state = %record.state, "dropping non-vibing record");
        if let Err(e) = store.discard(Some(&record.branch_name)) {
            warn!(error = %e, "could not remove session record");
        }
        return Ok(None);
    }

    let branch_exists = git.branch_exists(&record.branch_name).await?;
    let status = classify(
        &record,
        std::process::id(),
        Utc::now(),
        config.persistence.stale_after(),
        branch_exists,
    );
    match &status {
        OrphanStatus::Resumable => {
            info!(branch = %record.branch_name, pid = record.pid, "found resumable session")
        }
        OrphanStatus::Stale { reason } => {
            warn!(branch = %record.branch_name, %reason, "found stale session")
        }
        OrphanStatus::OwnedElsewhere => {
            warn!(branch = %record.branch_name, pid = record.pid, "session held by another process")
        }
    }
    Ok(Some(Orphan { record, status }))
}
