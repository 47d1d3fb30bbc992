//! Recursive change watcher with debounced auto-commits.
//!
//! `notify` delivers raw events on its own thread into a flume channel. A
//! single tokio task owns the pending path set and the [`CommitDriver`], so
//! events are serialized and at most one commit runs at a time. The engine
//! talks to that task through [`WatcherControl`] messages.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{event::ModifyKind, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::commit::{CommitDriver, CommitOutcome, CommitStats};
use crate::config::WatcherConfig;
use crate::error::{Result, VibeError};
use crate::probe::RepoRoot;

type RawEvent = notify::Result<notify::Event>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

/// Maps a `notify::EventKind` to our `FileChangeKind`, returning `None` for
/// event kinds we do not care about (e.g. access events).
pub fn map_event_kind(kind: &EventKind) -> Option<FileChangeKind> {
    match kind {
        EventKind::Create(_) => Some(FileChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(_)) => Some(FileChangeKind::Renamed),
        EventKind::Modify(_) => Some(FileChangeKind::Modified),
        EventKind::Remove(_) => Some(FileChangeKind::Deleted),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// PathFilter
// ---------------------------------------------------------------------------

/// Decides which changed paths count toward a commit.
pub struct PathFilter {
    root: PathBuf,
    gitdir: PathBuf,
    ignore_dirs: Vec<String>,
    respect_gitignore: bool,
    gitignore: Option<Gitignore>,
}

impl PathFilter {
    pub fn new(root: &RepoRoot, config: &WatcherConfig) -> Self {
        let mut filter = Self {
            root: root.workdir().to_path_buf(),
            gitdir: root.gitdir().to_path_buf(),
            ignore_dirs: config.ignore_dirs.clone(),
            respect_gitignore: config.respect_gitignore,
            gitignore: None,
        };
        filter.reload();
        filter
    }

    /// Re-read `.gitignore` and `info/exclude`.
    pub fn reload(&mut self) {
        if !self.respect_gitignore {
            return;
        }
        let mut builder = GitignoreBuilder::new(&self.root);
        for file in [
            self.root.join(".gitignore"),
            self.gitdir.join("info").join("exclude"),
        ] {
            if file.is_file() {
                if let Some(err) = builder.add(&file) {
                    warn!(file = %file.display(), error = %err, "ignoring malformed ignore rules");
                }
            }
        }
        self.gitignore = match builder.build() {
            Ok(gi) => Some(gi),
            Err(e) => {
                warn!(error = %e, "could not build ignore matcher");
                None
            }
        };
    }

    /// The root-relative, `/`-separated path, or `None` when it is ignored.
    pub fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let mut parts = Vec::new();
        for component in rel.components() {
            let Component::Normal(part) = component else {
                return None;
            };
            let part = part.to_string_lossy();
            if part == ".git" || self.ignore_dirs.iter().any(|d| *d == part) {
                return None;
            }
            parts.push(part.into_owned());
        }
        if parts.is_empty() {
            return None;
        }
        if let Some(gi) = &self.gitignore {
            if gi
                .matched_path_or_any_parents(rel, path.is_dir())
                .is_ignore()
            {
                return None;
            }
        }
        Some(parts.join("/"))
    }
}

// ---------------------------------------------------------------------------
// Control messages
// ---------------------------------------------------------------------------

pub enum WatcherControl {
    /// Flush immediately, regardless of the debounce timer.
    FlushNow(oneshot::Sender<CommitOutcome>),
    /// Flush, then keep recording paths without committing.
    Pause(oneshot::Sender<CommitOutcome>),
    Resume,
    Shutdown {
        flush: bool,
        ack: oneshot::Sender<()>,
    },
}

// ---------------------------------------------------------------------------
// Consumer task
// ---------------------------------------------------------------------------

struct Consumer {
    filter: PathFilter,
    driver: CommitDriver,
    stats: Arc<CommitStats>,
    debounce: Duration,
    min_interval: Duration,
    pending: BTreeSet<String>,
    deadline: Option<Instant>,
    paused: bool,
    events: flume::Receiver<RawEvent>,
    events_open: bool,
    control: flume::Receiver<WatcherControl>,
}

impl Consumer {
    async fn run(mut self) {
        loop {
            let timer = if self.paused { None } else { self.deadline };
            tokio::select! {
                biased;
                msg = self.control.recv_async() => {
                    let Ok(msg) = msg else { break };
                    if self.handle_control(msg).await {
                        break;
                    }
                }
                ev = self.events.recv_async(), if self.events_open => match ev {
                    Ok(ev) => self.record(ev),
                    Err(_) => {
                        debug!("change source closed");
                        self.events_open = false;
                    }
                },
                _ = wait_until(timer) => {
                    self.deadline = None;
                    self.on_deadline().await;
                }
            }
        }
        debug!("watcher consumer stopped");
    }

    /// Returns `true` when the loop should exit.
    async fn handle_control(&mut self, msg: WatcherControl) -> bool {
        match msg {
            WatcherControl::FlushNow(ack) => {
                self.drain_events();
                let outcome = self.flush().await;
                let _ = ack.send(outcome);
                false
            }
            WatcherControl::Pause(ack) => {
                self.drain_events();
                let outcome = self.flush().await;
                self.paused = true;
                debug!("watcher paused");
                let _ = ack.send(outcome);
                false
            }
            WatcherControl::Resume => {
                self.paused = false;
                if !self.pending.is_empty() {
                    self.deadline = Some(Instant::now() + self.debounce);
                }
                debug!(pending = self.pending.len(), "watcher resumed");
                false
            }
            WatcherControl::Shutdown { flush, ack } => {
                if flush {
                    self.drain_events();
                    if !self.pending.is_empty() {
                        self.flush().await;
                    }
                }
                let _ = ack.send(());
                true
            }
        }
    }

    fn drain_events(&mut self) {
        while let Ok(ev) = self.events.try_recv() {
            self.record(ev);
        }
    }

    /// Every qualifying path lands in `pending` before the timer moves.
    fn record(&mut self, ev: RawEvent) {
        let event = match ev {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "file watcher error");
                return;
            }
        };
        let Some(kind) = map_event_kind(&event.kind) else {
            return;
        };
        let mut qualified = false;
        for path in &event.paths {
            if path.file_name().is_some_and(|n| n == ".gitignore") {
                self.filter.reload();
            }
            if let Some(rel) = self.filter.relative(path) {
                debug!(path = %rel, ?kind, "change recorded");
                self.pending.insert(rel);
                qualified = true;
            }
        }
        if qualified {
            self.deadline = Some(Instant::now() + self.debounce);
            self.stats.mirror_pending(&self.pending);
        }
    }

    async fn on_deadline(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if let Some(next) = self.driver.next_allowed_at(self.min_interval) {
            if next > Instant::now() {
                self.deadline = Some(next);
                return;
            }
        }
        self.flush().await;
    }

    async fn flush(&mut self) -> CommitOutcome {
        self.driver.flush(&mut self.pending).await
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// WatcherHandle
// ---------------------------------------------------------------------------

/// Owned handle to a running watcher. Dropping it stops the watcher.
pub struct WatcherHandle {
    branch: String,
    control: flume::Sender<WatcherControl>,
    task: JoinHandle<()>,
    stats: Arc<CommitStats>,
    watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("branch", &self.branch)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl WatcherHandle {
    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn stats(&self) -> Arc<CommitStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn flush_now(&self) -> Result<CommitOutcome> {
        let (tx, rx) = oneshot::channel();
        self.send(WatcherControl::FlushNow(tx))?;
        rx.await.map_err(|_| self.gone())
    }

    /// Waits for the in-flight commit, flushes, then holds further commits.
    pub async fn pause(&self) -> Result<CommitOutcome> {
        let (tx, rx) = oneshot::channel();
        self.send(WatcherControl::Pause(tx))?;
        rx.await.map_err(|_| self.gone())
    }

    pub fn resume(&self) -> Result<()> {
        self.send(WatcherControl::Resume)
    }

    /// Stop watching and wait for the consumer task to exit.
    pub async fn shutdown(mut self, flush: bool) {
        // No new raw events once the OS watcher is gone.
        self.watcher.take();
        let (tx, rx) = oneshot::channel();
        if self.control.send(WatcherControl::Shutdown { flush, ack: tx }).is_ok() {
            let _ = rx.await;
        }
        if let Err(e) = (&mut self.task).await {
            warn!(branch = %self.branch, error = %e, "watcher task ended abnormally");
        }
        info!(branch = %self.branch, "watcher stopped");
    }

    fn send(&self, msg: WatcherControl) -> Result<()> {
        self.control.send(msg).map_err(|_| self.gone())
    }

    fn gone(&self) -> VibeError {
        VibeError::WatcherGone {
            branch: self.branch.clone(),
        }
    }
}

/// Watch `root` recursively and auto-commit through `driver`.
pub fn spawn(
    root: &RepoRoot,
    branch: &str,
    config: &WatcherConfig,
    driver: CommitDriver,
) -> Result<WatcherHandle> {
    let (tx, rx) = flume::unbounded::<RawEvent>();
    let setup_err = |source| VibeError::WatcherSetupFailure {
        path: root.workdir().to_path_buf(),
        source,
    };
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })
    .map_err(setup_err)?;
    watcher
        .watch(root.workdir(), RecursiveMode::Recursive)
        .map_err(setup_err)?;

    let filter = PathFilter::new(root, config);
    let mut handle = spawn_consumer(branch, filter, config, driver, rx);
    handle.watcher = Some(watcher);
    info!(branch, root = %root, debounce_ms = config.debounce_ms, "watcher started");
    Ok(handle)
}

/// Start the consumer over an arbitrary event source.
pub(crate) fn spawn_consumer(
    branch: &str,
    filter: PathFilter,
    config: &WatcherConfig,
    driver: CommitDriver,
    events: flume::Receiver<RawEvent>,
) -> WatcherHandle {
    let (control_tx, control_rx) = flume::unbounded();
    let stats = driver.stats();
    let consumer = Consumer {
        filter,
        driver,
        stats: Arc::clone(&stats),
        debounce: config.debounce(),
        min_interval: config.min_commit_interval(),
        pending: BTreeSet::new(),
        deadline: None,
        paused: false,
        events,
        events_open: true,
        control: control_rx,
    };
    WatcherHandle {
        branch: branch.to_string(),
        control: control_tx,
        task: tokio::spawn(consumer.run()),
        stats,
        watcher: None,
    }
}
