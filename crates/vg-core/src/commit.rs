use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CommitConfig;
use crate::gateway::GitGateway;

// ---------------------------------------------------------------------------
// CommitStats
// ---------------------------------------------------------------------------

/// Counters shared between the commit loop and status readers.
///
/// `pending` is a read-only mirror of the consumer task's set; the set itself
/// never leaves that task.
#[derive(Debug, Default)]
pub struct CommitStats {
    pending: Mutex<Vec<String>>,
    auto_commits: AtomicU64,
    last_commit_at: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl CommitStats {
    pub fn pending_paths(&self) -> Vec<String> {
        lock(&self.pending).clone()
    }

    pub fn auto_commits(&self) -> u64 {
        self.auto_commits.load(Ordering::Relaxed)
    }

    pub fn last_commit_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.last_commit_at)
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    pub(crate) fn mirror_pending(&self, pending: &BTreeSet<String>) {
        *lock(&self.pending) = pending.iter().cloned().collect();
    }

    fn record_commit(&self) {
        self.auto_commits.fetch_add(1, Ordering::Relaxed);
        *lock(&self.last_commit_at) = Some(Utc::now());
        *lock(&self.last_error) = None;
    }

    fn record_failure(&self, reason: &str) {
        *lock(&self.last_error) = Some(reason.to_string());
    }
}

// ---------------------------------------------------------------------------
// CommitOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { paths: Vec<String> },
    /// Staging produced no net diff.
    NothingToCommit,
    /// Pending paths are kept for the next flush.
    Failed { reason: String },
}

// ---------------------------------------------------------------------------
// CommitDriver
// ---------------------------------------------------------------------------

/// Turns one debounced burst into at most one auto-commit.
pub struct CommitDriver {
    git: GitGateway,
    marker: String,
    skip_hooks: bool,
    stats: Arc<CommitStats>,
    last_commit: Option<Instant>,
}

impl CommitDriver {
    pub fn new(git: GitGateway, config: &CommitConfig) -> Self {
        Self {
            git,
            marker: config.marker.clone(),
            skip_hooks: config.skip_hooks,
            stats: Arc::new(CommitStats::default()),
            last_commit: None,
        }
    }

    pub fn stats(&self) -> Arc<CommitStats> {
        Arc::clone(&self.stats)
    }

    /// Monotonic time of the last successful auto-commit.
    pub fn last_commit(&self) -> Option<Instant> {
        self.last_commit
    }

    /// Earliest instant the next commit may run under `min_interval`.
    pub fn next_allowed_at(&self, min_interval: Duration) -> Option<Instant> {
        if min_interval.is_zero() {
            return None;
        }
        self.last_commit.map(|t| t + min_interval)
    }

    pub fn message(&self) -> String {
        format!(
            "{} {}",
            self.marker,
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        )
    }

    /// Stage everything and commit. `pending` is cleared only when the
    /// working tree has been fully captured.
    pub async fn flush(&mut self, pending: &mut BTreeSet<String>) -> CommitOutcome {
        let outcome = self.try_flush().await;
        match &outcome {
            CommitOutcome::Committed { paths } => {
                pending.clear();
                self.last_commit = Some(Instant::now());
                self.stats.record_commit();
                info!(files = paths.len(), "auto-commit created");
            }
            CommitOutcome::NothingToCommit => {
                pending.clear();
                debug!("flush staged no changes");
            }
            CommitOutcome::Failed { reason } => {
                self.stats.record_failure(reason);
                warn!(pending = pending.len(), %reason, "auto-commit failed, will retry on next flush");
            }
        }
        self.stats.mirror_pending(pending);
        outcome
    }

    async fn try_flush(&self) -> CommitOutcome {
        match self.git.git(&["add", "-A"]).await {
            Ok(out) if out.success() => {}
            Ok(out) => return failed("git add", out.diagnostic()),
            Err(e) => return failed("git add", e.to_string()),
        }

        let staged = match self.git.git(&["diff", "--cached", "--name-only"]).await {
            Ok(out) if out.success() => out
                .stdout_lines()
                .map(|l| l.trim().to_string())
                .collect::<Vec<_>>(),
            Ok(out) => return failed("git diff --cached", out.diagnostic()),
            Err(e) => return failed("git diff --cached", e.to_string()),
        };
        if staged.is_empty() {
            return CommitOutcome::NothingToCommit;
        }

        let message = self.message();
        let mut args = vec!["commit", "-m", message.as_str()];
        if self.skip_hooks {
            args.push("--no-verify");
        }
        match self.git.commit_restaging(&args).await {
            Ok(out) if out.success() => CommitOutcome::Committed { paths: staged },
            Ok(out) => failed("git commit", out.diagnostic()),
            Err(e) => failed("git commit", e.to_string()),
        }
    }
}

fn failed(step: &str, detail: String) -> CommitOutcome {
    CommitOutcome::Failed {
        reason: format!("{step}: {detail}"),
    }
}

/// Whether a commit subject was written by [`CommitDriver`].
pub fn is_auto_commit(subject: &str, marker: &str) -> bool {
    subject.trim_start().starts_with(marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Result;
    use crate::gateway::{CommandResult, CommandRunner};
    use async_trait::async_trait;
    use std::path::Path;

    /// Answers by the first git subcommand word. The first
    /// `commit_failures` commits are rejected.
    struct StubRunner {
        staged: &'static str,
        status: &'static str,
        commit_failures: Mutex<u32>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for StubRunner {
        async fn run(
            &self,
            _program: &str,
            args: &[String],
            _cwd: &Path,
            _timeout: Duration,
        ) -> Result<CommandResult> {
            self.calls.lock().unwrap().push(args.join(" "));
            Ok(match args[0].as_str() {
                "diff" => CommandResult::ok(self.staged),
                "status" => CommandResult::ok(self.status),
                "commit" => {
                    let mut left = self.commit_failures.lock().unwrap();
                    if *left > 0 {
                        *left -= 1;
                        CommandResult::failed(1, "pre-commit hook rejected the commit")
                    } else {
                        CommandResult::ok("")
                    }
                }
                _ => CommandResult::ok(""),
            })
        }
    }

    fn driver(staged: &'static str, commit_ok: bool) -> (CommitDriver, Arc<StubRunner>) {
        let failures = if commit_ok { 0 } else { u32::MAX };
        driver_with(staged, "", failures)
    }

    fn driver_with(
        staged: &'static str,
        status: &'static str,
        commit_failures: u32,
    ) -> (CommitDriver, Arc<StubRunner>) {
        let runner = Arc::new(StubRunner {
            staged,
            status,
            commit_failures: Mutex::new(commit_failures),
            calls: Mutex::new(Vec::new()),
        });
        let cfg = Config::default();
        let git = GitGateway::new(runner.clone(), "/repo", &cfg);
        (CommitDriver::new(git, &cfg.commit), runner)
    }

    fn pending(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn commits_and_clears_pending() {
        let (mut d, runner) = driver("a.txt\nb.txt\n", true);
        let mut set = pending(&["a.txt", "b.txt"]);

        let outcome = d.flush(&mut set).await;
        assert_eq!(
            outcome,
            CommitOutcome::Committed {
                paths: vec!["a.txt".into(), "b.txt".into()]
            }
        );
        assert!(set.is_empty());
        assert!(d.last_commit().is_some());
        assert_eq!(d.stats().auto_commits(), 1);

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0], "add -A");
        assert!(calls[2].starts_with("commit -m vibe-git auto-commit "));
        assert!(calls[2].ends_with("--no-verify"));
    }

    #[tokio::test]
    async fn empty_diff_is_silent_noop() {
        let (mut d, runner) = driver("", true);
        let mut set = pending(&["a.txt"]);

        assert_eq!(d.flush(&mut set).await, CommitOutcome::NothingToCommit);
        assert!(set.is_empty());
        assert!(d.last_commit().is_none());
        assert_eq!(d.stats().last_commit_at(), None);
        assert_eq!(runner.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failure_keeps_pending() {
        let (mut d, _) = driver("a.txt\n", false);
        let mut set = pending(&["a.txt"]);

        match d.flush(&mut set).await {
            CommitOutcome::Failed { reason } => assert!(reason.contains("hook rejected")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(set.len(), 1);
        assert_eq!(d.stats().pending_paths(), vec!["a.txt".to_string()]);
        assert!(d.stats().last_error().is_some());
    }

    #[tokio::test]
    async fn hook_rewrite_is_restaged_once() {
        let (mut d, runner) = driver_with("a.txt\n", "MM a.txt\0", 1);
        let mut set = pending(&["a.txt"]);

        assert_eq!(
            d.flush(&mut set).await,
            CommitOutcome::Committed {
                paths: vec!["a.txt".into()]
            }
        );
        assert!(set.is_empty());
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.iter().filter(|c| c.starts_with("commit ")).count(), 2);
        assert_eq!(calls.iter().filter(|c| *c == "add -A").count(), 2);
    }

    #[tokio::test]
    async fn second_rejection_is_reported() {
        let (mut d, runner) = driver_with("a.txt\n", "MM a.txt\0", 2);
        let mut set = pending(&["a.txt"]);

        assert!(matches!(d.flush(&mut set).await, CommitOutcome::Failed { .. }));
        assert_eq!(set.len(), 1);
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.iter().filter(|c| c.starts_with("commit ")).count(), 2);
    }

    #[test]
    fn recognizes_marker() {
        assert!(is_auto_commit("vibe-git auto-commit 2024-01-01 00:00:00 UTC", "vibe-git auto-commit"));
        assert!(!is_auto_commit("Add feature", "vibe-git auto-commit"));
    }
}
