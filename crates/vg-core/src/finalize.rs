use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info, warn};

use crate::commit::is_auto_commit;
use crate::config::Config;
use crate::error::{Result, VibeError};
use crate::gateway::GitGateway;
use crate::session::CommitMessage;

// ---------------------------------------------------------------------------
// Steps and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeStep {
    IdentifyRange,
    Squash,
    Fetch,
    Rebase,
    Push,
    PullRequest,
}

impl fmt::Display for FinalizeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FinalizeStep::IdentifyRange => "identify range",
            FinalizeStep::Squash => "squash",
            FinalizeStep::Fetch => "fetch",
            FinalizeStep::Rebase => "rebase",
            FinalizeStep::Push => "push",
            FinalizeStep::PullRequest => "pull request",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    pub branch: String,
    pub trunk: String,
    pub base_commit: Option<String>,
    pub message: CommitMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeReport {
    pub branch: String,
    pub trunk: String,
    pub squashed_commits: u32,
    /// The squashed commit after the rebase.
    pub commit: String,
    pub rebased_onto: String,
    /// Whether the branch was pushed.
    pub published: bool,
    pub pr_url: Option<String>,
    pub warnings: Vec<String>,
}

impl fmt::Display for FinalizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "squashed {} commit(s) on '{}' into {} and rebased onto '{}'",
            self.squashed_commits,
            self.branch,
            short(&self.commit),
            self.rebased_onto
        )?;
        if let Some(url) = &self.pr_url {
            write!(f, "; pull request: {url}")?;
        } else if self.published {
            write!(f, "; pushed")?;
        }
        for w in &self.warnings {
            write!(f, "\nwarning: {w}")?;
        }
        Ok(())
    }
}

fn short(sha: &str) -> &str {
    sha.get(..10).unwrap_or(sha)
}

/// The commits a session owns: everything in `base..HEAD`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CommitRange {
    base: String,
    count: u32,
}

// ---------------------------------------------------------------------------
// FinalizePipeline
// ---------------------------------------------------------------------------

/// Squash, rebase, push, open a pull request.
///
/// Squash and rebase are hard gates: when either fails the branch is put
/// back where it was before that step and nothing later runs.
pub struct FinalizePipeline<'a> {
    git: &'a GitGateway,
    config: &'a Config,
}

fn at(step: FinalizeStep, branch: &str) -> impl FnOnce(VibeError) -> VibeError + '_ {
    move |source| VibeError::Finalize {
        step,
        branch: branch.to_string(),
        source: Box::new(source),
    }
}

impl<'a> FinalizePipeline<'a> {
    pub fn new(git: &'a GitGateway, config: &'a Config) -> Self {
        Self { git, config }
    }

    pub async fn run(&self, req: &FinalizeRequest) -> Result<FinalizeReport> {
        use FinalizeStep::*;
        let branch = req.branch.as_str();
        let remote = self.config.finalize.remote.as_str();
        let mut warnings = Vec::new();

        let has_remote = self
            .git
            .remote_exists(remote)
            .await
            .map_err(at(IdentifyRange, branch))?;
        let range = self
            .identify_range(req, has_remote)
            .await
            .map_err(at(IdentifyRange, branch))?;
        if let Some(w) = self.foreign_commits(&range).await {
            warnings.push(w);
        }

        self.squash(req, &range).await.map_err(at(Squash, branch))?;

        let onto = if has_remote {
            self.fetch(req).await.map_err(at(Fetch, branch))?;
            format!("{remote}/{}", req.trunk)
        } else {
            warnings.push(format!(
                "no remote '{remote}': rebased onto local '{}', push and pull request skipped",
                req.trunk
            ));
            req.trunk.clone()
        };
        self.rebase(req, &onto).await.map_err(at(Rebase, branch))?;
        let commit = self.git.head_commit().await.map_err(at(Rebase, branch))?;

        let mut pr_url = None;
        if has_remote {
            self.push(req).await.map_err(at(Push, branch))?;
            if self.config.finalize.create_pr {
                pr_url = self
                    .open_pull_request(req)
                    .await
                    .map_err(at(PullRequest, branch))?;
            }
        }

        if self.config.finalize.return_to_trunk {
            if let Err(e) = self.git.git_checked(&["checkout", &req.trunk]).await {
                warn!(branch, trunk = %req.trunk, error = %e, "could not return to trunk");
                warnings.push(format!("could not check out '{}': {e}", req.trunk));
            }
        }

        info!(
            branch,
            squashed = range.count,
            onto = %onto,
            published = has_remote,
            pr = pr_url.as_deref().unwrap_or("-"),
            "session finalized"
        );
        Ok(FinalizeReport {
            branch: req.branch.clone(),
            trunk: req.trunk.clone(),
            squashed_commits: range.count,
            commit,
            rebased_onto: onto,
            published: has_remote,
            pr_url,
            warnings,
        })
    }

    // -- step 1 --------------------------------------------------------------

    /// Picks the divergence point closest to HEAD among the recorded base
    /// and the merge-bases with the local and remote trunk. After a retried
    /// `stop` the branch already sits on the remote trunk, so the nearest
    /// candidate is the only one that excludes trunk commits.
    async fn identify_range(&self, req: &FinalizeRequest, has_remote: bool) -> Result<CommitRange> {
        let mut candidates: Vec<String> = Vec::new();
        if let Some(base) = &req.base_commit {
            let out = self
                .git
                .git(&["merge-base", "--is-ancestor", base, "HEAD"])
                .await?;
            if out.success() {
                candidates.push(base.clone());
            }
        }
        let mut trunks = vec![req.trunk.clone()];
        if has_remote {
            trunks.push(format!("{}/{}", self.config.finalize.remote, req.trunk));
        }
        for trunk in &trunks {
            let out = self.git.git(&["merge-base", trunk, "HEAD"]).await?;
            if out.success() {
                let sha = out.stdout_trimmed().to_string();
                if !sha.is_empty() && !candidates.contains(&sha) {
                    candidates.push(sha);
                }
            }
        }
        if candidates.is_empty() {
            return Err(VibeError::GitCommand {
                command: format!("merge-base {} HEAD", req.trunk),
                stderr: format!("'{}' shares no history with '{}'", req.branch, req.trunk),
            });
        }

        let mut best: Option<CommitRange> = None;
        for base in candidates {
            let spec = format!("{base}..HEAD");
            let out = self.git.git_checked(&["rev-list", "--count", &spec]).await?;
            let count: u32 = out.stdout_trimmed().parse().map_err(|_| VibeError::GitCommand {
                command: format!("rev-list --count {spec}"),
                stderr: format!("unexpected output '{}'", out.stdout_trimmed()),
            })?;
            if best.as_ref().is_none_or(|b| count < b.count) {
                best = Some(CommitRange { base, count });
            }
        }
        let range = best.ok_or_else(|| VibeError::GitCommand {
            command: "rev-list --count".into(),
            stderr: "no candidate base".into(),
        })?;

        if range.count == 0 {
            return Err(VibeError::NothingToFinalize {
                branch: req.branch.clone(),
                base: short(&range.base).to_string(),
            });
        }
        Ok(range)
    }

    async fn foreign_commits(&self, range: &CommitRange) -> Option<String> {
        let spec = format!("{}..HEAD", range.base);
        let out = self.git.git(&["log", "--format=%s", &spec]).await.ok()?;
        let marker = &self.config.commit.marker;
        let foreign = out
            .stdout_lines()
            .filter(|s| !is_auto_commit(s, marker))
            .count();
        (foreign > 0).then(|| {
            format!("{foreign} commit(s) not created by the watcher were squashed as well")
        })
    }

    // -- steps 2 and 3 ---------------------------------------------------------

    async fn squash(&self, req: &FinalizeRequest, range: &CommitRange) -> Result<()> {
        let pre = self.git.head_commit().await?;
        self.git
            .git_checked(&["reset", "--soft", &range.base])
            .await?;

        if let Err(e) = self.git.git_checked(&["add", "-A"]).await {
            self.restore_soft(&pre).await;
            return Err(e);
        }

        let staged = self.git.git(&["diff", "--cached", "--quiet"]).await;
        match staged {
            Ok(out) if out.exit_code == 0 => {
                self.restore_soft(&pre).await;
                return Err(VibeError::NothingToFinalize {
                    branch: req.branch.clone(),
                    base: short(&range.base).to_string(),
                });
            }
            Ok(out) if out.exit_code == 1 => {}
            Ok(out) => {
                self.restore_soft(&pre).await;
                return Err(VibeError::GitCommand {
                    command: "diff --cached --quiet".into(),
                    stderr: out.diagnostic(),
                });
            }
            Err(e) => {
                self.restore_soft(&pre).await;
                return Err(e);
            }
        }

        let mut args = vec!["commit", "-m", req.message.body()];
        if self.config.finalize.skip_hooks {
            args.push("--no-verify");
        }
        let committed = match self.git.commit_restaging(&args).await {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(VibeError::GitCommand {
                command: "commit".into(),
                stderr: out.diagnostic(),
            }),
            Err(e) => Err(e),
        };
        if let Err(e) = committed {
            self.restore_soft(&pre).await;
            return Err(e);
        }
        info!(branch = %req.branch, commits = range.count, "auto-commits squashed");
        Ok(())
    }

    async fn restore_soft(&self, pre: &str) {
        if let Err(e) = self.git.git_checked(&["reset", "--soft", pre]).await {
            error!(commit = pre, error = %e, "could not restore branch after failed squash");
        }
    }

    // -- step 4 --------------------------------------------------------------

    async fn fetch(&self, req: &FinalizeRequest) -> Result<()> {
        self.git
            .git_checked(&["fetch", &self.config.finalize.remote, &req.trunk])
            .await?;
        Ok(())
    }

    /// Never leaves the repository mid-rebase.
    async fn rebase(&self, req: &FinalizeRequest, onto: &str) -> Result<()> {
        let pre = self.git.head_commit().await?;
        let out = self.git.git(&["rebase", onto]).await?;
        if out.success() {
            return Ok(());
        }

        let paths = self.git.unmerged_paths().await.unwrap_or_default();
        match self.git.git(&["rebase", "--abort"]).await {
            Ok(abort) if !abort.success() => {
                warn!(branch = %req.branch, detail = %abort.diagnostic(), "rebase --abort failed")
            }
            Err(e) => warn!(branch = %req.branch, error = %e, "rebase --abort failed"),
            Ok(_) => {}
        }
        let head = self.git.head_commit().await.ok();
        if head.as_deref() != Some(pre.as_str()) {
            if let Err(e) = self.git.git_checked(&["reset", "--hard", &pre]).await {
                error!(branch = %req.branch, commit = %pre, error = %e, "could not restore branch after failed rebase");
            }
        }

        if paths.is_empty() {
            return Err(VibeError::GitCommand {
                command: format!("rebase {onto}"),
                stderr: out.diagnostic(),
            });
        }
        warn!(branch = %req.branch, onto, conflicts = paths.len(), "rebase conflicted and was aborted");
        Err(VibeError::RebaseConflict {
            branch: req.branch.clone(),
            onto: onto.to_string(),
            paths,
        })
    }

    // -- steps 5 and 6 ---------------------------------------------------------

    async fn push(&self, req: &FinalizeRequest) -> Result<()> {
        let remote = &self.config.finalize.remote;
        if req.branch == req.trunk {
            return Err(VibeError::PushRejected {
                branch: req.branch.clone(),
                remote: remote.clone(),
                reason: "refusing to force-push the trunk".into(),
            });
        }
        let out = self
            .git
            .git(&["push", "--force", "-u", remote, &req.branch])
            .await?;
        if !out.success() {
            return Err(VibeError::PushRejected {
                branch: req.branch.clone(),
                remote: remote.clone(),
                reason: out.diagnostic(),
            });
        }
        info!(branch = %req.branch, remote = %remote, "branch pushed");
        Ok(())
    }

    async fn open_pull_request(&self, req: &FinalizeRequest) -> Result<Option<String>> {
        let out = self
            .git
            .hosting(&[
                "pr",
                "create",
                "--title",
                req.message.title(),
                "--body",
                req.message.body(),
                "--base",
                &req.trunk,
                "--head",
                &req.branch,
            ])
            .await?;
        let program = self.git.hosting_program().to_string();
        if out.success() {
            let url = find_url(&out.stdout).or_else(|| {
                let text = out.stdout_trimmed();
                (!text.is_empty()).then(|| text.to_string())
            });
            info!(branch = %req.branch, url = url.as_deref().unwrap_or("-"), "pull request created");
            return Ok(url);
        }

        let detail = out.diagnostic();
        let lower = detail.to_lowercase();
        if lower.contains("already exists") {
            if let Some(url) = find_url(&detail) {
                info!(branch = %req.branch, %url, "pull request already open");
                return Ok(Some(url));
            }
        }
        if AUTH_HINTS.iter().any(|hint| lower.contains(hint)) {
            return Err(VibeError::HostingAuthRequired {
                program,
                branch: req.branch.clone(),
                detail,
            });
        }
        Err(VibeError::HostingCommand {
            program,
            command: "pr create".into(),
            branch: req.branch.clone(),
            stderr: detail,
        })
    }
}

/// Lowercased fragments of hosting CLI output that mean "log in first".
const AUTH_HINTS: &[&str] = &["gh auth login", "not logged in", "authentication", "gh_token"];

fn find_url(text: &str) -> Option<String> {
    text.split_whitespace()
        .find(|w| w.starts_with("https://") || w.starts_with("http://"))
        .map(|w| w.trim_end_matches(['.', ',', ')']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{CommandResult, CommandRunner};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// A matching one-shot reply is used up first; otherwise the first rule
    /// whose prefix matches `program args` wins. Default is success.
    struct RuleRunner {
        once: Mutex<Vec<(&'static str, CommandResult)>>,
        rules: Vec<(&'static str, CommandResult)>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for RuleRunner {
        async fn run(
            &self,
            program: &str,
            args: &[String],
            _cwd: &Path,
            _timeout: Duration,
        ) -> Result<CommandResult> {
            let line = format!("{program} {}", args.join(" "));
            self.calls.lock().unwrap().push(line.clone());
            let mut once = self.once.lock().unwrap();
            if let Some(i) = once.iter().position(|(prefix, _)| line.starts_with(prefix)) {
                return Ok(once.remove(i).1);
            }
            Ok(self
                .rules
                .iter()
                .find(|(prefix, _)| line.starts_with(prefix))
                .map(|(_, r)| r.clone())
                .unwrap_or_else(|| CommandResult::ok("")))
        }
    }

    fn base_rules() -> Vec<(&'static str, CommandResult)> {
        vec![
            ("git rev-parse HEAD", CommandResult::ok("c0ffee\n")),
            ("git merge-base --is-ancestor", CommandResult::ok("")),
            ("git merge-base", CommandResult::ok("base0\n")),
            ("git rev-list --count", CommandResult::ok("3\n")),
            ("git diff --cached --quiet", CommandResult::failed(1, "")),
            (
                "git log --format=%s",
                CommandResult::ok("vibe-git auto-commit 1\nvibe-git auto-commit 2\n"),
            ),
        ]
    }

    fn request() -> FinalizeRequest {
        FinalizeRequest {
            branch: "vibe-20240101-000000".into(),
            trunk: "main".into(),
            base_commit: Some("base0".into()),
            message: CommitMessage::parse("Add X\n\nDetails").unwrap(),
        }
    }

    async fn run_with(
        rules: Vec<(&'static str, CommandResult)>,
        req: &FinalizeRequest,
    ) -> (Result<FinalizeReport>, Vec<String>) {
        run_with_once(vec![], rules, req).await
    }

    async fn run_with_once(
        once: Vec<(&'static str, CommandResult)>,
        mut rules: Vec<(&'static str, CommandResult)>,
        req: &FinalizeRequest,
    ) -> (Result<FinalizeReport>, Vec<String>) {
        rules.extend(base_rules());
        let runner = Arc::new(RuleRunner {
            once: Mutex::new(once),
            rules,
            calls: Mutex::new(Vec::new()),
        });
        let config = Config::default();
        let git = GitGateway::new(runner.clone(), "/repo", &config);
        let result = FinalizePipeline::new(&git, &config).run(req).await;
        let calls = runner.calls.lock().unwrap().clone();
        (result, calls)
    }

    fn no_remote() -> (&'static str, CommandResult) {
        (
            "git remote get-url",
            CommandResult::failed(2, "error: No such remote 'origin'"),
        )
    }

    #[tokio::test]
    async fn local_only_squashes_and_rebases_onto_local_trunk() {
        let (result, calls) = run_with(vec![no_remote()], &request()).await;
        let report = result.unwrap();

        assert_eq!(report.squashed_commits, 3);
        assert_eq!(report.rebased_onto, "main");
        assert!(!report.published);
        assert_eq!(report.pr_url, None);
        assert_eq!(report.warnings.len(), 1);

        assert!(calls.contains(&"git reset --soft base0".to_string()));
        assert!(calls.contains(&"git commit -m Add X\n\nDetails".to_string()));
        assert!(calls.contains(&"git rebase main".to_string()));
        assert!(calls.contains(&"git checkout main".to_string()));
        assert!(!calls.iter().any(|c| c.starts_with("git push") || c.starts_with("gh ")));
        assert!(!calls.iter().any(|c| c.starts_with("git fetch")));
    }

    #[tokio::test]
    async fn full_pipeline_pushes_and_opens_pr() {
        let rules = vec![(
            "gh pr create",
            CommandResult::ok("https://github.com/o/r/pull/7\n"),
        )];
        let (result, calls) = run_with(rules, &request()).await;
        let report = result.unwrap();

        assert!(report.published);
        assert_eq!(report.rebased_onto, "origin/main");
        assert_eq!(report.pr_url.as_deref(), Some("https://github.com/o/r/pull/7"));
        assert!(calls.contains(&"git fetch origin main".to_string()));
        assert!(calls.contains(&"git push --force -u origin vibe-20240101-000000".to_string()));
        assert!(calls.contains(
            &"gh pr create --title Add X --body Add X\n\nDetails --base main --head vibe-20240101-000000"
                .to_string()
        ));
    }

    #[tokio::test]
    async fn empty_range_is_nothing_to_finalize() {
        let rules = vec![no_remote(), ("git rev-list --count", CommandResult::ok("0\n"))];
        let (result, calls) = run_with(rules, &request()).await;
        let err = result.unwrap_err();

        assert_eq!(err.finalize_step(), Some(FinalizeStep::IdentifyRange));
        assert!(matches!(err.root_cause(), VibeError::NothingToFinalize { .. }));
        assert!(!calls.iter().any(|c| c.starts_with("git reset")));
    }

    #[tokio::test]
    async fn zero_net_diff_restores_branch() {
        let rules = vec![no_remote(), ("git diff --cached --quiet", CommandResult::ok(""))];
        let (result, calls) = run_with(rules, &request()).await;
        let err = result.unwrap_err();

        assert_eq!(err.finalize_step(), Some(FinalizeStep::Squash));
        assert!(matches!(err.root_cause(), VibeError::NothingToFinalize { .. }));
        assert_eq!(calls.last().map(String::as_str), Some("git reset --soft c0ffee"));
    }

    #[tokio::test]
    async fn rebase_conflict_aborts_and_names_paths() {
        let rules = vec![
            no_remote(),
            ("git rebase main", CommandResult::failed(1, "CONFLICT (content)")),
            (
                "git diff --name-only --diff-filter=U",
                CommandResult::ok("src/lib.rs\n"),
            ),
        ];
        let (result, calls) = run_with(rules, &request()).await;
        let err = result.unwrap_err();

        assert_eq!(err.finalize_step(), Some(FinalizeStep::Rebase));
        match err.root_cause() {
            VibeError::RebaseConflict { paths, onto, .. } => {
                assert_eq!(paths, &vec!["src/lib.rs".to_string()]);
                assert_eq!(onto, "main");
            }
            other => panic!("unexpected {other}"),
        }
        assert!(calls.contains(&"git rebase --abort".to_string()));
        // HEAD is unchanged, so no hard reset is needed.
        assert!(!calls.iter().any(|c| c.starts_with("git reset --hard")));
        assert!(!calls.iter().any(|c| c == "git checkout main"));
    }

    #[tokio::test]
    async fn unauthenticated_hosting_cli() {
        let rules = vec![(
            "gh pr create",
            CommandResult::failed(4, "To get started with GitHub CLI, please run:  gh auth login"),
        )];
        let (result, _) = run_with(rules, &request()).await;
        let err = result.unwrap_err();
        assert_eq!(err.finalize_step(), Some(FinalizeStep::PullRequest));
        assert!(matches!(err.root_cause(), VibeError::HostingAuthRequired { .. }));
    }

    #[tokio::test]
    async fn unrelated_failure_mentioning_author_is_not_auth() {
        let rules = vec![(
            "gh pr create",
            CommandResult::failed(1, "GraphQL: author cannot request review from themselves"),
        )];
        let (result, _) = run_with(rules, &request()).await;
        let err = result.unwrap_err();
        assert_eq!(err.finalize_step(), Some(FinalizeStep::PullRequest));
        assert!(matches!(err.root_cause(), VibeError::HostingCommand { .. }));
    }

    #[tokio::test]
    async fn missing_token_is_auth() {
        let rules = vec![(
            "gh pr create",
            CommandResult::failed(4, "gh: set the GH_TOKEN environment variable"),
        )];
        let (result, _) = run_with(rules, &request()).await;
        assert!(matches!(
            result.unwrap_err().root_cause(),
            VibeError::HostingAuthRequired { .. }
        ));
    }

    #[tokio::test]
    async fn rejected_push_stops_before_pull_request() {
        let rules = vec![(
            "git push",
            CommandResult::failed(1, "! [remote rejected] vibe-20240101-000000 (protected branch hook declined)"),
        )];
        let (result, calls) = run_with(rules, &request()).await;
        let err = result.unwrap_err();

        assert_eq!(err.finalize_step(), Some(FinalizeStep::Push));
        match err.root_cause() {
            VibeError::PushRejected { remote, reason, .. } => {
                assert_eq!(remote, "origin");
                assert!(reason.contains("protected branch"), "{reason}");
            }
            other => panic!("unexpected {other}"),
        }
        assert!(calls.contains(&"git push --force -u origin vibe-20240101-000000".to_string()));
        assert!(!calls.iter().any(|c| c.starts_with("gh ")));
        assert!(!calls.iter().any(|c| c == "git checkout main"));
    }

    #[tokio::test]
    async fn hook_rewrite_is_restaged_and_committed() {
        let once = vec![(
            "git commit -m",
            CommandResult::failed(1, "prettier: files were modified by this hook"),
        )];
        let rules = vec![
            no_remote(),
            ("git status --porcelain=v1 -z", CommandResult::ok("MM src/lib.rs\0")),
        ];
        let (result, calls) = run_with_once(once, rules, &request()).await;

        assert_eq!(result.unwrap().squashed_commits, 3);
        let commits = calls.iter().filter(|c| c.starts_with("git commit -m")).count();
        assert_eq!(commits, 2);
        let adds = calls.iter().filter(|c| *c == "git add -A").count();
        assert_eq!(adds, 2);
        assert!(!calls.iter().any(|c| c == "git reset --soft c0ffee"));
    }

    #[tokio::test]
    async fn hook_rejection_without_rewrite_restores_branch() {
        let rules = vec![
            no_remote(),
            ("git commit -m", CommandResult::failed(1, "lint failed")),
        ];
        let (result, calls) = run_with(rules, &request()).await;
        let err = result.unwrap_err();

        assert_eq!(err.finalize_step(), Some(FinalizeStep::Squash));
        assert!(err.to_string().contains("lint failed"), "{err}");
        let commits = calls.iter().filter(|c| c.starts_with("git commit -m")).count();
        assert_eq!(commits, 1);
        assert_eq!(calls.last().map(String::as_str), Some("git reset --soft c0ffee"));
    }

    #[tokio::test]
    async fn existing_pull_request_counts_as_success() {
        let rules = vec![(
            "gh pr create",
            CommandResult::failed(
                1,
                "a pull request for branch \"vibe-20240101-000000\" into branch \"main\" already exists:\nhttps://github.com/o/r/pull/3",
            ),
        )];
        let (result, _) = run_with(rules, &request()).await;
        assert_eq!(
            result.unwrap().pr_url.as_deref(),
            Some("https://github.com/o/r/pull/3")
        );
    }

    #[tokio::test]
    async fn refuses_to_push_trunk() {
        let mut req = request();
        req.branch = "main".into();
        let (result, calls) = run_with(vec![], &req).await;
        let err = result.unwrap_err();
        assert_eq!(err.finalize_step(), Some(FinalizeStep::Push));
        assert!(!calls.iter().any(|c| c.starts_with("git push")));
    }

    #[tokio::test]
    async fn nearest_base_wins_after_retry() {
        let rules = vec![
            no_remote(),
            ("git merge-base main HEAD", CommandResult::ok("tip1\n")),
            ("git rev-list --count base0..HEAD", CommandResult::ok("5\n")),
            ("git rev-list --count tip1..HEAD", CommandResult::ok("1\n")),
        ];
        let (result, calls) = run_with(rules, &request()).await;
        assert_eq!(result.unwrap().squashed_commits, 1);
        assert!(calls.contains(&"git reset --soft tip1".to_string()));
    }
}
