//! Subprocess access to `git` and the hosting CLI.
//!
//! Every external command goes through [`CommandRunner`] so tests can swap in
//! a scripted runner. Invocations are bounded by a timeout and never prompt.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Result, VibeError};

// ---------------------------------------------------------------------------
// CommandResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Non-empty stdout lines. Leading whitespace is kept because porcelain
    /// status output is column-sensitive.
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty())
    }

    /// stderr if present, otherwise stdout, otherwise the exit code.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        format!("exit code {}", self.exit_code)
    }
}

// ---------------------------------------------------------------------------
// CommandRunner trait (for testability)
// ---------------------------------------------------------------------------

/// Runs an external program to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CommandResult>;
}

/// Real runner backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CommandResult> {
        let child = tokio::process::Command::new(program)
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GH_PROMPT_DISABLED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| VibeError::SubprocessLaunchFailure {
                program: program.to_string(),
                source,
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| VibeError::SubprocessLaunchFailure {
                program: program.to_string(),
                source,
            })?,
            // Dropping the future drops the child, which kills it.
            Err(_) => {
                return Err(VibeError::CommandTimeout {
                    program: program.to_string(),
                    args: args.join(" "),
                    timeout,
                })
            }
        };

        Ok(CommandResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// GitGateway
// ---------------------------------------------------------------------------

/// Git and hosting-CLI operations scoped to one working tree.
#[derive(Clone)]
pub struct GitGateway {
    runner: Arc<dyn CommandRunner>,
    root: PathBuf,
    git_bin: String,
    hosting_bin: String,
    timeout: Duration,
}

impl std::fmt::Debug for GitGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitGateway")
            .field("root", &self.root)
            .field("git_bin", &self.git_bin)
            .field("hosting_bin", &self.hosting_bin)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GitGateway {
    pub fn new(runner: Arc<dyn CommandRunner>, root: impl Into<PathBuf>, config: &Config) -> Self {
        Self {
            runner,
            root: root.into(),
            git_bin: config.commands.git_bin.clone(),
            hosting_bin: config.commands.hosting_bin.clone(),
            timeout: config.commands.timeout(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hosting_program(&self) -> &str {
        &self.hosting_bin
    }

    /// Run git; a non-zero exit is returned, not raised.
    pub async fn git(&self, args: &[&str]) -> Result<CommandResult> {
        self.exec(&self.git_bin, args).await
    }

    /// Run git and turn a non-zero exit into [`VibeError::GitCommand`].
    pub async fn git_checked(&self, args: &[&str]) -> Result<CommandResult> {
        let out = self.git(args).await?;
        if !out.success() {
            return Err(VibeError::GitCommand {
                command: args.join(" "),
                stderr: out.diagnostic(),
            });
        }
        Ok(out)
    }

    pub async fn hosting(&self, args: &[&str]) -> Result<CommandResult> {
        self.exec(&self.hosting_bin, args).await
    }

    async fn exec(&self, program: &str, args: &[&str]) -> Result<CommandResult> {
        let owned: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let out = self
            .runner
            .run(program, &owned, &self.root, self.timeout)
            .await?;
        debug!(program, args = %owned.join(" "), exit_code = out.exit_code, "command finished");
        Ok(out)
    }

    // -- helpers -----------------------------------------------------------

    /// `None` on a detached HEAD.
    pub async fn current_branch(&self) -> Result<Option<String>> {
        let out = self.git_checked(&["branch", "--show-current"]).await?;
        let name = out.stdout_trimmed();
        Ok((!name.is_empty()).then(|| name.to_string()))
    }

    /// Paths with staged, unstaged or untracked changes.
    pub async fn dirty_paths(&self) -> Result<Vec<String>> {
        Ok(self
            .status_entries()
            .await?
            .into_iter()
            .map(|(_, path)| path)
            .collect())
    }

    /// Paths whose working-tree copy differs from the index, untracked
    /// files included.
    pub async fn unstaged_paths(&self) -> Result<Vec<String>> {
        Ok(self
            .status_entries()
            .await?
            .into_iter()
            .filter(|(status, _)| status.as_bytes().get(1) != Some(&b' '))
            .map(|(_, path)| path)
            .collect())
    }

    async fn status_entries(&self) -> Result<Vec<(String, String)>> {
        let out = self
            .git_checked(&["status", "--porcelain=v1", "-z", "--untracked-files=all"])
            .await?;
        Ok(parse_porcelain_z(&out.stdout))
    }

    /// Run `git commit` with `args`. When it fails and a hook left rewritten
    /// files behind, stage them and commit once more.
    pub async fn commit_restaging(&self, args: &[&str]) -> Result<CommandResult> {
        let first = self.git(args).await?;
        if first.success() {
            return Ok(first);
        }
        let rewritten = self.unstaged_paths().await?;
        if rewritten.is_empty() {
            return Ok(first);
        }
        warn!(
            paths = ?rewritten,
            detail = %first.diagnostic(),
            "commit hook rewrote files, restaging and retrying"
        );
        self.git_checked(&["add", "-A"]).await?;
        self.git(args).await
    }

    pub async fn branch_exists(&self, name: &str) -> Result<bool> {
        let reference = format!("refs/heads/{name}");
        let out = self
            .git(&["rev-parse", "--verify", "--quiet", &reference])
            .await?;
        Ok(out.success())
    }

    pub async fn head_commit(&self) -> Result<String> {
        let out = self.git_checked(&["rev-parse", "HEAD"]).await?;
        Ok(out.stdout_trimmed().to_string())
    }

    pub async fn remote_exists(&self, remote: &str) -> Result<bool> {
        let out = self.git(&["remote", "get-url", remote]).await?;
        Ok(out.success())
    }

    /// Files left with conflict markers by a failed merge or rebase.
    pub async fn unmerged_paths(&self) -> Result<Vec<String>> {
        let out = self
            .git(&["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(out.stdout_lines().map(|l| l.trim().to_string()).collect())
    }
}

/// Entries of `status --porcelain=v1 -z` as `(XY, path)`. Paths are raw,
/// never quoted. Rename and copy entries carry their source path in the
/// next field, which is skipped.
fn parse_porcelain_z(out: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    let mut fields = out.split('\0');
    while let Some(field) = fields.next() {
        let (Some(status), Some(path)) = (field.get(..2), field.get(3..)) else {
            continue;
        };
        if status.contains(['R', 'C']) {
            fields.next();
        }
        if !path.is_empty() {
            entries.push((status.to_string(), path.to_string()));
        }
    }
    entries
}
