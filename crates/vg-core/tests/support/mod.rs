#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use vg_core::config::Config;
use vg_core::gateway::{CommandResult, CommandRunner};
use vg_core::probe::RepoRoot;
use vg_core::{Result, VibeEngine, VibeError};

// ===========================================================================
// ScriptedRunner
// ===========================================================================

#[derive(Clone)]
enum Reply {
    Result(CommandResult),
    LaunchFailure,
}

struct Rule {
    pattern: String,
    replies: VecDeque<Reply>,
}

impl Rule {
    /// Exact match on `program args...`, or a prefix match when the
    /// pattern ends with `*`.
    fn matches(&self, line: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => line.starts_with(prefix),
            None => line == self.pattern,
        }
    }
}

/// A command runner that records every invocation and answers from rules.
/// Later rules take precedence; unmatched commands succeed with no output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, pattern: &str, result: CommandResult) -> &Self {
        self.push(pattern, Reply::Result(result));
        self
    }

    pub fn fail_launch(&self, pattern: &str) -> &Self {
        self.push(pattern, Reply::LaunchFailure);
        self
    }

    fn push(&self, pattern: &str, reply: Reply) {
        let mut rules = self.rules.lock().unwrap();
        if let Some(rule) = rules.iter_mut().find(|r| r.pattern == pattern) {
            rule.replies.push_back(reply);
        } else {
            rules.push(Rule {
                pattern: pattern.to_string(),
                replies: VecDeque::from([reply]),
            });
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_starting(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        _cwd: &Path,
        _timeout: Duration,
    ) -> Result<CommandResult> {
        let line = format!("{program} {}", args.join(" "));
        self.calls.lock().unwrap().push(line.clone());

        let mut rules = self.rules.lock().unwrap();
        let Some(rule) = rules.iter_mut().rev().find(|r| r.matches(&line)) else {
            return Ok(CommandResult::ok(""));
        };
        // Queued replies are consumed in order; the last one sticks.
        let reply = if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        };
        match reply {
            Some(Reply::Result(result)) => Ok(result),
            Some(Reply::LaunchFailure) => Err(VibeError::SubprocessLaunchFailure {
                program: program.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted launch failure"),
            }),
            None => Ok(CommandResult::ok("")),
        }
    }
}

// ===========================================================================
// Fixtures
// ===========================================================================

pub const BASE_SHA: &str = "1111111111111111111111111111111111111111";

/// Answers for a clean repository on `main` with no session branches yet.
pub fn clean_repo_runner() -> Arc<ScriptedRunner> {
    let runner = ScriptedRunner::new();
    runner
        .on("git branch --show-current", CommandResult::ok("main\n"))
        .on("git rev-parse HEAD", CommandResult::ok(format!("{BASE_SHA}\n")))
        .on(
            "git rev-parse --verify --quiet refs/heads/vibe-*",
            CommandResult::failed(1, ""),
        )
        .on("git merge-base *", CommandResult::ok(format!("{BASE_SHA}\n")))
        .on("git rev-list --count *", CommandResult::ok("3\n"))
        .on("git diff --cached --quiet", CommandResult::failed(1, ""));
    runner
}

/// Config with a short debounce suitable for tests.
pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.watcher.debounce_ms = 200;
    cfg
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub root: RepoRoot,
}

impl Fixture {
    /// A temp directory with an empty `.git` so persistence and the watcher
    /// have somewhere to live. Git itself is scripted.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().canonicalize().unwrap();
        std::fs::create_dir(workdir.join(".git")).unwrap();
        let root = RepoRoot::from_parts(&workdir, workdir.join(".git"));
        Self { dir, root }
    }

    pub async fn engine(&self, runner: Arc<ScriptedRunner>, config: Config) -> VibeEngine {
        VibeEngine::with_runner(self.root.clone(), config, runner)
            .await
            .expect("engine opens")
    }

    pub fn session_file(&self) -> std::path::PathBuf {
        self.root.gitdir().join("vibe-session.json")
    }
}

// ===========================================================================
// Real git helpers
// ===========================================================================

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git in `dir`, panicking with stderr on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("git runs");
    assert!(
        out.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// A real repository with one commit on `trunk`.
pub fn init_repo(trunk: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path();
    git(path, &["init", "-q"]);
    git(path, &["symbolic-ref", "HEAD", &format!("refs/heads/{trunk}")]);
    git(path, &["config", "user.name", "Test User"]);
    git(path, &["config", "user.email", "test@example.com"]);
    git(path, &["config", "commit.gpgsign", "false"]);
    std::fs::write(path.join("README.md"), "hello\n").unwrap();
    git(path, &["add", "-A"]);
    git(path, &["commit", "-q", "-m", "initial"]);
    dir
}
