use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VibeError};
use crate::gateway::GitGateway;

/// Branches tried, in order, when looking for the trunk.
pub const TRUNK_CANDIDATES: [&str; 2] = ["main", "master"];

// ---------------------------------------------------------------------------
// RepoRoot
// ---------------------------------------------------------------------------

/// A repository's working tree and its git directory.
///
/// The two differ for linked worktrees and submodules, where `.git` is a
/// file pointing elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRoot {
    workdir: PathBuf,
    gitdir: PathBuf,
}

impl RepoRoot {
    pub fn from_parts(workdir: impl Into<PathBuf>, gitdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            gitdir: gitdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn gitdir(&self) -> &Path {
        &self.gitdir
    }
}

impl std::fmt::Display for RepoRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.workdir.display())
    }
}

/// Walk upward from `start` to the nearest directory containing `.git`.
pub fn locate(start: &Path) -> Result<RepoRoot> {
    let start_abs = start
        .canonicalize()
        .map_err(|_| VibeError::NotARepository(start.to_path_buf()))?;

    for dir in start_abs.ancestors() {
        let dot_git = dir.join(".git");
        if dot_git.is_dir() {
            return Ok(RepoRoot::from_parts(dir, dot_git));
        }
        if dot_git.is_file() {
            if let Some(gitdir) = read_gitdir_file(dir, &dot_git) {
                return Ok(RepoRoot::from_parts(dir, gitdir));
            }
        }
    }
    Err(VibeError::NotARepository(start.to_path_buf()))
}

/// Parse a `gitdir: <path>` pointer file.
fn read_gitdir_file(workdir: &Path, file: &Path) -> Option<PathBuf> {
    let text = std::fs::read_to_string(file).ok()?;
    let target = text
        .lines()
        .find_map(|l| l.strip_prefix("gitdir:"))?
        .trim();
    if target.is_empty() {
        return None;
    }
    let path = Path::new(target);
    Some(if path.is_absolute() {
        path.to_path_buf()
    } else {
        workdir.join(path)
    })
}

/// `main` if it exists, else `master`.
pub async fn resolve_trunk(git: &GitGateway) -> Result<String> {
    for candidate in TRUNK_CANDIDATES {
        if git.branch_exists(candidate).await? {
            return Ok(candidate.to_string());
        }
    }
    Err(VibeError::NoTrunkBranch(git.root().to_path_buf()))
}
