use git2::{BranchType, Repository, StatusOptions};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git error: {0}")]
    Repository(#[from] git2::Error),

    #[error("HEAD is detached; check out the feature branch before continuing")]
    DetachedHead,

    #[error("branch '{0}' not found")]
    BranchNotFound(String),

    #[error("repository handle is unavailable (a previous git call panicked)")]
    LockPoisoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubRepoInfo {
    pub owner: String,
    pub repo: String,
}

/// Read-only view of the local repository used during state detection
#[cfg_attr(test, mockall::automock)]
pub trait GitInspector: Send + Sync {
    fn current_branch(&self) -> Result<String, GitError>;

    /// Staged, unstaged or untracked (non-ignored) changes
    fn has_uncommitted_changes(&self) -> Result<bool, GitError>;

    /// Whether the branch has a configured upstream
    fn is_tracking(&self, branch: &str) -> Result<bool, GitError>;

    /// Whether the upstream contains every local commit of the branch
    fn is_pushed(&self, branch: &str) -> Result<bool, GitError>;

    fn main_branch(&self) -> Result<String, GitError>;

    /// Full SHA of the commit HEAD points at; `None` before the first commit
    fn head_commit(&self) -> Result<Option<String>, GitError>;

    /// Owner and name of the GitHub repository behind `origin`
    fn github_repo(&self) -> Result<Option<GitHubRepoInfo>, GitError>;
}

/// [`GitInspector`] backed by libgit2
pub struct Git2Inspector {
    repo: Mutex<Repository>,
}

impl std::fmt::Debug for Git2Inspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git2Inspector").finish_non_exhaustive()
    }
}

impl Git2Inspector {
    /// Open the repository containing `path`, searching parent directories
    pub fn discover<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let repo = Repository::discover(path)?;
        Ok(Self {
            repo: Mutex::new(repo),
        })
    }

    fn repo(&self) -> Result<MutexGuard<'_, Repository>, GitError> {
        self.repo.lock().map_err(|_| GitError::LockPoisoned)
    }
}

impl GitInspector for Git2Inspector {
    fn current_branch(&self) -> Result<String, GitError> {
        let repo = self.repo()?;
        // bound to a local so the borrowed reference drops before the guard
        let branch = match repo.head() {
            Ok(head) if head.is_branch() => head
                .shorthand()
                .map(str::to_string)
                .ok_or(GitError::DetachedHead),
            Ok(_) => Err(GitError::DetachedHead),
            // no commits yet; HEAD still names the branch
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => {
                let head = repo.find_reference("HEAD")?;
                head.symbolic_target()
                    .and_then(|target| target.strip_prefix("refs/heads/"))
                    .map(str::to_string)
                    .ok_or(GitError::DetachedHead)
            }
            Err(e) => Err(e.into()),
        };
        branch
    }

    fn head_commit(&self) -> Result<Option<String>, GitError> {
        let repo = self.repo()?;
        let oid = match repo.head() {
            Ok(head) => head.target(),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };
        Ok(oid.map(|oid| oid.to_string()))
    }

    fn has_uncommitted_changes(&self) -> Result<bool, GitError> {
        let repo = self.repo()?;
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(false)
            .include_ignored(false);
        let statuses = repo.statuses(Some(&mut options))?;
        Ok(statuses
            .iter()
            .any(|entry| entry.status() != git2::Status::CURRENT && !entry.status().is_ignored()))
    }

    fn is_tracking(&self, branch: &str) -> Result<bool, GitError> {
        let repo = self.repo()?;
        let local = repo
            .find_branch(branch, BranchType::Local)
            .map_err(|_| GitError::BranchNotFound(branch.to_string()))?;
        let tracking = local.upstream().is_ok();
        Ok(tracking)
    }

    fn is_pushed(&self, branch: &str) -> Result<bool, GitError> {
        let repo = self.repo()?;
        let local = repo
            .find_branch(branch, BranchType::Local)
            .map_err(|_| GitError::BranchNotFound(branch.to_string()))?;
        let Ok(upstream) = local.upstream() else {
            return Ok(false);
        };
        let (Some(local_oid), Some(upstream_oid)) = (local.get().target(), upstream.get().target()) else {
            return Ok(false);
        };
        let (ahead, _behind) = repo.graph_ahead_behind(local_oid, upstream_oid)?;
        Ok(ahead == 0)
    }

    fn main_branch(&self) -> Result<String, GitError> {
        let repo = self.repo()?;
        if let Ok(origin_head) = repo.find_reference("refs/remotes/origin/HEAD") {
            if let Some(name) = origin_head
                .symbolic_target()
                .and_then(|target| target.strip_prefix("refs/remotes/origin/"))
            {
                return Ok(name.to_string());
            }
        }
        for candidate in ["main", "master"] {
            if repo.find_branch(candidate, BranchType::Local).is_ok() {
                return Ok(candidate.to_string());
            }
        }
        Ok("main".to_string())
    }

    fn github_repo(&self) -> Result<Option<GitHubRepoInfo>, GitError> {
        let repo = self.repo()?;
        let Ok(remote) = repo.find_remote("origin") else {
            return Ok(None);
        };
        Ok(remote.url().and_then(parse_github_url))
    }
}

/// Parse owner and repository from a GitHub remote URL.
///
/// Handles `git@github.com:owner/repo.git`, `ssh://git@github.com/owner/repo`
/// and `https://github.com/owner/repo(.git)`.
pub fn parse_github_url(url: &str) -> Option<GitHubRepoInfo> {
    let path = url
        .strip_prefix("git@github.com:")
        .or_else(|| url.strip_prefix("ssh://git@github.com/"))
        .or_else(|| url.strip_prefix("https://github.com/"))?;
    let mut parts = path.split('/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty())?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);

    Some(GitHubRepoInfo {
        owner: owner.to_string(),
        repo: repo.to_string(),
    })
}
