//! Local repository inspection
//!
//! State detection needs a handful of read-only facts about the working copy
//! (branch, cleanliness, upstream status). They are gathered through libgit2
//! rather than by shelling out to `git`.

pub mod inspector;

pub use inspector::{parse_github_url, Git2Inspector, GitError, GitHubRepoInfo, GitInspector};

#[cfg(test)]
pub use inspector::MockGitInspector;
