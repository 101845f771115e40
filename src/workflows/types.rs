use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::github::{ResourceKind, ResourceState};
use crate::state::{Phase, ValidationError, WiggumState};

/// Local repository facts gathered during detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GitSnapshot {
    branch: String,
    is_main_branch: bool,
    has_uncommitted_changes: bool,
    is_remote_tracking: bool,
    is_pushed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    head_commit: Option<String>,
}

impl GitSnapshot {
    /// A branch can only be pushed if it tracks a remote branch
    pub fn new(
        branch: impl Into<String>,
        is_main_branch: bool,
        has_uncommitted_changes: bool,
        is_remote_tracking: bool,
        is_pushed: bool,
    ) -> Result<Self, ValidationError> {
        let branch = branch.into();
        if branch.trim().is_empty() {
            return Err(ValidationError::InvalidParameter {
                name: "branch",
                reason: "must not be empty".to_string(),
            });
        }
        if is_pushed && !is_remote_tracking {
            return Err(ValidationError::PushedWithoutTracking { branch });
        }
        Ok(Self {
            branch,
            is_main_branch,
            has_uncommitted_changes,
            is_remote_tracking,
            is_pushed,
            head_commit: None,
        })
    }

    pub fn with_head_commit(mut self, head_commit: Option<String>) -> Self {
        self.head_commit = head_commit;
        self
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn is_main_branch(&self) -> bool {
        self.is_main_branch
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        self.has_uncommitted_changes
    }

    pub fn is_remote_tracking(&self) -> bool {
        self.is_remote_tracking
    }

    pub fn is_pushed(&self) -> bool {
        self.is_pushed
    }

    pub fn head_commit(&self) -> Option<&str> {
        self.head_commit.as_deref()
    }
}

/// Where the workflow state in a [`CurrentState`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "number", rename_all = "snake_case")]
pub enum StateSource {
    IssueBody(u64),
    PullRequestBody(u64),
    /// No tracked resource exists, so the initial state was used
    Default,
}

impl fmt::Display for StateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateSource::IssueBody(number) => write!(f, "the body of issue #{number}"),
            StateSource::PullRequestBody(number) => write!(f, "the body of PR #{number}"),
            StateSource::Default => f.write_str("the default initial state"),
        }
    }
}

/// The resource the workflow is currently tracking, compared across
/// detections to notice races
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "number", rename_all = "snake_case")]
pub enum ResourceIdentity {
    Issue(u64),
    PullRequest(u64),
    Untracked,
}

impl ResourceIdentity {
    pub fn from_resources(issue: &ResourceState, pull_request: &ResourceState) -> Self {
        match (pull_request.number(), issue.number()) {
            (Some(pr), _) => ResourceIdentity::PullRequest(pr),
            (None, Some(issue)) => ResourceIdentity::Issue(issue),
            (None, None) => ResourceIdentity::Untracked,
        }
    }

    /// Kind and number of the tracked resource, if any
    pub fn target(self) -> Option<(ResourceKind, u64)> {
        match self {
            ResourceIdentity::Issue(number) => Some((ResourceKind::Issue, number)),
            ResourceIdentity::PullRequest(number) => Some((ResourceKind::PullRequest, number)),
            ResourceIdentity::Untracked => None,
        }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceIdentity::Issue(number) => write!(f, "issue #{number}"),
            ResourceIdentity::PullRequest(number) => write!(f, "PR #{number}"),
            ResourceIdentity::Untracked => f.write_str("no tracked resource"),
        }
    }
}

/// One consistent snapshot of git, remote resources and workflow state.
/// Built fresh by every detection and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentState {
    git: GitSnapshot,
    issue: ResourceState,
    pull_request: ResourceState,
    wiggum: WiggumState,
    source: StateSource,
    detected_at: DateTime<Utc>,
}

impl CurrentState {
    pub fn new(
        git: GitSnapshot,
        issue: ResourceState,
        pull_request: ResourceState,
        wiggum: WiggumState,
        source: StateSource,
        detected_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let current = Self {
            git,
            issue,
            pull_request,
            wiggum,
            source,
            detected_at,
        };
        current.validate()?;
        Ok(current)
    }

    /// Full consistency check of the composed snapshot
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.wiggum.validate()?;

        let expected_source = match self.identity() {
            ResourceIdentity::PullRequest(number) => StateSource::PullRequestBody(number),
            ResourceIdentity::Issue(number) => StateSource::IssueBody(number),
            ResourceIdentity::Untracked => StateSource::Default,
        };
        if self.source != expected_source {
            return Err(ValidationError::InvalidState {
                summary: self.wiggum.summary(),
                reason: format!("state was read from {} but {} is tracked", self.source, self.identity()),
            });
        }

        let expected_phase = match self.source {
            StateSource::PullRequestBody(_) => Phase::PostRequest,
            StateSource::IssueBody(_) | StateSource::Default => Phase::PreRequest,
        };
        if self.wiggum.phase() != expected_phase {
            let reason = match self.source {
                StateSource::IssueBody(_) => format!(
                    "{} records {} but no open pull request exists for branch '{}'; the pull request may have been closed",
                    self.source,
                    self.wiggum.phase(),
                    self.git.branch()
                ),
                _ => format!(
                    "{} records {} but {} was expected",
                    self.source,
                    self.wiggum.phase(),
                    expected_phase
                ),
            };
            return Err(ValidationError::InvalidState {
                summary: self.wiggum.summary(),
                reason,
            });
        }
        Ok(())
    }

    pub fn git(&self) -> &GitSnapshot {
        &self.git
    }

    pub fn issue(&self) -> &ResourceState {
        &self.issue
    }

    pub fn pull_request(&self) -> &ResourceState {
        &self.pull_request
    }

    pub fn wiggum(&self) -> &WiggumState {
        &self.wiggum
    }

    pub fn source(&self) -> StateSource {
        self.source
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::from_resources(&self.issue, &self.pull_request)
    }
}
