//! Shared in-memory collaborators for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wiggum::external::{MonitorError, MonitorOutcome, MonitorTarget, WorkflowMonitor};
use wiggum::git::{GitError, GitHubRepoInfo, GitInspector};
use wiggum::github::{GitHubError, ResourceDetails, ResourceKind, ResourceLookup, ResourceStatus, TextResourceClient};
use wiggum::observer::{MemorySink, Observer};
use wiggum::state::{self, WiggumState};
use wiggum::workflows::{DetectorSettings, Router, RouterSettings, StateDetector};

pub const BRANCH: &str = "12-fix-login";
pub const ISSUE: u64 = 12;
pub const PR: u64 = 31;
pub const HEAD_SHA: &str = "c0ffee1234567890abcdef1234567890abcdef12";

/// Working copy with fixed answers
#[derive(Debug, Clone)]
pub struct FakeGit {
    pub branch: String,
    pub dirty: bool,
    pub tracking: bool,
    pub pushed: bool,
    pub head: Option<String>,
}

impl FakeGit {
    pub fn clean(branch: &str) -> Self {
        Self {
            branch: branch.to_string(),
            dirty: false,
            tracking: true,
            pushed: true,
            head: Some(HEAD_SHA.to_string()),
        }
    }
}

impl GitInspector for FakeGit {
    fn current_branch(&self) -> Result<String, GitError> {
        Ok(self.branch.clone())
    }

    fn has_uncommitted_changes(&self) -> Result<bool, GitError> {
        Ok(self.dirty)
    }

    fn is_tracking(&self, _branch: &str) -> Result<bool, GitError> {
        Ok(self.tracking)
    }

    fn is_pushed(&self, _branch: &str) -> Result<bool, GitError> {
        Ok(self.pushed)
    }

    fn main_branch(&self) -> Result<String, GitError> {
        Ok("main".to_string())
    }

    fn head_commit(&self) -> Result<Option<String>, GitError> {
        Ok(self.head.clone())
    }

    fn github_repo(&self) -> Result<Option<GitHubRepoInfo>, GitError> {
        Ok(Some(GitHubRepoInfo {
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
        }))
    }
}

/// Issues, pull requests and their bodies held in memory
#[derive(Default)]
pub struct InMemoryGitHub {
    issues: Mutex<HashMap<u64, ResourceDetails>>,
    pull_requests: Mutex<HashMap<String, ResourceDetails>>,
    bodies: Mutex<HashMap<(ResourceKind, u64), String>>,
    write_failures: Mutex<VecDeque<GitHubError>>,
    writes: Mutex<u32>,
}

impl InMemoryGitHub {
    pub fn open_issue(&self, number: u64, body: &str) {
        self.issues
            .lock()
            .unwrap()
            .insert(number, details(number, None));
        self.set_body(ResourceKind::Issue, number, body);
    }

    pub fn open_pull_request(&self, number: u64, branch: &str, body: &str) {
        self.pull_requests
            .lock()
            .unwrap()
            .insert(branch.to_string(), details(number, Some(branch)));
        self.set_body(ResourceKind::PullRequest, number, body);
    }

    pub fn set_body(&self, kind: ResourceKind, id: u64, body: &str) {
        self.bodies.lock().unwrap().insert((kind, id), body.to_string());
    }

    pub fn body(&self, kind: ResourceKind, id: u64) -> String {
        self.bodies.lock().unwrap().get(&(kind, id)).cloned().unwrap_or_default()
    }

    pub fn state(&self, kind: ResourceKind, id: u64) -> Option<WiggumState> {
        state::decode(&self.body(kind, id)).expect("stored marker is valid")
    }

    pub fn fail_next_write(&self, error: GitHubError) {
        self.write_failures.lock().unwrap().push_back(error);
    }

    pub fn writes(&self) -> u32 {
        *self.writes.lock().unwrap()
    }
}

fn details(number: u64, head: Option<&str>) -> ResourceDetails {
    ResourceDetails {
        number,
        title: format!("Fix login #{number}"),
        status: ResourceStatus::Open,
        labels: vec![],
        head_ref: head.map(str::to_string),
        base_ref: head.map(|_| "main".to_string()),
        url: Some(format!("https://github.com/acme/widgets/issues/{number}")),
    }
}

#[async_trait]
impl ResourceLookup for InMemoryGitHub {
    async fn find_open_pull_request(&self, branch: &str) -> Result<Option<ResourceDetails>, GitHubError> {
        Ok(self.pull_requests.lock().unwrap().get(branch).cloned())
    }

    async fn get_issue(&self, number: u64) -> Result<Option<ResourceDetails>, GitHubError> {
        Ok(self.issues.lock().unwrap().get(&number).cloned())
    }
}

#[async_trait]
impl TextResourceClient for InMemoryGitHub {
    async fn read_body(&self, kind: ResourceKind, id: u64) -> Result<String, GitHubError> {
        Ok(self.body(kind, id))
    }

    async fn write_body(&self, kind: ResourceKind, id: u64, body: &str) -> Result<(), GitHubError> {
        *self.writes.lock().unwrap() += 1;
        if let Some(error) = self.write_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.set_body(kind, id, body);
        Ok(())
    }
}

/// Monitor that replays queued outcomes and passes once the queue is empty
#[derive(Default)]
pub struct ScriptedMonitor {
    outcomes: Mutex<VecDeque<Result<MonitorOutcome, MonitorError>>>,
    targets: Mutex<Vec<MonitorTarget>>,
}

impl ScriptedMonitor {
    pub fn push(&self, outcome: Result<MonitorOutcome, MonitorError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn targets(&self) -> Vec<MonitorTarget> {
        self.targets.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkflowMonitor for ScriptedMonitor {
    async fn run(&self, target: &MonitorTarget, _timeout: Duration) -> Result<MonitorOutcome, MonitorError> {
        self.targets.lock().unwrap().push(target.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(MonitorOutcome::passed()))
    }
}

/// Detector and router sharing one fake GitHub and one event sink
pub struct Harness {
    pub github: Arc<InMemoryGitHub>,
    pub monitor: Arc<ScriptedMonitor>,
    pub events: MemorySink,
    pub detector: StateDetector,
    pub router: Router,
}

impl Harness {
    pub fn new(git: FakeGit) -> Self {
        Self::with_github(git, Arc::new(InMemoryGitHub::default()))
    }

    pub fn with_github(git: FakeGit, github: Arc<InMemoryGitHub>) -> Self {
        let monitor = Arc::new(ScriptedMonitor::default());
        let events = MemorySink::new();
        let observer = Arc::new(Observer::memory(events.clone()));

        let detector = StateDetector::new(
            Arc::new(git),
            github.clone(),
            github.clone(),
            Arc::clone(&observer),
            DetectorSettings::default(),
        );
        let router = Router::new(github.clone(), monitor.clone(), observer, RouterSettings::default());

        Self {
            github,
            monitor,
            events,
            detector,
            router,
        }
    }
}
