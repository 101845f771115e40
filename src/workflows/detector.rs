// Race-aware detection of the current workflow position

use chrono::Utc;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use super::types::{CurrentState, GitSnapshot, ResourceIdentity, StateSource};
use crate::config::{WiggumConfig, MAX_RACE_DEPTH_LIMIT};
use crate::git::{GitError, GitInspector};
use crate::github::{GitHubError, ResourceKind, ResourceLookup, ResourceState, TextResourceClient};
use crate::observer::{Observer, WorkflowEvent};
use crate::state::{self, Phase, StateCorruptionError, ValidationError, WiggumState};

/// Largest integer a depth may be given as, matching what JSON callers can
/// represent exactly
pub const MAX_SAFE_DEPTH: u64 = (1 << 53) - 1;

pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RACE_DEPTH: u32 = 3;

static ISSUE_BRANCH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(?:[-_/]|$)").expect("issue branch pattern is valid"));

/// Issue number encoded at the start of a branch name (`123-fix-login` -> 123)
pub fn issue_number_from_branch(branch: &str) -> Option<u64> {
    ISSUE_BRANCH_PATTERN
        .captures(branch)
        .and_then(|captures| captures.get(1))
        .and_then(|number| number.as_str().parse().ok())
        .filter(|number| *number > 0)
}

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Could not inspect the local repository: {0}")]
    Git(#[from] GitError),

    #[error("{0}")]
    GitHub(#[from] GitHubError),

    #[error("Could not read workflow state from {origin}\n\n{error}")]
    Corruption {
        origin: StateSource,
        error: StateCorruptionError,
    },

    #[error(
        "Workflow state from {origin} failed validation: {error}\n\n\
         🔧 RECOVERY STEPS:\n   \
         1. Open {origin} and find the `<!-- wiggum-state:... -->` marker\n   \
         2. Fix the recorded step/phase, or delete the marker to restart the phase\n   \
         3. If a pull request was closed, reopen it or delete the marker from the issue\n   \
         4. Run `wiggum next` again"
    )]
    Validation {
        origin: StateSource,
        error: ValidationError,
    },

    #[error("Invalid detection depth {depth}: must be at most {max_depth}")]
    InvalidDepth { depth: u64, max_depth: u32 },

    #[error(
        "The tracked resource kept changing during detection ({previous_identity} -> {new_identity}); \
         gave up at depth {depth} of {max_depth}.\n\n\
         🔧 Another process is modifying this issue or pull request. Wait for it to finish, then run `wiggum next` again."
    )]
    RaceLimitExceeded {
        depth: u32,
        max_depth: u32,
        previous_identity: ResourceIdentity,
        new_identity: ResourceIdentity,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorSettings {
    /// Detections slower than this re-check the tracked resource
    pub slow_threshold: Duration,
    pub max_depth: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
            max_depth: DEFAULT_MAX_RACE_DEPTH,
        }
    }
}

impl From<&WiggumConfig> for DetectorSettings {
    fn from(config: &WiggumConfig) -> Self {
        Self {
            slow_threshold: config.slow_threshold(),
            max_depth: config.detection.max_race_depth.min(MAX_RACE_DEPTH_LIMIT),
        }
    }
}

/// Assembles [`CurrentState`] snapshots from git, GitHub and the state marker
pub struct StateDetector {
    git: Arc<dyn GitInspector>,
    lookup: Arc<dyn ResourceLookup>,
    bodies: Arc<dyn TextResourceClient>,
    observer: Arc<Observer>,
    settings: DetectorSettings,
}

impl StateDetector {
    pub fn new(
        git: Arc<dyn GitInspector>,
        lookup: Arc<dyn ResourceLookup>,
        bodies: Arc<dyn TextResourceClient>,
        observer: Arc<Observer>,
        settings: DetectorSettings,
    ) -> Self {
        Self {
            git,
            lookup,
            bodies,
            observer,
            settings,
        }
    }

    pub async fn detect(&self) -> Result<CurrentState, DetectionError> {
        self.detect_from_depth(0).await
    }

    /// Detect starting at `depth` race retries already spent.
    ///
    /// A detection slower than the threshold re-resolves the tracked resource;
    /// if it changed, detection starts over. At most `max_depth + 1`
    /// detections run in total.
    pub async fn detect_from_depth(&self, depth: u64) -> Result<CurrentState, DetectionError> {
        let max_depth = self.settings.max_depth;
        if depth > MAX_SAFE_DEPTH || depth > u64::from(max_depth) {
            return Err(DetectionError::InvalidDepth { depth, max_depth });
        }
        let mut depth = depth as u32;

        loop {
            let attempt = depth + 1;
            let started = Instant::now();
            let current = self.detect_once().await?;
            let elapsed = started.elapsed();
            let identity = current.identity();

            if elapsed <= self.settings.slow_threshold {
                self.completed(attempt, elapsed, identity);
                return Ok(current);
            }

            self.observer.emit(WorkflowEvent::SlowDetection {
                attempt,
                elapsed_ms: elapsed.as_millis() as u64,
                threshold_ms: self.settings.slow_threshold.as_millis() as u64,
            });
            let (issue, pull_request) = self.resolve_resources(current.git().branch()).await?;
            let latest = ResourceIdentity::from_resources(&issue, &pull_request);
            if latest == identity {
                self.completed(attempt, elapsed, identity);
                return Ok(current);
            }

            self.observer.emit(WorkflowEvent::RaceDetected {
                attempt,
                previous_identity: identity.to_string(),
                new_identity: latest.to_string(),
            });
            if depth >= max_depth {
                return Err(DetectionError::RaceLimitExceeded {
                    depth: depth + 1,
                    max_depth,
                    previous_identity: identity,
                    new_identity: latest,
                });
            }
            depth += 1;
        }
    }

    fn completed(&self, attempt: u32, elapsed: Duration, identity: ResourceIdentity) {
        self.observer.emit(WorkflowEvent::DetectionCompleted {
            attempt,
            elapsed_ms: elapsed.as_millis() as u64,
            identity: identity.to_string(),
        });
    }

    async fn detect_once(&self) -> Result<CurrentState, DetectionError> {
        let git = self.git_snapshot()?;
        let (issue, pull_request) = self.resolve_resources(git.branch()).await?;

        let (wiggum, origin) = match ResourceIdentity::from_resources(&issue, &pull_request) {
            ResourceIdentity::PullRequest(number) => {
                let origin = StateSource::PullRequestBody(number);
                let state = self
                    .read_state(ResourceKind::PullRequest, number, origin)
                    .await?
                    .unwrap_or_else(|| WiggumState::initial(Phase::PostRequest));
                (state, origin)
            }
            ResourceIdentity::Issue(number) => {
                let origin = StateSource::IssueBody(number);
                let state = self
                    .read_state(ResourceKind::Issue, number, origin)
                    .await?
                    .unwrap_or_else(|| WiggumState::initial(Phase::PreRequest));
                (state, origin)
            }
            ResourceIdentity::Untracked => (WiggumState::initial(Phase::PreRequest), StateSource::Default),
        };

        CurrentState::new(git, issue, pull_request, wiggum, origin, Utc::now())
            .map_err(|error| DetectionError::Validation { origin, error })
    }

    fn git_snapshot(&self) -> Result<GitSnapshot, DetectionError> {
        let branch = self.git.current_branch()?;
        let main = self.git.main_branch()?;
        let dirty = self.git.has_uncommitted_changes()?;
        let tracking = match self.git.is_tracking(&branch) {
            Ok(tracking) => tracking,
            // unborn branch: nothing committed, so nothing to track
            Err(GitError::BranchNotFound(_)) => false,
            Err(e) => return Err(e.into()),
        };
        let pushed = tracking && self.git.is_pushed(&branch)?;
        let head = self.git.head_commit()?;

        GitSnapshot::new(branch.clone(), branch == main, dirty, tracking, pushed)
            .map(|snapshot| snapshot.with_head_commit(head))
            .map_err(|error| DetectionError::Validation {
                origin: StateSource::Default,
                error,
            })
    }

    async fn resolve_resources(&self, branch: &str) -> Result<(ResourceState, ResourceState), DetectionError> {
        let pull_request = ResourceState::from_lookup(self.lookup.find_open_pull_request(branch).await?);
        let issue = match issue_number_from_branch(branch) {
            Some(number) => ResourceState::from_lookup(self.lookup.get_issue(number).await?),
            None => ResourceState::DoesNotExist,
        };
        Ok((issue, pull_request))
    }

    async fn read_state(
        &self,
        kind: ResourceKind,
        number: u64,
        origin: StateSource,
    ) -> Result<Option<WiggumState>, DetectionError> {
        let body = self.bodies.read_body(kind, number).await?;
        state::decode(&body).map_err(|error| DetectionError::Corruption { origin, error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::MockGitInspector;
    use crate::github::{ResourceDetails, ResourceStatus};
    use crate::observer::MemorySink;
    use crate::state::Step;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    fn details(number: u64, head: Option<&str>) -> ResourceDetails {
        ResourceDetails {
            number,
            title: format!("#{number}"),
            status: ResourceStatus::Open,
            labels: vec![],
            head_ref: head.map(str::to_string),
            base_ref: head.map(|_| "main".to_string()),
            url: None,
        }
    }

    /// Resource lookups and bodies backed by maps, optionally slow and
    /// optionally handing out a new PR number on every lookup
    #[derive(Default)]
    struct FakeGitHub {
        issues: HashMap<u64, ResourceDetails>,
        pull_request: Option<ResourceDetails>,
        bodies: Mutex<HashMap<(ResourceKind, u64), String>>,
        lookup_delay: Option<Duration>,
        churn: Option<AtomicU64>,
    }

    #[async_trait]
    impl ResourceLookup for FakeGitHub {
        async fn find_open_pull_request(&self, branch: &str) -> Result<Option<ResourceDetails>, GitHubError> {
            if let Some(delay) = self.lookup_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(counter) = &self.churn {
                let number = 100 + counter.fetch_add(1, Ordering::SeqCst);
                return Ok(Some(details(number, Some(branch))));
            }
            Ok(self.pull_request.clone())
        }

        async fn get_issue(&self, number: u64) -> Result<Option<ResourceDetails>, GitHubError> {
            Ok(self.issues.get(&number).cloned())
        }
    }

    #[async_trait]
    impl TextResourceClient for FakeGitHub {
        async fn read_body(&self, kind: ResourceKind, id: u64) -> Result<String, GitHubError> {
            Ok(self.bodies.lock().unwrap().get(&(kind, id)).cloned().unwrap_or_default())
        }

        async fn write_body(&self, kind: ResourceKind, id: u64, body: &str) -> Result<(), GitHubError> {
            self.bodies.lock().unwrap().insert((kind, id), body.to_string());
            Ok(())
        }
    }

    fn git_on(branch: &'static str, times: usize) -> MockGitInspector {
        let mut git = MockGitInspector::new();
        git.expect_current_branch()
            .times(times)
            .returning(move || Ok(branch.to_string()));
        git.expect_main_branch().returning(|| Ok("main".to_string()));
        git.expect_has_uncommitted_changes().returning(|| Ok(false));
        git.expect_is_tracking().returning(|_| Ok(true));
        git.expect_is_pushed().returning(|_| Ok(true));
        git.expect_head_commit()
            .returning(|| Ok(Some("5e1f0c2a9d8b7e6f5a4b3c2d1e0f9a8b7c6d5e4f".to_string())));
        git
    }

    fn detector(git: MockGitInspector, github: FakeGitHub, settings: DetectorSettings) -> (StateDetector, MemorySink) {
        let github = Arc::new(github);
        let sink = MemorySink::new();
        let detector = StateDetector::new(
            Arc::new(git),
            github.clone(),
            github,
            Arc::new(Observer::memory(sink.clone())),
            settings,
        );
        (detector, sink)
    }

    #[test]
    fn test_issue_number_from_branch() {
        assert_eq!(issue_number_from_branch("123-fix-login"), Some(123));
        assert_eq!(issue_number_from_branch("42"), Some(42));
        assert_eq!(issue_number_from_branch("7_typo"), Some(7));
        assert_eq!(issue_number_from_branch("fix-123"), None);
        assert_eq!(issue_number_from_branch("123abc"), None);
        assert_eq!(issue_number_from_branch("0-nothing"), None);
    }

    #[tokio::test]
    async fn test_issue_without_marker_uses_phase1_default() {
        let github = FakeGitHub {
            issues: HashMap::from([(12, details(12, None))]),
            ..FakeGitHub::default()
        };
        let (detector, _) = detector(git_on("12-fix-login", 1), github, DetectorSettings::default());

        let current = detector.detect().await.unwrap();
        assert_eq!(current.source(), StateSource::IssueBody(12));
        assert_eq!(current.wiggum(), &WiggumState::initial(Phase::PreRequest));
        assert!(current.git().is_pushed());
    }

    #[tokio::test]
    async fn test_pull_request_state_read_from_body() {
        let stored = WiggumState::new(1, Step::CodeQuality, vec![Step::MonitorWorkflow, Step::MonitorChecks], Phase::PostRequest, None)
            .unwrap();
        let github = FakeGitHub {
            issues: HashMap::from([(12, details(12, None))]),
            pull_request: Some(details(31, Some("12-fix-login"))),
            ..FakeGitHub::default()
        };
        github.bodies.lock().unwrap().insert(
            (ResourceKind::PullRequest, 31),
            state::encode(&stored, "PR description").unwrap(),
        );
        let (detector, _) = detector(git_on("12-fix-login", 1), github, DetectorSettings::default());

        let current = detector.detect().await.unwrap();
        assert_eq!(current.source(), StateSource::PullRequestBody(31));
        assert_eq!(current.wiggum(), &stored);
    }

    #[tokio::test]
    async fn test_corrupted_marker_names_its_origin() {
        let github = FakeGitHub {
            issues: HashMap::from([(12, details(12, None))]),
            ..FakeGitHub::default()
        };
        github.bodies.lock().unwrap().insert(
            (ResourceKind::Issue, 12),
            "<!-- wiggum-state:{\"iteration\":0 -->".to_string(),
        );
        let (detector, _) = detector(git_on("12-fix-login", 1), github, DetectorSettings::default());

        let err = detector.detect().await.unwrap_err();
        assert!(matches!(err, DetectionError::Corruption { origin: StateSource::IssueBody(12), .. }));
    }

    #[tokio::test]
    async fn test_phase2_state_left_in_issue_is_validation_error() {
        let github = FakeGitHub {
            issues: HashMap::from([(12, details(12, None))]),
            ..FakeGitHub::default()
        };
        github.bodies.lock().unwrap().insert(
            (ResourceKind::Issue, 12),
            state::encode(&WiggumState::initial(Phase::PostRequest), "").unwrap(),
        );
        let (detector, _) = detector(git_on("12-fix-login", 1), github, DetectorSettings::default());

        let err = detector.detect().await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("the body of issue #12"));
        assert!(message.contains("RECOVERY STEPS"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_limit_after_max_depth_plus_one_attempts() {
        let settings = DetectorSettings {
            slow_threshold: Duration::from_millis(5),
            max_depth: 3,
        };
        let github = FakeGitHub {
            lookup_delay: Some(Duration::from_millis(10)),
            churn: Some(AtomicU64::new(0)),
            ..FakeGitHub::default()
        };
        // mockall verifies current_branch runs exactly once per attempt
        let (detector, sink) = detector(git_on("12-fix-login", 4), github, settings);

        let err = detector.detect().await.unwrap_err();
        match err {
            DetectionError::RaceLimitExceeded { depth, max_depth, .. } => {
                assert_eq!(depth, 4);
                assert_eq!(max_depth, 3);
            }
            other => panic!("expected race limit, got {other:?}"),
        }
        let races = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, WorkflowEvent::RaceDetected { .. }))
            .count();
        assert_eq!(races, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_but_stable_detection_succeeds() {
        let settings = DetectorSettings {
            slow_threshold: Duration::from_millis(5),
            max_depth: 3,
        };
        let github = FakeGitHub {
            issues: HashMap::from([(12, details(12, None))]),
            lookup_delay: Some(Duration::from_millis(10)),
            ..FakeGitHub::default()
        };
        let (detector, sink) = detector(git_on("12-fix-login", 1), github, settings);

        let current = detector.detect().await.unwrap();
        assert_eq!(current.identity(), ResourceIdentity::Issue(12));
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, WorkflowEvent::SlowDetection { .. })));
    }

    #[tokio::test]
    async fn test_depth_validated_before_use() {
        let (detector, _) = detector(git_on("12-fix-login", 0), FakeGitHub::default(), DetectorSettings::default());

        assert!(matches!(
            detector.detect_from_depth(4).await,
            Err(DetectionError::InvalidDepth { depth: 4, max_depth: 3 })
        ));
        assert!(matches!(
            detector.detect_from_depth(u64::MAX).await,
            Err(DetectionError::InvalidDepth { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_starting_depth_reduces_attempts() {
        let settings = DetectorSettings {
            slow_threshold: Duration::from_millis(5),
            max_depth: 3,
        };
        let github = FakeGitHub {
            lookup_delay: Some(Duration::from_millis(10)),
            churn: Some(AtomicU64::new(0)),
            ..FakeGitHub::default()
        };
        let (detector, _) = detector(git_on("12-fix-login", 2), github, settings);

        assert!(matches!(
            detector.detect_from_depth(2).await,
            Err(DetectionError::RaceLimitExceeded { depth: 4, .. })
        ));
    }
}
