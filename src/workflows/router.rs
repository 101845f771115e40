// Workflow router: dispatches the active step and persists transitions

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::detector::DetectionError;
use super::instructions::{self, InstructionContext};
use super::types::CurrentState;
use crate::config::WiggumConfig;
use crate::external::{MonitorTarget, WorkflowMonitor};
use crate::github::{persist_state, ResilientUpdater, ResourceKind, StateUpdateResult, TextResourceClient, UpdateError};
use crate::github::retry::DEFAULT_MAX_RETRIES;
use crate::observer::{Observer, WorkflowEvent};
use crate::state::{self, Phase, Step, ValidationError, WiggumState};

/// How the router handles a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Wait for the workflow run on the current branch
    MonitorBranchWorkflow,
    /// Wait for the checks on the open pull request
    MonitorPullRequestChecks,
    /// The controller does the work and reports back with `complete`
    Review,
    /// The controller opens the pull request; detection picks it up
    OpenPullRequest,
    /// Terminal; a human takes over
    AwaitApproval,
}

#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub phase: Phase,
    pub step: Step,
    pub action: StepAction,
}

pub const ROUTES: [Route; 10] = [
    Route { phase: Phase::PreRequest, step: Step::PreMonitorWorkflow, action: StepAction::MonitorBranchWorkflow },
    Route { phase: Phase::PreRequest, step: Step::PreCodeReview, action: StepAction::Review },
    Route { phase: Phase::PreRequest, step: Step::PreSecurityReview, action: StepAction::Review },
    Route { phase: Phase::PreRequest, step: Step::CreatePullRequest, action: StepAction::OpenPullRequest },
    Route { phase: Phase::PostRequest, step: Step::MonitorWorkflow, action: StepAction::MonitorBranchWorkflow },
    Route { phase: Phase::PostRequest, step: Step::MonitorChecks, action: StepAction::MonitorPullRequestChecks },
    Route { phase: Phase::PostRequest, step: Step::CodeQuality, action: StepAction::Review },
    Route { phase: Phase::PostRequest, step: Step::PullRequestReview, action: StepAction::Review },
    Route { phase: Phase::PostRequest, step: Step::SecurityReview, action: StepAction::Review },
    Route { phase: Phase::PostRequest, step: Step::Approval, action: StepAction::AwaitApproval },
];

/// Route for `(phase, step)`, found by scanning the step order
pub fn route_for(phase: Phase, step: Step) -> Result<&'static Route, RouterError> {
    ROUTES
        .iter()
        .find(|route| route.phase == phase && route.step == step)
        .ok_or_else(|| RouterError::Internal(format!("no route for step {step} in {phase}")))
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("internal router error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    OnMainBranch,
    NoTrackedResource,
    IterationLimitReached,
    PersistFailed,
    MonitorUnavailable,
    StateCorrupted,
    InvalidState,
    RaceLimitExceeded,
    DetectionFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ErrorCode::OnMainBranch => "ON_MAIN_BRANCH",
            ErrorCode::NoTrackedResource => "NO_TRACKED_RESOURCE",
            ErrorCode::IterationLimitReached => "ITERATION_LIMIT_REACHED",
            ErrorCode::PersistFailed => "PERSIST_FAILED",
            ErrorCode::MonitorUnavailable => "MONITOR_UNAVAILABLE",
            ErrorCode::StateCorrupted => "STATE_CORRUPTED",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::RaceLimitExceeded => "RACE_LIMIT_EXCEEDED",
            ErrorCode::DetectionFailed => "DETECTION_FAILED",
        };
        f.write_str(code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ResourceKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseMetadata {
    pub step: Step,
    pub step_name: &'static str,
    pub phase: Phase,
    pub iteration: u32,
    pub max_iterations: u32,
    pub steps_completed_by_engine: Vec<Step>,
    pub resource: ResourceContext,
}

/// Result handed back to the controlling agent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success {
        instructions: String,
        metadata: ResponseMetadata,
    },
    Error {
        code: ErrorCode,
        error: String,
        instructions: String,
        /// Absent when the failure happened before a state was detected
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<ResponseMetadata>,
    },
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Error { .. })
    }

    pub fn instructions(&self) -> &str {
        match self {
            ToolResult::Success { instructions, .. } | ToolResult::Error { instructions, .. } => instructions,
        }
    }

    pub fn metadata(&self) -> Option<&ResponseMetadata> {
        match self {
            ToolResult::Success { metadata, .. } => Some(metadata),
            ToolResult::Error { metadata, .. } => metadata.as_ref(),
        }
    }
}

impl From<&DetectionError> for ToolResult {
    /// Detection halts carry no metadata: there is no trustworthy position to report
    fn from(error: &DetectionError) -> Self {
        let (code, instructions) = match error {
            DetectionError::Corruption { origin, .. } => (
                ErrorCode::StateCorrupted,
                instructions::corrupted_state_instructions(&origin.to_string()),
            ),
            DetectionError::Validation { origin, .. } => (
                ErrorCode::InvalidState,
                instructions::invalid_state_instructions(&origin.to_string()),
            ),
            DetectionError::RaceLimitExceeded { .. } => {
                (ErrorCode::RaceLimitExceeded, instructions::race_limit_instructions())
            }
            DetectionError::Git(_) | DetectionError::GitHub(_) | DetectionError::InvalidDepth { .. } => {
                (ErrorCode::DetectionFailed, instructions::detection_failed_instructions())
            }
        };
        ToolResult::Error {
            code,
            error: error.to_string(),
            instructions,
            metadata: None,
        }
    }
}

/// Result of a manual step, reported by the controller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub blocking_findings: u32,
    pub summary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub max_retries: u32,
    pub default_max_iterations: u32,
    pub workflow_timeout: Duration,
    pub checks_timeout: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            default_max_iterations: 10,
            workflow_timeout: Duration::from_secs(30 * 60),
            checks_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl From<&WiggumConfig> for RouterSettings {
    fn from(config: &WiggumConfig) -> Self {
        Self {
            max_retries: config.retry.max_retries,
            default_max_iterations: config.workflow.default_max_iterations,
            workflow_timeout: Duration::from_secs(config.monitor.workflow_timeout_secs),
            checks_timeout: Duration::from_secs(config.monitor.checks_timeout_secs),
        }
    }
}

enum Persisted {
    Saved,
    Failed(ToolResult),
}

pub struct Router {
    resources: Arc<dyn TextResourceClient>,
    monitor: Arc<dyn WorkflowMonitor>,
    updater: ResilientUpdater,
    observer: Arc<Observer>,
    settings: RouterSettings,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Router {
    pub fn new(
        resources: Arc<dyn TextResourceClient>,
        monitor: Arc<dyn WorkflowMonitor>,
        observer: Arc<Observer>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            resources,
            monitor,
            updater: ResilientUpdater::new(Arc::clone(&observer)),
            observer,
            settings,
        }
    }

    /// Work out what the controller should do next, running and recording
    /// any automated steps on the way.
    pub async fn get_next_step_instructions(&self, current: &CurrentState) -> Result<ToolResult, RouterError> {
        if let Some(blocked) = self.precondition_failure(current, current.wiggum()) {
            return Ok(blocked);
        }
        self.drive(current, current.wiggum().clone(), Vec::new()).await
    }

    /// Record the controller's result for the active manual step.
    ///
    /// Zero blocking findings advances and continues; anything else restarts
    /// the iteration and returns fix instructions.
    pub async fn complete_step(
        &self,
        current: &CurrentState,
        step: Step,
        outcome: StepOutcome,
    ) -> Result<ToolResult, RouterError> {
        let state = current.wiggum();
        if step != state.step() {
            return Err(ValidationError::StepMismatch {
                reported: step,
                active: state.step(),
            }
            .into());
        }
        if route_for(state.phase(), step)?.action != StepAction::Review {
            return Err(ValidationError::NotCallerCompleted { step }.into());
        }
        if let Some(blocked) = self.precondition_failure(current, state) {
            return Ok(blocked);
        }

        if outcome.blocking_findings == 0 {
            let next = state::advance(state)?;
            if let Persisted::Failed(result) = self.persist(current, state, &next, &[]).await? {
                return Ok(result);
            }
            self.observer.emit(WorkflowEvent::StepAdvanced {
                from: step,
                to: next.step(),
                iteration: next.iteration(),
            });
            return self.drive(current, next, Vec::new()).await;
        }

        let failure = match outcome.summary.as_deref() {
            Some(summary) => format!("{}: {summary}", findings_label(step, outcome.blocking_findings)),
            None => findings_label(step, outcome.blocking_findings),
        };
        let next = state::restart_iteration(state, &failure)?;
        if let Persisted::Failed(result) = self.persist(current, state, &next, &[]).await? {
            return Ok(result);
        }
        self.observer.emit(WorkflowEvent::StepFailed {
            step,
            iteration: state.iteration(),
            summary: failure,
        });
        Ok(ToolResult::Success {
            instructions: instructions::review_failure_instructions(
                step,
                &next,
                outcome.blocking_findings,
                outcome.summary.as_deref(),
            ),
            metadata: self.metadata(current, &next, &[]),
        })
    }

    /// Chain automated steps until one fails or a step needs the controller
    async fn drive(
        &self,
        current: &CurrentState,
        mut state: WiggumState,
        mut completed_by_engine: Vec<Step>,
    ) -> Result<ToolResult, RouterError> {
        let ctx = instruction_context(current);
        loop {
            let step = state.step();
            let route = route_for(state.phase(), step)?;
            let target = match route.action {
                StepAction::MonitorBranchWorkflow => MonitorTarget::BranchWorkflow {
                    branch: current.git().branch().to_string(),
                    commit: current.git().head_commit().map(str::to_string),
                },
                StepAction::MonitorPullRequestChecks => {
                    let number = current.pull_request().number().ok_or_else(|| {
                        RouterError::Internal(format!("{step} requires an open pull request"))
                    })?;
                    MonitorTarget::PullRequestChecks { number }
                }
                StepAction::Review | StepAction::OpenPullRequest | StepAction::AwaitApproval => {
                    return Ok(ToolResult::Success {
                        instructions: instructions::step_instructions(&state, &ctx),
                        metadata: self.metadata(current, &state, &completed_by_engine),
                    });
                }
            };

            let git = current.git();
            if git.has_uncommitted_changes() {
                return Ok(ToolResult::Success {
                    instructions: instructions::commit_instructions(git.branch()),
                    metadata: self.metadata(current, &state, &completed_by_engine),
                });
            }
            if !git.is_pushed() {
                return Ok(ToolResult::Success {
                    instructions: instructions::push_instructions(git.branch(), git.is_remote_tracking()),
                    metadata: self.metadata(current, &state, &completed_by_engine),
                });
            }

            let timeout = match target {
                MonitorTarget::BranchWorkflow { .. } => self.settings.workflow_timeout,
                MonitorTarget::PullRequestChecks { .. } => self.settings.checks_timeout,
            };
            self.observer.emit(WorkflowEvent::MonitorStarted {
                step,
                target: target.to_string(),
            });
            let outcome = match self.monitor.run(&target, timeout).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let error = e.to_string();
                    return Ok(ToolResult::Error {
                        code: ErrorCode::MonitorUnavailable,
                        instructions: instructions::monitor_unavailable_instructions(&error),
                        error,
                        metadata: Some(self.metadata(current, &state, &completed_by_engine)),
                    });
                }
            };

            if outcome.success {
                let next = state::advance(&state)?;
                if let Persisted::Failed(result) = self.persist(current, &state, &next, &completed_by_engine).await? {
                    return Ok(result);
                }
                self.observer.emit(WorkflowEvent::StepAdvanced {
                    from: step,
                    to: next.step(),
                    iteration: next.iteration(),
                });
                completed_by_engine.push(step);
                state = next;
                continue;
            }

            let summary = outcome
                .error_summary
                .clone()
                .unwrap_or_else(|| format!("{target} failed"));
            let next = state::restart_iteration(&state, &summary)?;
            if let Persisted::Failed(result) = self.persist(current, &state, &next, &completed_by_engine).await? {
                return Ok(result);
            }
            self.observer.emit(WorkflowEvent::StepFailed {
                step,
                iteration: state.iteration(),
                summary: summary.clone(),
            });
            return Ok(ToolResult::Success {
                instructions: instructions::monitor_failure_instructions(
                    step,
                    &next,
                    &summary,
                    outcome.failure_details.as_deref(),
                ),
                metadata: self.metadata(current, &next, &completed_by_engine),
            });
        }
    }

    /// Checks that stop the workflow before any step is dispatched
    fn precondition_failure(&self, current: &CurrentState, state: &WiggumState) -> Option<ToolResult> {
        let git = current.git();
        if git.is_main_branch() {
            return Some(ToolResult::Error {
                code: ErrorCode::OnMainBranch,
                error: format!("branch '{}' is the main branch", git.branch()),
                instructions: instructions::main_branch_instructions(git.branch()),
                metadata: Some(self.metadata(current, state, &[])),
            });
        }
        if current.identity().target().is_none() {
            return Some(ToolResult::Error {
                code: ErrorCode::NoTrackedResource,
                error: format!("no open issue or pull request for branch '{}'", git.branch()),
                instructions: instructions::no_resource_instructions(git.branch()),
                metadata: Some(self.metadata(current, state, &[])),
            });
        }
        let max = self.max_iterations(state);
        if state.iteration() >= max {
            return Some(ToolResult::Error {
                code: ErrorCode::IterationLimitReached,
                error: format!("iteration {} reached the limit of {max}", state.iteration()),
                instructions: instructions::iteration_limit_instructions(
                    state.iteration(),
                    max,
                    state.last_failure(),
                ),
                metadata: Some(self.metadata(current, state, &[])),
            });
        }
        None
    }

    async fn persist(
        &self,
        current: &CurrentState,
        last_saved: &WiggumState,
        next: &WiggumState,
        completed_by_engine: &[Step],
    ) -> Result<Persisted, RouterError> {
        let (kind, id) = current
            .identity()
            .target()
            .ok_or_else(|| RouterError::Internal("no tracked resource to persist state to".to_string()))?;

        let resources = Arc::clone(&self.resources);
        let write = move |id: u64, state: WiggumState| {
            let resources = Arc::clone(&resources);
            async move { persist_state(resources.as_ref(), kind, id, &state).await }
        };

        match self
            .updater
            .update(kind, id, next, write, self.settings.max_retries)
            .await?
        {
            StateUpdateResult::Success { .. } => Ok(Persisted::Saved),
            StateUpdateResult::Failure {
                reason,
                last_error,
                attempt_count,
            } => Ok(Persisted::Failed(ToolResult::Error {
                code: ErrorCode::PersistFailed,
                error: format!("could not save state to {kind} #{id}: {last_error}"),
                instructions: instructions::persist_failure_instructions(
                    &reason.to_string(),
                    &last_error,
                    attempt_count,
                ),
                // position is the last state that reached the resource, not `next`
                metadata: Some(self.metadata(current, last_saved, completed_by_engine)),
            })),
        }
    }

    fn max_iterations(&self, state: &WiggumState) -> u32 {
        state
            .max_iterations()
            .unwrap_or(self.settings.default_max_iterations)
    }

    fn metadata(&self, current: &CurrentState, state: &WiggumState, completed_by_engine: &[Step]) -> ResponseMetadata {
        let identity = current.identity();
        let details = match identity.target() {
            Some((ResourceKind::PullRequest, _)) => current.pull_request().details(),
            Some((ResourceKind::Issue, _)) => current.issue().details(),
            None => None,
        };
        ResponseMetadata {
            step: state.step(),
            step_name: state.step().name(),
            phase: state.phase(),
            iteration: state.iteration(),
            max_iterations: self.max_iterations(state),
            steps_completed_by_engine: completed_by_engine.to_vec(),
            resource: ResourceContext {
                kind: identity.target().map(|(kind, _)| kind),
                number: identity.target().map(|(_, number)| number),
                url: details.and_then(|d| d.url.clone()),
                branch: current.git().branch().to_string(),
            },
        }
    }
}

fn findings_label(step: Step, findings: u32) -> String {
    format!(
        "{} reported {findings} blocking finding{}",
        step.name(),
        if findings == 1 { "" } else { "s" }
    )
}

fn instruction_context(current: &CurrentState) -> InstructionContext {
    InstructionContext {
        branch: current.git().branch().to_string(),
        issue_number: current.issue().number(),
        pr_number: current.pull_request().number(),
        pr_url: current.pull_request().details().and_then(|d| d.url.clone()),
    }
}
