// Core types for the persisted workflow position

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Longest failure summary kept in the persisted state. Longer summaries are
/// truncated when recorded so the issue/PR body stays readable.
pub const MAX_FAILURE_SUMMARY_CHARS: usize = 2000;

/// The two ordered sub-sequences of the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Before the pull request exists; state lives in the issue body
    #[serde(rename = "phase1")]
    PreRequest,
    /// After the pull request exists; state lives in the PR body
    #[serde(rename = "phase2")]
    PostRequest,
}

impl Phase {
    pub fn id(self) -> &'static str {
        match self {
            Phase::PreRequest => "phase1",
            Phase::PostRequest => "phase2",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Workflow steps. Declaration order is the global step order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    #[serde(rename = "p1-1")]
    PreMonitorWorkflow,
    #[serde(rename = "p1-2")]
    PreCodeReview,
    #[serde(rename = "p1-3")]
    PreSecurityReview,
    #[serde(rename = "p1-4")]
    CreatePullRequest,
    #[serde(rename = "p2-1")]
    MonitorWorkflow,
    #[serde(rename = "p2-2")]
    MonitorChecks,
    #[serde(rename = "p2-3")]
    CodeQuality,
    #[serde(rename = "p2-4")]
    PullRequestReview,
    #[serde(rename = "p2-5")]
    SecurityReview,
    #[serde(rename = "approval")]
    Approval,
}

impl Step {
    /// Position in the global order
    pub fn ordinal(self) -> usize {
        match self {
            Step::PreMonitorWorkflow => 0,
            Step::PreCodeReview => 1,
            Step::PreSecurityReview => 2,
            Step::CreatePullRequest => 3,
            Step::MonitorWorkflow => 4,
            Step::MonitorChecks => 5,
            Step::CodeQuality => 6,
            Step::PullRequestReview => 7,
            Step::SecurityReview => 8,
            Step::Approval => 9,
        }
    }

    /// Stable identifier used in the persisted state and the CLI
    pub fn id(self) -> &'static str {
        match self {
            Step::PreMonitorWorkflow => "p1-1",
            Step::PreCodeReview => "p1-2",
            Step::PreSecurityReview => "p1-3",
            Step::CreatePullRequest => "p1-4",
            Step::MonitorWorkflow => "p2-1",
            Step::MonitorChecks => "p2-2",
            Step::CodeQuality => "p2-3",
            Step::PullRequestReview => "p2-4",
            Step::SecurityReview => "p2-5",
            Step::Approval => "approval",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Step::PreMonitorWorkflow => "Monitor branch workflow",
            Step::PreCodeReview => "Code review",
            Step::PreSecurityReview => "Security review",
            Step::CreatePullRequest => "Create pull request",
            Step::MonitorWorkflow => "Monitor workflow after PR",
            Step::MonitorChecks => "Monitor PR checks",
            Step::CodeQuality => "Address code quality comments",
            Step::PullRequestReview => "PR review",
            Step::SecurityReview => "PR security review",
            Step::Approval => "Approval",
        }
    }

    pub fn phase(self) -> Phase {
        if self.ordinal() <= Step::CreatePullRequest.ordinal() {
            Phase::PreRequest
        } else {
            Phase::PostRequest
        }
    }

    /// Whether `self` comes strictly before `other` in the global order
    pub fn precedes(self, other: Step) -> bool {
        self.ordinal() < other.ordinal()
    }

    /// Parse a step identifier, naming the invalid value on failure
    pub fn parse(id: &str) -> Result<Step, ValidationError> {
        crate::state::steps::STEP_ORDER
            .iter()
            .copied()
            .find(|step| step.id() == id)
            .ok_or_else(|| ValidationError::InvalidStep {
                value: id.to_string(),
                valid: crate::state::steps::STEP_ORDER
                    .iter()
                    .map(|step| step.id())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Step {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Step::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid step '{value}'. Valid steps: {valid}")]
    InvalidStep { value: String, valid: String },

    #[error("Completed step {completed} does not precede current step {current}")]
    CompletedStepOutOfOrder { completed: Step, current: Step },

    #[error("Completed steps must be unique and in workflow order (found {step} out of sequence)")]
    CompletedStepsNotOrdered { step: Step },

    #[error("Step {step} belongs to {expected}, but state phase is {phase}")]
    PhaseMismatch { step: Step, phase: Phase, expected: Phase },

    #[error("maxIterations must be a positive integer, got {value}")]
    InvalidMaxIterations { value: u32 },

    #[error("Failure summary is {length} characters; the limit is {limit}")]
    FailureSummaryTooLong { length: usize, limit: usize },

    #[error("Step {step} is the final step; there is no next step")]
    TerminalStep { step: Step },

    #[error("Advancing from {from} to {to} would cross into {to_phase}; phase 2 starts once the pull request exists")]
    PhaseBoundary { from: Step, to: Step, to_phase: Phase },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Invalid workflow state ({summary}): {reason}")]
    InvalidState { summary: String, reason: String },

    #[error("Reported step {reported} is not the active step {active}")]
    StepMismatch { reported: Step, active: Step },

    #[error("Step {step} is not completed by the caller; run `wiggum next` instead")]
    NotCallerCompleted { step: Step },

    #[error("Branch '{branch}' is reported as pushed but has no remote tracking branch")]
    PushedWithoutTracking { branch: String },
}

/// Serialized shape of [`WiggumState`]. Only these keys are accepted.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawWiggumState {
    iteration: u32,
    step: Step,
    completed_steps: Vec<Step>,
    phase: Phase,
    #[serde(default)]
    max_iterations: Option<u32>,
    #[serde(default)]
    last_failure: Option<String>,
}

/// The persisted workflow position.
///
/// Every value of this type satisfies the state invariants: completed steps
/// are unique, in order, and all precede `step`; `step` belongs to `phase`.
/// Deserialization goes through the same checks as [`WiggumState::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawWiggumState")]
pub struct WiggumState {
    iteration: u32,
    step: Step,
    completed_steps: Vec<Step>,
    phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_iterations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_failure: Option<String>,
}

impl TryFrom<RawWiggumState> for WiggumState {
    type Error = ValidationError;

    fn try_from(raw: RawWiggumState) -> Result<Self, Self::Error> {
        let state = WiggumState {
            iteration: raw.iteration,
            step: raw.step,
            completed_steps: raw.completed_steps,
            phase: raw.phase,
            max_iterations: raw.max_iterations,
            last_failure: raw.last_failure,
        };
        state.check_invariants()?;
        Ok(state)
    }
}

impl WiggumState {
    pub fn new(
        iteration: u32,
        step: Step,
        completed_steps: Vec<Step>,
        phase: Phase,
        max_iterations: Option<u32>,
    ) -> Result<Self, ValidationError> {
        let state = WiggumState {
            iteration,
            step,
            completed_steps,
            phase,
            max_iterations,
            last_failure: None,
        };
        state.check_invariants()?;
        Ok(state)
    }

    /// Default state used when no persisted marker exists for a phase
    pub fn initial(phase: Phase) -> Self {
        let step = match phase {
            Phase::PreRequest => Step::PreMonitorWorkflow,
            Phase::PostRequest => Step::MonitorWorkflow,
        };
        WiggumState {
            iteration: 0,
            step,
            completed_steps: Vec::new(),
            phase,
            max_iterations: None,
            last_failure: None,
        }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn completed_steps(&self) -> &[Step] {
        &self.completed_steps
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn max_iterations(&self) -> Option<u32> {
        self.max_iterations
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    pub fn with_max_iterations(&self, max_iterations: Option<u32>) -> Result<Self, ValidationError> {
        let mut next = self.clone();
        next.max_iterations = max_iterations;
        next.check_invariants()?;
        Ok(next)
    }

    /// Re-run every invariant check. Values built through this module always
    /// pass; callers persisting a state use this as a final guard.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.check_invariants()
            .map_err(|e| ValidationError::InvalidState {
                summary: self.summary(),
                reason: e.to_string(),
            })
    }

    /// One-line description used in logs and error messages
    pub fn summary(&self) -> String {
        let completed = self
            .completed_steps
            .iter()
            .map(|s| s.id())
            .collect::<Vec<_>>()
            .join(", ");
        let mut summary = format!(
            "iteration {}, step {} ({}), {}, completed [{}]",
            self.iteration,
            self.step.id(),
            self.step.name(),
            self.phase,
            completed
        );
        if let Some(max) = self.max_iterations {
            summary.push_str(&format!(", max iterations {max}"));
        }
        summary
    }

    fn check_invariants(&self) -> Result<(), ValidationError> {
        if self.step.phase() != self.phase {
            return Err(ValidationError::PhaseMismatch {
                step: self.step,
                phase: self.phase,
                expected: self.step.phase(),
            });
        }

        let mut previous: Option<Step> = None;
        for completed in &self.completed_steps {
            if !completed.precedes(self.step) {
                return Err(ValidationError::CompletedStepOutOfOrder {
                    completed: *completed,
                    current: self.step,
                });
            }
            if let Some(prev) = previous {
                if !prev.precedes(*completed) {
                    return Err(ValidationError::CompletedStepsNotOrdered { step: *completed });
                }
            }
            previous = Some(*completed);
        }

        if let Some(0) = self.max_iterations {
            return Err(ValidationError::InvalidMaxIterations { value: 0 });
        }

        if let Some(failure) = &self.last_failure {
            let length = failure.chars().count();
            if length > MAX_FAILURE_SUMMARY_CHARS {
                return Err(ValidationError::FailureSummaryTooLong {
                    length,
                    limit: MAX_FAILURE_SUMMARY_CHARS,
                });
            }
        }

        Ok(())
    }

    // Field-level constructor for the step machine; the caller re-checks invariants.
    pub(crate) fn from_parts(
        iteration: u32,
        step: Step,
        completed_steps: Vec<Step>,
        phase: Phase,
        max_iterations: Option<u32>,
        last_failure: Option<String>,
    ) -> Result<Self, ValidationError> {
        let state = WiggumState {
            iteration,
            step,
            completed_steps,
            phase,
            max_iterations,
            last_failure,
        };
        state.check_invariants()?;
        Ok(state)
    }
}

/// Truncate a failure summary to the persisted limit on a char boundary
pub fn truncate_summary(summary: &str) -> String {
    if summary.chars().count() <= MAX_FAILURE_SUMMARY_CHARS {
        return summary.to_string();
    }
    let mut truncated: String = summary.chars().take(MAX_FAILURE_SUMMARY_CHARS - 1).collect();
    truncated.push('…');
    truncated
}
