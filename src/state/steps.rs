// Step machine: a fixed total order of steps and pure transitions over it

use super::types::{truncate_summary, Phase, Step, ValidationError, WiggumState};

/// Global step order. Phase 1 steps come first, then phase 2.
pub const STEP_ORDER: [Step; 10] = [
    Step::PreMonitorWorkflow,
    Step::PreCodeReview,
    Step::PreSecurityReview,
    Step::CreatePullRequest,
    Step::MonitorWorkflow,
    Step::MonitorChecks,
    Step::CodeQuality,
    Step::PullRequestReview,
    Step::SecurityReview,
    Step::Approval,
];

/// Next step in the global order, or `None` after the terminal step
pub fn next_step(step: Step) -> Option<Step> {
    STEP_ORDER.get(step.ordinal() + 1).copied()
}

/// Like [`next_step`], but starting from a raw step identifier
pub fn next_step_id(id: &str) -> Result<Option<Step>, ValidationError> {
    Step::parse(id).map(next_step)
}

/// Steps belonging to a phase, in order
pub fn steps_in_phase(phase: Phase) -> impl Iterator<Item = Step> {
    STEP_ORDER.into_iter().filter(move |step| step.phase() == phase)
}

/// Advance to the next step.
///
/// The current step is appended to the completed steps; iteration, phase and
/// max iterations carry over; the per-iteration failure summary is cleared.
pub fn advance(state: &WiggumState) -> Result<WiggumState, ValidationError> {
    let current = state.step();
    let next = next_step(current).ok_or(ValidationError::TerminalStep { step: current })?;

    if next.phase() != state.phase() {
        return Err(ValidationError::PhaseBoundary {
            from: current,
            to: next,
            to_phase: next.phase(),
        });
    }

    WiggumState::from_parts(
        state.iteration(),
        next,
        dedup_append(state.completed_steps(), current),
        state.phase(),
        state.max_iterations(),
        None,
    )
}

/// Start a new iteration after a failed check.
///
/// The iteration counter is incremented, the failure summary recorded, and the
/// position rewinds to the first step of the current phase so every check
/// runs again against the fixed code. Completed steps from earlier phases
/// are kept.
pub fn restart_iteration(state: &WiggumState, failure: &str) -> Result<WiggumState, ValidationError> {
    let phase = state.phase();
    let first = steps_in_phase(phase)
        .next()
        .ok_or(ValidationError::InvalidParameter {
            name: "phase",
            reason: format!("{phase} has no steps"),
        })?;
    let iteration = state
        .iteration()
        .checked_add(1)
        .ok_or_else(|| ValidationError::InvalidState {
            summary: state.summary(),
            reason: "iteration counter overflow".to_string(),
        })?;
    let kept: Vec<Step> = state
        .completed_steps()
        .iter()
        .copied()
        .filter(|step| step.precedes(first))
        .collect();

    WiggumState::from_parts(
        iteration,
        first,
        kept,
        phase,
        state.max_iterations(),
        Some(truncate_summary(failure)),
    )
}

fn dedup_append(steps: &[Step], step: Step) -> Vec<Step> {
    let mut result = steps.to_vec();
    if !result.contains(&step) {
        result.push(step);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_at(step: Step) -> WiggumState {
        let completed: Vec<Step> = steps_in_phase(step.phase())
            .take_while(|s| *s != step)
            .collect();
        WiggumState::new(1, step, completed, step.phase(), Some(10)).unwrap()
    }

    #[test]
    fn test_step_order_matches_ordinals() {
        for (index, step) in STEP_ORDER.iter().enumerate() {
            assert_eq!(step.ordinal(), index, "{step} is out of place");
        }
    }

    #[test]
    fn test_next_step_is_total_and_distinct() {
        for step in STEP_ORDER.iter().take(STEP_ORDER.len() - 1) {
            let next = next_step(*step).expect("non-terminal step has a successor");
            assert_ne!(next, *step);
            assert!(step.precedes(next));
        }
        assert_eq!(next_step(Step::Approval), None);
    }

    #[test]
    fn test_next_step_id_rejects_unknown_step() {
        assert_eq!(next_step_id("p1-1").unwrap(), Some(Step::PreCodeReview));
        let err = next_step_id("p3-1").unwrap_err();
        assert!(err.to_string().contains("p3-1"));
    }

    #[test]
    fn test_advance_moves_forward_and_records_completion() {
        let state = state_at(Step::PreCodeReview);
        let next = advance(&state).unwrap();

        assert_eq!(next.step(), Step::PreSecurityReview);
        assert_eq!(next.completed_steps(), &[Step::PreMonitorWorkflow, Step::PreCodeReview]);
        assert_eq!(next.iteration(), state.iteration());
        assert_eq!(next.phase(), state.phase());
        assert_eq!(next.max_iterations(), state.max_iterations());
        // argument untouched
        assert_eq!(state.step(), Step::PreCodeReview);
    }

    #[test]
    fn test_advance_never_completes_the_new_step() {
        for step in STEP_ORDER {
            let state = state_at(step);
            if let Ok(next) = advance(&state) {
                assert!(!next.completed_steps().contains(&next.step()));
            }
        }
    }

    #[test]
    fn test_advance_clears_failure_summary() {
        let failed = restart_iteration(&state_at(Step::PreSecurityReview), "lint failed").unwrap();
        assert_eq!(failed.last_failure(), Some("lint failed"));
        let next = advance(&failed).unwrap();
        assert_eq!(next.last_failure(), None);
    }

    #[test]
    fn test_advance_from_terminal_step_fails() {
        let err = advance(&state_at(Step::Approval)).unwrap_err();
        assert_eq!(err, ValidationError::TerminalStep { step: Step::Approval });
    }

    #[test]
    fn test_advance_refuses_to_cross_phase_boundary() {
        let err = advance(&state_at(Step::CreatePullRequest)).unwrap_err();
        assert!(matches!(err, ValidationError::PhaseBoundary { to: Step::MonitorWorkflow, .. }));
    }

    #[test]
    fn test_restart_iteration_rewinds_to_phase_start() {
        let state = state_at(Step::PullRequestReview);
        let restarted = restart_iteration(&state, "2 blocking review findings").unwrap();

        assert_eq!(restarted.iteration(), state.iteration() + 1);
        assert_eq!(restarted.step(), Step::MonitorWorkflow);
        assert!(restarted.completed_steps().is_empty());
        assert_eq!(restarted.last_failure(), Some("2 blocking review findings"));
    }

    #[test]
    fn test_steps_in_phase_partition() {
        let pre: Vec<Step> = steps_in_phase(Phase::PreRequest).collect();
        let post: Vec<Step> = steps_in_phase(Phase::PostRequest).collect();
        assert_eq!(pre.len() + post.len(), STEP_ORDER.len());
        assert_eq!(pre.last(), Some(&Step::CreatePullRequest));
        assert_eq!(post.last(), Some(&Step::Approval));
    }
}
