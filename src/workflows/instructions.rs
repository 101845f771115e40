//! Instruction text handed to the controlling agent
//!
//! The router decides which step is active; these functions only render what
//! the agent should do about it.

use crate::state::{Step, WiggumState};

/// Facts about the tracked work that instruction text refers to
#[derive(Debug, Clone, Default)]
pub struct InstructionContext {
    pub branch: String,
    pub issue_number: Option<u64>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
}

impl InstructionContext {
    fn pr_label(&self) -> String {
        match (self.pr_number, &self.pr_url) {
            (Some(number), Some(url)) => format!("PR #{number} ({url})"),
            (Some(number), None) => format!("PR #{number}"),
            _ => "the pull request".to_string(),
        }
    }

    fn issue_label(&self) -> String {
        self.issue_number
            .map(|n| format!("issue #{n}"))
            .unwrap_or_else(|| "the issue".to_string())
    }
}

fn complete_hint(step: Step) -> String {
    format!(
        "When finished, report the result:\n  wiggum complete {} --blocking-findings <N> [--summary \"...\"]\n\
         Use --blocking-findings 0 when nothing needs fixing.",
        step.id()
    )
}

/// What to do for the active step
pub fn step_instructions(state: &WiggumState, ctx: &InstructionContext) -> String {
    let step = state.step();
    let mut text = format!(
        "Step {} ({}), iteration {}.\n\n",
        step.id(),
        step.name(),
        state.iteration()
    );

    if let Some(failure) = state.last_failure() {
        text.push_str(&format!("Previous attempt failed: {failure}\n\n"));
    }

    let body = match step {
        Step::PreMonitorWorkflow | Step::MonitorWorkflow => format!(
            "Run `wiggum next` to wait for the workflow run on branch '{}'.",
            ctx.branch
        ),
        Step::MonitorChecks => format!("Run `wiggum next` to wait for the checks on {}.", ctx.pr_label()),
        Step::PreCodeReview => format!(
            "Review the changes on branch '{}' against the default branch for correctness, \
             readability and test coverage. Fix anything you find, commit and push.\n\n{}",
            ctx.branch,
            complete_hint(step)
        ),
        Step::PreSecurityReview => format!(
            "Review the changes on branch '{}' for security issues: input validation, \
             secrets in code, injection, unsafe file or process handling. Fix what you find, \
             commit and push.\n\n{}",
            ctx.branch,
            complete_hint(step)
        ),
        Step::CreatePullRequest => format!(
            "Open a pull request for branch '{}' that references {}:\n  \
             gh pr create --fill --body \"Closes #{}\"\n\n\
             Then run `wiggum next`; the workflow continues on the pull request.",
            ctx.branch,
            ctx.issue_label(),
            ctx.issue_number.map(|n| n.to_string()).unwrap_or_else(|| "<issue>".to_string())
        ),
        Step::CodeQuality => format!(
            "Read the automated code-quality comments on {}:\n  gh pr view {} --comments\n\
             Address each valid comment, commit and push.\n\n{}",
            ctx.pr_label(),
            ctx.pr_number.map(|n| n.to_string()).unwrap_or_default(),
            complete_hint(step)
        ),
        Step::PullRequestReview => format!(
            "Review the full diff of {}:\n  gh pr diff {}\nFix blocking findings, commit and push.\n\n{}",
            ctx.pr_label(),
            ctx.pr_number.map(|n| n.to_string()).unwrap_or_default(),
            complete_hint(step)
        ),
        Step::SecurityReview => format!(
            "Do a security review of the full diff of {}. Fix blocking findings, commit and push.\n\n{}",
            ctx.pr_label(),
            complete_hint(step)
        ),
        Step::Approval => format!(
            "All checks and reviews passed. {} is ready for human approval; \
             ask a maintainer to review and merge it. No further automated steps remain.",
            ctx.pr_label()
        ),
    };
    text.push_str(&body);
    text
}

/// A monitored step failed; the iteration restarted
pub fn monitor_failure_instructions(
    failed: Step,
    next: &WiggumState,
    summary: &str,
    details: Option<&str>,
) -> String {
    let mut text = format!(
        "{} ({}) failed: {summary}\n\nStarting iteration {}.",
        failed.name(),
        failed.id(),
        next.iteration()
    );
    if let Some(details) = details {
        text.push_str(&format!("\n\nFailure details:\n{details}"));
    }
    text.push_str(&format!(
        "\n\nFix the failure, commit and push, then run `wiggum next`; \
         the workflow resumes at {} ({}).",
        next.step().id(),
        next.step().name()
    ));
    text
}

/// A reviewed step reported blocking findings; the iteration restarted
pub fn review_failure_instructions(failed: Step, next: &WiggumState, findings: u32, summary: Option<&str>) -> String {
    let mut text = format!(
        "{} ({}) reported {findings} blocking finding{}.",
        failed.name(),
        failed.id(),
        if findings == 1 { "" } else { "s" }
    );
    if let Some(summary) = summary {
        text.push_str(&format!("\n\n{summary}"));
    }
    text.push_str(&format!(
        "\n\nStarting iteration {}. Fix the findings, commit and push, then run `wiggum next`; \
         the workflow resumes at {} ({}).",
        next.iteration(),
        next.step().id(),
        next.step().name()
    ));
    text
}

pub fn main_branch_instructions(branch: &str) -> String {
    format!(
        "You are on the main branch '{branch}'. Create a feature branch named after the issue \
         (e.g. `git checkout -b 123-short-description`) and run `wiggum next` again."
    )
}

pub fn commit_instructions(branch: &str) -> String {
    format!(
        "Branch '{branch}' has uncommitted changes. Commit them before CI can be monitored:\n  \
         git add -A && git commit -m \"<message>\"\n\nThen push and run `wiggum next` again."
    )
}

pub fn push_instructions(branch: &str, tracking: bool) -> String {
    let command = if tracking {
        "git push".to_string()
    } else {
        format!("git push -u origin {branch}")
    };
    format!("Branch '{branch}' has commits that are not on the remote. Push them:\n  {command}\n\nThen run `wiggum next` again.")
}

pub fn no_resource_instructions(branch: &str) -> String {
    format!(
        "No open issue or pull request is associated with branch '{branch}'. \
         Name the branch after an open issue (e.g. `123-short-description`) or open a pull request \
         for it, then run `wiggum next` again."
    )
}

pub fn iteration_limit_instructions(iteration: u32, max: u32, last_failure: Option<&str>) -> String {
    let mut text = format!(
        "The workflow has reached {iteration} of {max} allowed iterations and will not continue automatically."
    );
    if let Some(failure) = last_failure {
        text.push_str(&format!("\n\nMost recent failure: {failure}"));
    }
    text.push_str(
        "\n\nAsk a human to look at the remaining problems. To allow more iterations, raise \
         `maxIterations` in the state marker or `workflow.default_max_iterations` in wiggum.toml.",
    );
    text
}

pub fn persist_failure_instructions(reason: &str, last_error: &str, attempts: u32) -> String {
    format!(
        "The workflow state could not be saved after {attempts} attempts ({reason}): {last_error}\n\n\
         The step result was not recorded. Wait a minute (check `gh api rate_limit`) and run the \
         same command again."
    )
}

pub fn monitor_unavailable_instructions(error: &str) -> String {
    format!(
        "CI status could not be determined: {error}\n\nNo state was changed. Check `gh auth status` \
         and the Actions tab, then run `wiggum next` again."
    )
}

pub fn corrupted_state_instructions(origin: &str) -> String {
    format!(
        "The `<!-- wiggum-state:... -->` marker in {origin} could not be decoded.\n\n\
         Delete the marker to restart the current phase from its first step, then run \
         `wiggum next` again."
    )
}

pub fn invalid_state_instructions(origin: &str) -> String {
    format!(
        "The workflow state recorded in {origin} is inconsistent.\n\n\
         Fix the recorded step and phase, or delete the marker to restart the phase. If a pull \
         request was closed, reopen it or delete the marker from the issue. Then run `wiggum next` again."
    )
}

pub fn race_limit_instructions() -> String {
    "Another process keeps changing the tracked issue or pull request.\n\n\
     Wait for it to finish, then run `wiggum next` again."
        .to_string()
}

pub fn detection_failed_instructions() -> String {
    "The workflow state could not be detected. No state was changed.\n\n\
     Check `git status` and `gh auth status`, then run `wiggum next` again."
        .to_string()
}
