//! CI monitoring through the GitHub CLI
//!
//! Automated workflow steps wait for a branch workflow run or the checks on a
//! pull request to finish and report whether they passed. Only the outcome
//! matters to the router; the monitor collects failure logs so the next
//! instructions can point at what broke.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::command::{CommandError, CommandExecutor, CommandOutput, ProcessCommandExecutor};

/// Longest failure log handed back to the caller; the tail is kept
pub const MAX_FAILURE_DETAIL_CHARS: usize = 8_000;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
const RUN_LIST_FIELDS: &str = "databaseId,name,conclusion,url,headSha";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorTarget {
    /// The run for `commit` when given, else the newest run on the branch
    BranchWorkflow { branch: String, commit: Option<String> },
    PullRequestChecks { number: u64 },
}

impl fmt::Display for MonitorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorTarget::BranchWorkflow { branch, commit: None } => {
                write!(f, "workflow run on branch '{branch}'")
            }
            MonitorTarget::BranchWorkflow {
                branch,
                commit: Some(sha),
            } => write!(f, "workflow run on branch '{branch}' at {}", short_sha(sha)),
            MonitorTarget::PullRequestChecks { number } => write!(f, "checks on PR #{number}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MonitorOutcome {
    pub success: bool,
    pub failure_details: Option<String>,
    pub error_summary: Option<String>,
}

impl MonitorOutcome {
    pub fn passed() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failed(summary: impl Into<String>, details: Option<String>) -> Self {
        Self {
            success: false,
            failure_details: details.map(|d| keep_tail(&d, MAX_FAILURE_DETAIL_CHARS)),
            error_summary: Some(summary.into()),
        }
    }
}

/// The monitor could not determine an outcome; nothing about the code is known
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Timed out after {timeout_ms}ms waiting for {target}")]
    Timeout { target: String, timeout_ms: u64 },

    #[error("`{command}` failed: {stderr}")]
    Gh { command: String, stderr: String },

    #[error("Unexpected output from `{command}`: {message}")]
    InvalidOutput { command: String, message: String },

    #[error(transparent)]
    Command(#[from] CommandError),
}

#[async_trait]
pub trait WorkflowMonitor: Send + Sync {
    async fn run(&self, target: &MonitorTarget, timeout: Duration) -> Result<MonitorOutcome, MonitorError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary {
    database_id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    conclusion: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    head_sha: String,
}

#[derive(Debug, Deserialize)]
struct CheckSummary {
    name: String,
    #[serde(default)]
    bucket: String,
    #[serde(default)]
    link: String,
}

/// [`WorkflowMonitor`] driving `gh run` and `gh pr checks`
pub struct GhWorkflowMonitor {
    executor: Arc<dyn CommandExecutor>,
    poll_interval: Duration,
}

impl fmt::Debug for GhWorkflowMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GhWorkflowMonitor")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl Default for GhWorkflowMonitor {
    fn default() -> Self {
        Self::new(Arc::new(ProcessCommandExecutor))
    }
}

impl GhWorkflowMonitor {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn gh(&self, args: &[&str]) -> Result<CommandOutput, MonitorError> {
        Ok(self.executor.execute("gh", args).await?)
    }

    async fn gh_checked(&self, args: &[&str]) -> Result<String, MonitorError> {
        let output = self.gh(args).await?;
        if !output.success() {
            return Err(MonitorError::Gh {
                command: format!("gh {}", args.join(" ")),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    async fn latest_run(&self, branch: &str, commit: Option<&str>) -> Result<Option<RunSummary>, MonitorError> {
        let mut args = vec!["run", "list", "--branch", branch];
        if let Some(sha) = commit {
            args.extend(["--commit", sha]);
        }
        args.extend(["--limit", "1", "--json", RUN_LIST_FIELDS]);

        let stdout = self.gh_checked(&args).await?;
        let runs: Vec<RunSummary> = parse_json(&args, &stdout)?;
        // a run for any other commit says nothing about HEAD
        Ok(runs
            .into_iter()
            .find(|run| commit.map_or(true, |sha| run.head_sha == sha)))
    }

    async fn watch_branch(&self, branch: &str, commit: Option<&str>) -> Result<MonitorOutcome, MonitorError> {
        let run = loop {
            if let Some(run) = self.latest_run(branch, commit).await? {
                break run;
            }
            debug!(branch, commit, "no workflow run for this commit yet, polling again");
            tokio::time::sleep(self.poll_interval).await;
        };

        let id = run.database_id.to_string();
        info!(run_id = %id, workflow = %run.name, branch, "watching workflow run");
        // exit status only reflects the run when gh itself succeeded, so the
        // conclusion is read back afterwards
        self.gh(&["run", "watch", &id, "--exit-status"]).await?;

        let view_args = ["run", "view", id.as_str(), "--json", "databaseId,name,conclusion,url"];
        let stdout = self.gh_checked(&view_args).await?;
        let finished: RunSummary = parse_json(&view_args, &stdout)?;

        if finished.conclusion == "success" {
            return Ok(MonitorOutcome::passed());
        }

        let log = self.gh(&["run", "view", &id, "--log-failed"]).await?;
        let details = if log.success() { Some(log.stdout) } else { None };
        Ok(MonitorOutcome::failed(
            format!(
                "Workflow '{}' concluded '{}' ({})",
                finished.name, finished.conclusion, finished.url
            ),
            details,
        ))
    }

    async fn watch_checks(&self, number: u64) -> Result<MonitorOutcome, MonitorError> {
        let pr = number.to_string();
        info!(pr = number, "watching pull request checks");
        self.gh(&["pr", "checks", &pr, "--watch", "--fail-fast"]).await?;

        let args = ["pr", "checks", pr.as_str(), "--json", "name,bucket,link"];
        let output = self.gh(&args).await?;
        if !output.success() {
            if output.stderr.contains("no checks reported") {
                return Ok(MonitorOutcome::passed());
            }
            // gh exits non-zero when any check failed but still prints the JSON
            if output.stdout.trim().is_empty() {
                return Err(MonitorError::Gh {
                    command: format!("gh {}", args.join(" ")),
                    stderr: output.stderr.trim().to_string(),
                });
            }
        }
        let checks: Vec<CheckSummary> = parse_json(&args, &output.stdout)?;

        let unfinished: Vec<&CheckSummary> = checks
            .iter()
            .filter(|check| !matches!(check.bucket.as_str(), "pass" | "skipping"))
            .collect();
        if unfinished.is_empty() {
            return Ok(MonitorOutcome::passed());
        }

        let details = unfinished
            .iter()
            .map(|check| format!("- {} ({}): {}", check.name, check.bucket, check.link))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(MonitorOutcome::failed(
            format!("{} of {} checks on PR #{number} did not pass", unfinished.len(), checks.len()),
            Some(details),
        ))
    }
}

#[async_trait]
impl WorkflowMonitor for GhWorkflowMonitor {
    async fn run(&self, target: &MonitorTarget, timeout: Duration) -> Result<MonitorOutcome, MonitorError> {
        let watch = async {
            match target {
                MonitorTarget::BranchWorkflow { branch, commit } => {
                    self.watch_branch(branch, commit.as_deref()).await
                }
                MonitorTarget::PullRequestChecks { number } => self.watch_checks(*number).await,
            }
        };
        tokio::time::timeout(timeout, watch)
            .await
            .map_err(|_| MonitorError::Timeout {
                target: target.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

fn parse_json<T: serde::de::DeserializeOwned>(args: &[&str], stdout: &str) -> Result<T, MonitorError> {
    serde_json::from_str(stdout).map_err(|e| MonitorError::InvalidOutput {
        command: format!("gh {}", args.join(" ")),
        message: e.to_string(),
    })
}

/// Keep the last `limit` characters, marking the cut
fn keep_tail(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - limit).collect();
    format!("[… {} earlier characters omitted]\n{tail}", count - limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Answers commands from a script keyed by the full command line.
    /// Repeated keys are answered in order; the last answer sticks.
    #[derive(Default)]
    struct ScriptedExecutor {
        responses: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn respond(self, command: &str, status_code: i32, stdout: &str) -> Self {
            self.responses
                .lock()
                .unwrap()
                .entry(command.to_string())
                .or_default()
                .push_back(CommandOutput {
                    status_code,
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                });
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandExecutor for ScriptedExecutor {
        async fn execute(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
            let key = format!("{program} {}", args.join(" "));
            self.calls.lock().unwrap().push(key.clone());
            let mut responses = self.responses.lock().unwrap();
            let queue = responses.get_mut(&key).ok_or(CommandError::CommandNotFound {
                command: key.clone(),
            })?;
            let output = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            output.ok_or(CommandError::CommandNotFound { command: key })
        }
    }

    const LIST: &str = "gh run list --branch 12-fix --limit 1 --json databaseId,name,conclusion,url,headSha";
    const HEAD: &str = "9f1c2d3e4b5a69788796a5b4c3d2e1f0a9b8c7d6";
    const LIST_HEAD: &str = "gh run list --branch 12-fix --commit 9f1c2d3e4b5a69788796a5b4c3d2e1f0a9b8c7d6 \
                             --limit 1 --json databaseId,name,conclusion,url,headSha";
    const VIEW: &str = "gh run view 77 --json databaseId,name,conclusion,url";

    fn monitor(executor: Arc<ScriptedExecutor>) -> GhWorkflowMonitor {
        GhWorkflowMonitor::new(executor).with_poll_interval(Duration::from_secs(5))
    }

    fn branch() -> MonitorTarget {
        MonitorTarget::BranchWorkflow {
            branch: "12-fix".to_string(),
            commit: None,
        }
    }

    fn branch_at_head() -> MonitorTarget {
        MonitorTarget::BranchWorkflow {
            branch: "12-fix".to_string(),
            commit: Some(HEAD.to_string()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_for_an_older_commit_is_never_watched() {
        let stale = r#"[{"databaseId":70,"name":"CI","conclusion":"success","url":"u","headSha":"0ld0ld0ld"}]"#;
        let current = format!(r#"[{{"databaseId":77,"name":"CI","conclusion":"","url":"u","headSha":"{HEAD}"}}]"#);
        let executor = Arc::new(
            ScriptedExecutor::default()
                .respond(LIST_HEAD, 0, "[]")
                .respond(LIST_HEAD, 0, stale)
                .respond(LIST_HEAD, 0, &current)
                .respond("gh run watch 77 --exit-status", 1, "")
                .respond(VIEW, 0, r#"{"databaseId":77,"name":"CI","conclusion":"failure","url":"u"}"#)
                .respond("gh run view 77 --log-failed", 0, "error[E0425]"),
        );

        let outcome = monitor(executor.clone())
            .run(&branch_at_head(), Duration::from_secs(600))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(executor.calls().iter().filter(|c| c.as_str() == LIST_HEAD).count(), 3);
        assert!(!executor.calls().iter().any(|c| c.contains("run watch 70") || c.contains("run view 70")));
    }

    #[test]
    fn test_target_display_shortens_commit() {
        assert_eq!(
            branch_at_head().to_string(),
            "workflow run on branch '12-fix' at 9f1c2d3"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_branch_workflow_success_after_run_appears() {
        let executor = Arc::new(
            ScriptedExecutor::default()
                .respond(LIST, 0, "[]")
                .respond(LIST, 0, r#"[{"databaseId":77,"name":"CI","conclusion":"","url":"u"}]"#)
                .respond("gh run watch 77 --exit-status", 0, "")
                .respond(VIEW, 0, r#"{"databaseId":77,"name":"CI","conclusion":"success","url":"u"}"#),
        );

        let outcome = monitor(executor.clone())
            .run(&branch(), Duration::from_secs(600))
            .await
            .unwrap();

        assert_eq!(outcome, MonitorOutcome::passed());
        assert_eq!(executor.calls().iter().filter(|c| c.as_str() == LIST).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_branch_workflow_failure_collects_logs() {
        let executor = Arc::new(
            ScriptedExecutor::default()
                .respond(LIST, 0, r#"[{"databaseId":77,"name":"CI","conclusion":"","url":"u"}]"#)
                .respond("gh run watch 77 --exit-status", 1, "")
                .respond(VIEW, 0, r#"{"databaseId":77,"name":"CI","conclusion":"failure","url":"u"}"#)
                .respond("gh run view 77 --log-failed", 0, "test auth::login ... FAILED"),
        );

        let outcome = monitor(executor).run(&branch(), Duration::from_secs(600)).await.unwrap();

        assert!(!outcome.success);
        assert!(outcome.error_summary.unwrap().contains("concluded 'failure'"));
        assert_eq!(outcome.failure_details.as_deref(), Some("test auth::login ... FAILED"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_branch_workflow_times_out_when_no_run_appears() {
        let executor = Arc::new(ScriptedExecutor::default().respond(LIST, 0, "[]"));

        let err = monitor(executor)
            .run(&branch(), Duration::from_secs(30))
            .await
            .unwrap_err();

        assert!(matches!(err, MonitorError::Timeout { timeout_ms: 30_000, .. }));
    }

    #[tokio::test]
    async fn test_pull_request_checks_report_failures() {
        let executor = Arc::new(
            ScriptedExecutor::default()
                .respond("gh pr checks 31 --watch --fail-fast", 1, "")
                .respond(
                    "gh pr checks 31 --json name,bucket,link",
                    1,
                    r#"[{"name":"lint","bucket":"fail","link":"l1"},{"name":"test","bucket":"pass","link":"l2"}]"#,
                ),
        );

        let outcome = monitor(executor)
            .run(&MonitorTarget::PullRequestChecks { number: 31 }, Duration::from_secs(600))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.error_summary.as_deref(), Some("1 of 2 checks on PR #31 did not pass"));
        assert!(outcome.failure_details.unwrap().contains("lint (fail): l1"));
    }

    #[tokio::test]
    async fn test_pull_request_checks_pass() {
        let executor = Arc::new(
            ScriptedExecutor::default()
                .respond("gh pr checks 31 --watch --fail-fast", 0, "")
                .respond(
                    "gh pr checks 31 --json name,bucket,link",
                    0,
                    r#"[{"name":"test","bucket":"pass","link":"l"},{"name":"docs","bucket":"skipping","link":"l"}]"#,
                ),
        );

        let outcome = monitor(executor)
            .run(&MonitorTarget::PullRequestChecks { number: 31 }, Duration::from_secs(600))
            .await
            .unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_gh_failure_is_an_error_not_an_outcome() {
        let executor = Arc::new(ScriptedExecutor::default());
        executor
            .responses
            .lock()
            .unwrap()
            .insert(
                LIST.to_string(),
                VecDeque::from([CommandOutput {
                    status_code: 4,
                    stdout: String::new(),
                    stderr: "gh: To get started with GitHub CLI, please run: gh auth login".to_string(),
                }]),
            );

        let err = monitor(executor).run(&branch(), Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, MonitorError::Gh { .. }));
    }

    #[test]
    fn test_keep_tail_marks_truncation() {
        let text = "a".repeat(20) + "END";
        let kept = keep_tail(&text, 5);
        assert!(kept.ends_with("aaEND"));
        assert!(kept.contains("18 earlier characters omitted"));
        assert_eq!(keep_tail("short", 10), "short");
    }
}
