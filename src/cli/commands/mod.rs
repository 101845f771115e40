use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{config, WiggumConfig};
use crate::external::GhWorkflowMonitor;
use crate::git::{Git2Inspector, GitInspector};
use crate::github::OctocrabResources;
use crate::observer::Observer;
use crate::workflows::{CurrentState, DetectorSettings, Router, RouterSettings, StateDetector, ToolResult};

pub mod complete;
pub mod show_config;
pub mod next;
pub mod state;

/// Whether a command's result tells the caller to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Halt,
}

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self) -> Result<Outcome>;
}

/// Collaborators wired from configuration and the local repository
pub struct Session {
    pub detector: StateDetector,
    pub router: Router,
}

impl Session {
    pub fn connect(config: &WiggumConfig) -> Result<Self> {
        let git = Arc::new(Git2Inspector::discover(".").context("not inside a git repository")?);

        let (owner, repo) = match (&config.github.owner, &config.github.repo) {
            (Some(owner), Some(repo)) => (owner.clone(), repo.clone()),
            _ => {
                let info = git
                    .github_repo()?
                    .ok_or_else(|| anyhow!("could not determine the GitHub repository; set github.owner and github.repo in wiggum.toml"))?;
                (info.owner, info.repo)
            }
        };
        let token = config
            .github
            .token
            .as_deref()
            .ok_or_else(|| anyhow!("no GitHub token found; set GITHUB_TOKEN or run `export GITHUB_TOKEN=$(gh auth token)`"))?;

        let resources = Arc::new(
            OctocrabResources::from_token(token, &owner, &repo)?.with_request_timeout(config.request_timeout()),
        );
        let monitor = Arc::new(
            GhWorkflowMonitor::default().with_poll_interval(Duration::from_secs(config.monitor.poll_interval_secs)),
        );
        let observer = Arc::new(Observer::default());

        let detector = StateDetector::new(
            git,
            resources.clone(),
            resources.clone(),
            Arc::clone(&observer),
            DetectorSettings::from(config),
        );
        let router = Router::new(resources, monitor, observer, RouterSettings::from(config));
        Ok(Self { detector, router })
    }

    /// Detect the current state and tag the invocation span with the
    /// tracked resources. A detection failure comes back as the error
    /// result to print.
    pub async fn detect(&self) -> Result<CurrentState, ToolResult> {
        let current = self.detector.detect().await.map_err(|e| {
            tracing::warn!(error = %e, "state detection failed");
            ToolResult::from(&e)
        })?;
        let span = tracing::Span::current();
        if let Some(number) = current.issue().number() {
            span.record("issue.number", number);
        }
        if let Some(number) = current.pull_request().number() {
            span.record("pr.number", number);
        }
        Ok(current)
    }
}

pub async fn with_session<F, Fut, R>(f: F) -> Result<R>
where
    F: FnOnce(Session) -> Fut,
    Fut: std::future::Future<Output = Result<R>>,
{
    let config = config()?;
    let session = Session::connect(config)?;
    f(session).await
}

/// Print a result that stops the workflow
pub fn halt(result: &ToolResult) -> Result<Outcome> {
    print_json(result)?;
    Ok(Outcome::Halt)
}

/// Results go to stdout as pretty JSON; everything else goes to stderr
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
