use async_trait::async_trait;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::errors::GitHubError;
use super::types::{ResourceDetails, ResourceKind, ResourceStatus};
use crate::state::{self, WiggumState};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw access to the text body of an issue or pull request
#[async_trait]
pub trait TextResourceClient: Send + Sync {
    async fn read_body(&self, kind: ResourceKind, id: u64) -> Result<String, GitHubError>;
    async fn write_body(&self, kind: ResourceKind, id: u64, body: &str) -> Result<(), GitHubError>;
}

/// Lookups used to decide which resource the workflow is tracking
#[async_trait]
pub trait ResourceLookup: Send + Sync {
    /// The open pull request whose head is `branch`, if any
    async fn find_open_pull_request(&self, branch: &str) -> Result<Option<ResourceDetails>, GitHubError>;
    /// Issue details; `None` when the issue does not exist
    async fn get_issue(&self, number: u64) -> Result<Option<ResourceDetails>, GitHubError>;
}

/// Read the body, re-encode the state marker into it and write it back.
///
/// This is the write function handed to the resilient updater.
pub async fn persist_state<C>(
    client: &C,
    kind: ResourceKind,
    id: u64,
    state: &WiggumState,
) -> Result<(), GitHubError>
where
    C: TextResourceClient + ?Sized,
{
    let body = client.read_body(kind, id).await?;
    let updated = state::encode(state, &body)?;
    if updated == body {
        debug!(kind = %kind, id, "state marker already current, skipping write");
        return Ok(());
    }
    client.write_body(kind, id, &updated).await
}

#[derive(Debug, Deserialize)]
struct BodyPayload {
    body: Option<String>,
}

#[derive(Debug, Serialize)]
struct BodyUpdate<'a> {
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct LabelPayload {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RefPayload {
    #[serde(rename = "ref")]
    ref_name: String,
}

#[derive(Debug, Deserialize)]
struct IssuePayload {
    number: u64,
    title: String,
    state: String,
    html_url: Option<String>,
    #[serde(default)]
    labels: Vec<LabelPayload>,
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PullPayload {
    number: u64,
    title: String,
    state: String,
    html_url: Option<String>,
    #[serde(default)]
    labels: Vec<LabelPayload>,
    head: RefPayload,
    base: RefPayload,
    merged_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct PullQuery {
    state: &'static str,
    head: String,
}

fn parse_status(state: &str, merged: bool) -> ResourceStatus {
    if merged {
        ResourceStatus::Merged
    } else if state.eq_ignore_ascii_case("open") {
        ResourceStatus::Open
    } else {
        ResourceStatus::Closed
    }
}

impl From<IssuePayload> for ResourceDetails {
    fn from(issue: IssuePayload) -> Self {
        ResourceDetails {
            number: issue.number,
            title: issue.title,
            status: parse_status(&issue.state, false),
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            head_ref: None,
            base_ref: None,
            url: issue.html_url,
        }
    }
}

impl From<PullPayload> for ResourceDetails {
    fn from(pull: PullPayload) -> Self {
        ResourceDetails {
            number: pull.number,
            title: pull.title,
            status: parse_status(&pull.state, pull.merged_at.is_some()),
            labels: pull.labels.into_iter().map(|l| l.name).collect(),
            head_ref: Some(pull.head.ref_name),
            base_ref: Some(pull.base.ref_name),
            url: pull.html_url,
        }
    }
}

/// Octocrab-backed issue and pull request access for one repository
#[derive(Debug, Clone)]
pub struct OctocrabResources {
    octocrab: Octocrab,
    owner: String,
    repo: String,
    request_timeout: Duration,
}

impl OctocrabResources {
    pub fn new(octocrab: Octocrab, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            octocrab,
            owner: owner.into(),
            repo: repo.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Build a client authenticated with a personal access token.
    ///
    /// Octocrab's own retry layer is disabled; retries belong to the
    /// resilient updater, which classifies errors first.
    pub fn from_token(token: &str, owner: &str, repo: &str) -> Result<Self, GitHubError> {
        let octocrab = Octocrab::builder()
            .personal_token(token.to_string())
            .add_retry_config(octocrab::service::middleware::retry::RetryConfig::None)
            .build()?;
        Ok(Self::new(octocrab, owner, repo))
    }

    /// Same as [`OctocrabResources::from_token`] against a different API root
    pub fn with_base_uri(base_uri: &str, token: &str, owner: &str, repo: &str) -> Result<Self, GitHubError> {
        let octocrab = Octocrab::builder()
            .base_uri(base_uri)?
            .personal_token(token.to_string())
            .add_retry_config(octocrab::service::middleware::retry::RetryConfig::None)
            .build()?;
        Ok(Self::new(octocrab, owner, repo))
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    fn route(&self, kind: ResourceKind, id: u64) -> String {
        let segment = match kind {
            ResourceKind::Issue => "issues",
            ResourceKind::PullRequest => "pulls",
        };
        format!("/repos/{}/{}/{segment}/{id}", self.owner, self.repo)
    }

    async fn timed<T, F>(&self, operation: &str, call: F) -> Result<T, GitHubError>
    where
        F: Future<Output = Result<T, octocrab::Error>>,
    {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result.map_err(GitHubError::from),
            Err(_) => Err(GitHubError::Timeout {
                operation: operation.to_string(),
                duration_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl TextResourceClient for OctocrabResources {
    async fn read_body(&self, kind: ResourceKind, id: u64) -> Result<String, GitHubError> {
        let route = self.route(kind, id);
        let payload: BodyPayload = self
            .timed("read_body", self.octocrab.get(&route, None::<&()>))
            .await?;
        Ok(payload.body.unwrap_or_default())
    }

    async fn write_body(&self, kind: ResourceKind, id: u64, body: &str) -> Result<(), GitHubError> {
        let route = self.route(kind, id);
        let update = BodyUpdate { body };
        let _: serde_json::Value = self
            .timed("write_body", self.octocrab.patch(&route, Some(&update)))
            .await?;
        debug!(kind = %kind, id, bytes = body.len(), "wrote resource body");
        Ok(())
    }
}

#[async_trait]
impl ResourceLookup for OctocrabResources {
    async fn find_open_pull_request(&self, branch: &str) -> Result<Option<ResourceDetails>, GitHubError> {
        let route = format!("/repos/{}/{}/pulls", self.owner, self.repo);
        let query = PullQuery {
            state: "open",
            head: format!("{}:{branch}", self.owner),
        };
        let pulls: Vec<PullPayload> = self
            .timed("find_open_pull_request", self.octocrab.get(&route, Some(&query)))
            .await?;
        Ok(pulls
            .into_iter()
            .find(|pull| pull.head.ref_name == branch)
            .map(ResourceDetails::from))
    }

    async fn get_issue(&self, number: u64) -> Result<Option<ResourceDetails>, GitHubError> {
        let route = self.route(ResourceKind::Issue, number);
        let result: Result<IssuePayload, GitHubError> =
            self.timed("get_issue", self.octocrab.get(&route, None::<&()>)).await;
        match result {
            // the issues endpoint also serves pull requests
            Ok(issue) if issue.pull_request.is_some() => Ok(None),
            Ok(issue) => Ok(Some(issue.into())),
            Err(err) if err.status_code() == Some(404) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
