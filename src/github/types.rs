use serde::Serialize;
use std::fmt;

/// The two kinds of remote text resource the workflow tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Issue,
    PullRequest,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Issue => f.write_str("issue"),
            ResourceKind::PullRequest => f.write_str("pull request"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Open,
    Closed,
    Merged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDetails {
    pub number: u64,
    pub title: String,
    pub status: ResourceStatus,
    pub labels: Vec<String>,
    /// Head branch for pull requests
    pub head_ref: Option<String>,
    /// Base branch for pull requests
    pub base_ref: Option<String>,
    pub url: Option<String>,
}

/// Whether a tracked resource exists, with its details only when it does
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResourceState {
    Exists(ResourceDetails),
    DoesNotExist,
}

impl ResourceState {
    /// Only open resources count as existing; closed and merged ones are
    /// treated as absent.
    pub fn from_lookup(details: Option<ResourceDetails>) -> Self {
        match details {
            Some(details) if details.status == ResourceStatus::Open => ResourceState::Exists(details),
            _ => ResourceState::DoesNotExist,
        }
    }

    pub fn exists(&self) -> bool {
        matches!(self, ResourceState::Exists(_))
    }

    pub fn details(&self) -> Option<&ResourceDetails> {
        match self {
            ResourceState::Exists(details) => Some(details),
            ResourceState::DoesNotExist => None,
        }
    }

    pub fn number(&self) -> Option<u64> {
        self.details().map(|details| details.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(status: ResourceStatus) -> ResourceDetails {
        ResourceDetails {
            number: 42,
            title: "Fix login redirect".to_string(),
            status,
            labels: vec!["bug".to_string()],
            head_ref: None,
            base_ref: None,
            url: None,
        }
    }

    #[test]
    fn test_only_open_resources_exist() {
        assert!(ResourceState::from_lookup(Some(details(ResourceStatus::Open))).exists());
        assert!(!ResourceState::from_lookup(Some(details(ResourceStatus::Closed))).exists());
        assert!(!ResourceState::from_lookup(Some(details(ResourceStatus::Merged))).exists());
        assert!(!ResourceState::from_lookup(None).exists());
    }

    #[test]
    fn test_details_unreachable_when_absent() {
        assert_eq!(ResourceState::DoesNotExist.details(), None);
        assert_eq!(ResourceState::DoesNotExist.number(), None);
    }
}
