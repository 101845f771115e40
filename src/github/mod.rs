pub mod client;
pub mod errors;
pub mod retry;
pub mod types;

pub use client::{persist_state, OctocrabResources, ResourceLookup, TextResourceClient};
pub use errors::GitHubError;
pub use retry::{classify_error, ErrorClass, ResilientUpdater, StateUpdateResult, UpdateError};
pub use types::{ResourceDetails, ResourceKind, ResourceState, ResourceStatus};
