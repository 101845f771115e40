// wiggum library - resumable review workflow for a GitHub issue and pull request
// This exposes the core components for testing and integration

pub mod cli;
pub mod config;
pub mod external;
pub mod git;
pub mod github;
pub mod observer;
pub mod state;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use config::{config, WiggumConfig};
pub use github::{GitHubError, ResilientUpdater, StateUpdateResult};
pub use observer::{Observer, WorkflowEvent};
pub use state::{Phase, Step, WiggumState};
pub use telemetry::{create_workflow_span, generate_correlation_id, init_telemetry};
pub use workflows::{CurrentState, Router, StateDetector, ToolResult};
