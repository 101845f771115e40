// Workflow orchestration: detection, routing and instruction payloads

pub mod detector;
pub mod instructions;
pub mod router;
pub mod types;

pub use detector::{issue_number_from_branch, DetectionError, DetectorSettings, StateDetector};
pub use router::{ErrorCode, ResponseMetadata, Router, RouterError, RouterSettings, StepOutcome, ToolResult};
pub use types::{CurrentState, GitSnapshot, ResourceIdentity, StateSource};
