// Workflow state: the persisted position, its text codec, and the step machine

pub mod codec;
pub mod steps;
pub mod types;

pub use codec::{decode, encode, StateCorruptionError};
pub use steps::{advance, next_step, restart_iteration, STEP_ORDER};
pub use types::{Phase, Step, ValidationError, WiggumState};
