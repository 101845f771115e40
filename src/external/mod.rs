//! External tool abstractions
//!
//! Process execution and the `gh`-based CI monitor sit behind traits so the
//! workflow logic can be driven by scripted implementations in tests.

pub mod command;
pub mod monitor;

pub use command::{CommandError, CommandExecutor, CommandOutput, ProcessCommandExecutor};
pub use monitor::{GhWorkflowMonitor, MonitorError, MonitorOutcome, MonitorTarget, WorkflowMonitor};
