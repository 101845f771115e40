//! Workflow event observer
//!
//! Core components report what they do as [`WorkflowEvent`] values instead of
//! calling the logger directly. The [`Observer`] forwards each event through a
//! guarded chain: the primary sink (tracing), then a secondary sink (stderr),
//! then an in-memory buffer. A failing sink never propagates an error to the
//! code that emitted the event.

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::github::retry::{ErrorClass, TransientReason};
use crate::github::types::ResourceKind;
use crate::state::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventLevel::Debug => "DEBUG",
            EventLevel::Info => "INFO",
            EventLevel::Warn => "WARN",
            EventLevel::Error => "ERROR",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    UpdateSucceeded {
        kind: ResourceKind,
        resource_id: u64,
        attempts: u32,
    },
    UpdateRecovered {
        kind: ResourceKind,
        resource_id: u64,
        attempts: u32,
    },
    UpdateAttemptFailed {
        kind: ResourceKind,
        resource_id: u64,
        attempt: u32,
        max_retries: u32,
        class: ErrorClass,
        error: String,
    },
    RetryScheduled {
        attempt: u32,
        delay_ms: u64,
        uncapped_delay_ms: u64,
        capped: bool,
    },
    UpdateExhausted {
        kind: ResourceKind,
        resource_id: u64,
        reason: TransientReason,
        attempts: u32,
    },
    InternalInvariantViolated {
        component: &'static str,
        detail: String,
    },
    DetectionCompleted {
        attempt: u32,
        elapsed_ms: u64,
        identity: String,
    },
    SlowDetection {
        attempt: u32,
        elapsed_ms: u64,
        threshold_ms: u64,
    },
    RaceDetected {
        attempt: u32,
        previous_identity: String,
        new_identity: String,
    },
    MonitorStarted {
        step: Step,
        target: String,
    },
    StepAdvanced {
        from: Step,
        to: Step,
        iteration: u32,
    },
    StepFailed {
        step: Step,
        iteration: u32,
        summary: String,
    },
}

impl WorkflowEvent {
    pub fn level(&self) -> EventLevel {
        match self {
            WorkflowEvent::UpdateSucceeded { .. } | WorkflowEvent::DetectionCompleted { .. } => {
                EventLevel::Debug
            }
            WorkflowEvent::UpdateRecovered { .. }
            | WorkflowEvent::MonitorStarted { .. }
            | WorkflowEvent::StepAdvanced { .. } => EventLevel::Info,
            WorkflowEvent::UpdateAttemptFailed { class, .. } => {
                if class.is_transient() {
                    EventLevel::Warn
                } else {
                    EventLevel::Error
                }
            }
            WorkflowEvent::RetryScheduled { .. }
            | WorkflowEvent::SlowDetection { .. }
            | WorkflowEvent::RaceDetected { .. }
            | WorkflowEvent::StepFailed { .. } => EventLevel::Warn,
            WorkflowEvent::UpdateExhausted { .. }
            | WorkflowEvent::InternalInvariantViolated { .. } => EventLevel::Error,
        }
    }
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowEvent::UpdateSucceeded { kind, resource_id, attempts } => {
                write!(f, "state written to {kind} #{resource_id} (attempt {attempts})")
            }
            WorkflowEvent::UpdateRecovered { kind, resource_id, attempts } => write!(
                f,
                "state write to {kind} #{resource_id} recovered after {attempts} attempts"
            ),
            WorkflowEvent::UpdateAttemptFailed { kind, resource_id, attempt, max_retries, class, error } => write!(
                f,
                "state write to {kind} #{resource_id} failed (attempt {attempt}/{max_retries}, {class}): {error}"
            ),
            WorkflowEvent::RetryScheduled { attempt, delay_ms, uncapped_delay_ms, capped } => {
                if *capped {
                    write!(
                        f,
                        "retrying after attempt {attempt} in {delay_ms}ms (capped from {uncapped_delay_ms}ms)"
                    )
                } else {
                    write!(f, "retrying after attempt {attempt} in {delay_ms}ms")
                }
            }
            WorkflowEvent::UpdateExhausted { kind, resource_id, reason, attempts } => write!(
                f,
                "giving up on state write to {kind} #{resource_id} after {attempts} attempts ({reason})"
            ),
            WorkflowEvent::InternalInvariantViolated { component, detail } => {
                write!(f, "internal invariant violated in {component}: {detail}")
            }
            WorkflowEvent::DetectionCompleted { attempt, elapsed_ms, identity } => write!(
                f,
                "state detected in {elapsed_ms}ms on attempt {attempt} (tracking {identity})"
            ),
            WorkflowEvent::SlowDetection { attempt, elapsed_ms, threshold_ms } => write!(
                f,
                "detection attempt {attempt} took {elapsed_ms}ms (threshold {threshold_ms}ms); revalidating"
            ),
            WorkflowEvent::RaceDetected { attempt, previous_identity, new_identity } => write!(
                f,
                "tracked resource changed during detection attempt {attempt}: {previous_identity} -> {new_identity}"
            ),
            WorkflowEvent::MonitorStarted { step, target } => {
                write!(f, "monitoring {target} for step {step}")
            }
            WorkflowEvent::StepAdvanced { from, to, iteration } => {
                write!(f, "advanced from {from} to {to} (iteration {iteration})")
            }
            WorkflowEvent::StepFailed { step, iteration, summary } => {
                write!(f, "step {step} failed in iteration {iteration}: {summary}")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    #[error("sink write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for workflow events
pub trait EventSink: Send + Sync {
    fn record(&self, event: &WorkflowEvent) -> Result<(), SinkError>;
}

/// Primary sink: structured `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &WorkflowEvent) -> Result<(), SinkError> {
        match event.level() {
            EventLevel::Debug => tracing::debug!(event = %event, "workflow event"),
            EventLevel::Info => tracing::info!(event = %event, "workflow event"),
            EventLevel::Warn => tracing::warn!(event = %event, "workflow event"),
            EventLevel::Error => tracing::error!(event = %event, "workflow event"),
        }
        Ok(())
    }
}

/// Secondary sink: plain lines on stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl EventSink for StderrSink {
    fn record(&self, event: &WorkflowEvent) -> Result<(), SinkError> {
        let mut stderr = std::io::stderr().lock();
        writeln!(stderr, "[wiggum] {} {}", event.level(), event)?;
        Ok(())
    }
}

/// Shared in-memory sink, mostly useful for inspecting events in tests
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<WorkflowEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &WorkflowEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .map_err(|_| SinkError::Unavailable("memory sink lock poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}

/// Guarded fan-out to the primary sink, falling back to the secondary sink
/// and finally to an internal buffer.
pub struct Observer {
    primary: Box<dyn EventSink>,
    secondary: Option<Box<dyn EventSink>>,
    fallback: Mutex<Vec<WorkflowEvent>>,
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("has_secondary", &self.secondary.is_some())
            .field("buffered", &self.buffered().len())
            .finish()
    }
}

impl Default for Observer {
    fn default() -> Self {
        Self::tracing()
    }
}

impl Observer {
    pub fn new(primary: Box<dyn EventSink>, secondary: Option<Box<dyn EventSink>>) -> Self {
        Self {
            primary,
            secondary,
            fallback: Mutex::new(Vec::new()),
        }
    }

    /// Tracing first, stderr second
    pub fn tracing() -> Self {
        Self::new(Box::new(TracingSink), Some(Box::new(StderrSink)))
    }

    /// Record only into a shared memory sink
    pub fn memory(sink: MemorySink) -> Self {
        Self::new(Box::new(sink), None)
    }

    pub fn emit(&self, event: WorkflowEvent) {
        if self.primary.record(&event).is_ok() {
            return;
        }
        if let Some(secondary) = &self.secondary {
            if secondary.record(&event).is_ok() {
                return;
            }
        }
        // a poisoned buffer drops the event rather than failing the caller
        if let Ok(mut buffer) = self.fallback.lock() {
            buffer.push(event);
        }
    }

    /// Events that no sink accepted
    pub fn buffered(&self) -> Vec<WorkflowEvent> {
        self.fallback.lock().map(|buffer| buffer.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenSink;

    impl EventSink for BrokenSink {
        fn record(&self, _event: &WorkflowEvent) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("broken".to_string()))
        }
    }

    fn sample_event() -> WorkflowEvent {
        WorkflowEvent::StepAdvanced {
            from: Step::PreMonitorWorkflow,
            to: Step::PreCodeReview,
            iteration: 0,
        }
    }

    #[test]
    fn test_primary_sink_receives_event() {
        let sink = MemorySink::new();
        let observer = Observer::memory(sink.clone());
        observer.emit(sample_event());

        assert_eq!(sink.events(), vec![sample_event()]);
        assert!(observer.buffered().is_empty());
    }

    #[test]
    fn test_secondary_used_when_primary_fails() {
        let secondary = MemorySink::new();
        let observer = Observer::new(Box::new(BrokenSink), Some(Box::new(secondary.clone())));
        observer.emit(sample_event());

        assert_eq!(secondary.events().len(), 1);
        assert!(observer.buffered().is_empty());
    }

    #[test]
    fn test_buffer_used_when_all_sinks_fail() {
        let observer = Observer::new(Box::new(BrokenSink), Some(Box::new(BrokenSink)));
        observer.emit(sample_event());

        assert_eq!(observer.buffered(), vec![sample_event()]);
    }

    #[test]
    fn test_event_levels() {
        let fatal = WorkflowEvent::UpdateAttemptFailed {
            kind: ResourceKind::Issue,
            resource_id: 1,
            attempt: 1,
            max_retries: 3,
            class: ErrorClass::NotFound,
            error: "gone".to_string(),
        };
        assert_eq!(fatal.level(), EventLevel::Error);

        let transient = WorkflowEvent::UpdateAttemptFailed {
            kind: ResourceKind::Issue,
            resource_id: 1,
            attempt: 1,
            max_retries: 3,
            class: ErrorClass::RateLimit,
            error: "slow down".to_string(),
        };
        assert_eq!(transient.level(), EventLevel::Warn);
    }

    #[test]
    fn test_retry_display_mentions_cap() {
        let capped = WorkflowEvent::RetryScheduled {
            attempt: 6,
            delay_ms: 60_000,
            uncapped_delay_ms: 64_000,
            capped: true,
        };
        assert!(capped.to_string().contains("capped from 64000ms"));
    }
}
