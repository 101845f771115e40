// Resilient state writes: error classification and capped exponential backoff

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::errors::{mentions_rate_limit, GitHubError};
use super::types::ResourceKind;
use crate::observer::{Observer, WorkflowEvent};
use crate::state::{ValidationError, WiggumState};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const MAX_RETRIES_LIMIT: u32 = 100;
pub const BASE_DELAY_MS: u64 = 1_000;
pub const MAX_DELAY_MS: u64 = 60_000;

/// How a failed write should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    AuthFailure,
    RateLimit,
    Network,
    Unexpected,
}

impl ErrorClass {
    pub fn is_transient(self) -> bool {
        self.transient_reason().is_some()
    }

    pub fn transient_reason(self) -> Option<TransientReason> {
        match self {
            ErrorClass::RateLimit => Some(TransientReason::RateLimit),
            ErrorClass::Network => Some(TransientReason::Network),
            ErrorClass::NotFound | ErrorClass::AuthFailure | ErrorClass::Unexpected => None,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorClass::NotFound => "not-found",
            ErrorClass::AuthFailure => "auth-failure",
            ErrorClass::RateLimit => "rate-limit",
            ErrorClass::Network => "network",
            ErrorClass::Unexpected => "unexpected",
        };
        f.write_str(label)
    }
}

/// Why a write gave up after exhausting its retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientReason {
    RateLimit,
    Network,
}

impl fmt::Display for TransientReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientReason::RateLimit => f.write_str("rate limit"),
            TransientReason::Network => f.write_str("network"),
        }
    }
}

/// Classify a GitHub error by status code first, then by transport failure
pub fn classify_error(error: &GitHubError) -> ErrorClass {
    match error.status_code() {
        Some(404) => ErrorClass::NotFound,
        Some(401) => ErrorClass::AuthFailure,
        Some(429) => ErrorClass::RateLimit,
        Some(403) if mentions_rate_limit(&error.message()) => ErrorClass::RateLimit,
        Some(403) => ErrorClass::AuthFailure,
        Some(status) if (500..=599).contains(&status) => ErrorClass::Network,
        Some(_) => ErrorClass::Unexpected,
        None if error.is_transport_failure() => ErrorClass::Network,
        None => match error {
            GitHubError::TokenNotFound(_) => ErrorClass::AuthFailure,
            _ => ErrorClass::Unexpected,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffDelay {
    pub delay: Duration,
    pub uncapped_ms: u64,
    pub capped: bool,
}

/// Delay before the retry that follows `attempt`: `min(2^attempt * 1s, 60s)`
pub fn backoff_delay(attempt: u32) -> BackoffDelay {
    let uncapped_ms = 2u64
        .checked_pow(attempt)
        .and_then(|factor| factor.checked_mul(BASE_DELAY_MS))
        .unwrap_or(u64::MAX);
    let delay_ms = uncapped_ms.min(MAX_DELAY_MS);
    BackoffDelay {
        delay: Duration::from_millis(delay_ms),
        uncapped_ms,
        capped: uncapped_ms > MAX_DELAY_MS,
    }
}

/// Outcome of a write that did not fail fatally
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StateUpdateResult {
    Success {
        attempts: u32,
    },
    Failure {
        reason: TransientReason,
        last_error: String,
        attempt_count: u32,
    },
}

impl StateUpdateResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StateUpdateResult::Success { .. })
    }
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Refusing to write state: {0}")]
    Validation(#[from] ValidationError),

    #[error("{kind} #{resource_id} was not found\n\n{source}")]
    NotFound {
        kind: ResourceKind,
        resource_id: u64,
        source: GitHubError,
    },

    #[error("Not authorized to update {kind} #{resource_id}\n\n{source}")]
    AuthFailure {
        kind: ResourceKind,
        resource_id: u64,
        source: GitHubError,
    },

    #[error("Unexpected error updating {kind} #{resource_id}\n\n{source}")]
    Unexpected {
        kind: ResourceKind,
        resource_id: u64,
        source: GitHubError,
    },

    #[error("Internal error in state updater: {0}")]
    Internal(String),
}

/// Runs a state write with classification and bounded retries
#[derive(Debug, Clone)]
pub struct ResilientUpdater {
    observer: Arc<Observer>,
}

impl ResilientUpdater {
    pub fn new(observer: Arc<Observer>) -> Self {
        Self { observer }
    }

    /// Write `new_state` to a resource through `write_fn`.
    ///
    /// Not-found, auth and unexpected failures return `Err` after one call.
    /// Rate-limit and network failures are retried up to `max_retries` calls
    /// in total, then reported as [`StateUpdateResult::Failure`].
    pub async fn update<F, Fut>(
        &self,
        kind: ResourceKind,
        resource_id: u64,
        new_state: &WiggumState,
        write_fn: F,
        max_retries: u32,
    ) -> Result<StateUpdateResult, UpdateError>
    where
        F: Fn(u64, WiggumState) -> Fut,
        Fut: Future<Output = Result<(), GitHubError>>,
    {
        if resource_id == 0 {
            return Err(ValidationError::InvalidParameter {
                name: "resource_id",
                reason: "must be a positive integer".to_string(),
            }
            .into());
        }
        if !(1..=MAX_RETRIES_LIMIT).contains(&max_retries) {
            return Err(ValidationError::InvalidParameter {
                name: "max_retries",
                reason: format!("must be between 1 and {MAX_RETRIES_LIMIT}, got {max_retries}"),
            }
            .into());
        }
        new_state.validate()?;

        for attempt in 1..=max_retries {
            let error = match write_fn(resource_id, new_state.clone()).await {
                Ok(()) => {
                    let event = if attempt > 1 {
                        WorkflowEvent::UpdateRecovered {
                            kind,
                            resource_id,
                            attempts: attempt,
                        }
                    } else {
                        WorkflowEvent::UpdateSucceeded {
                            kind,
                            resource_id,
                            attempts: attempt,
                        }
                    };
                    self.observer.emit(event);
                    return Ok(StateUpdateResult::Success { attempts: attempt });
                }
                Err(error) => error,
            };

            let class = classify_error(&error);
            self.observer.emit(WorkflowEvent::UpdateAttemptFailed {
                kind,
                resource_id,
                attempt,
                max_retries,
                class,
                error: error.brief(),
            });

            let Some(reason) = class.transient_reason() else {
                return Err(match class {
                    ErrorClass::NotFound => UpdateError::NotFound {
                        kind,
                        resource_id,
                        source: error,
                    },
                    ErrorClass::AuthFailure => UpdateError::AuthFailure {
                        kind,
                        resource_id,
                        source: error,
                    },
                    _ => UpdateError::Unexpected {
                        kind,
                        resource_id,
                        source: error,
                    },
                });
            };

            if attempt == max_retries {
                self.observer.emit(WorkflowEvent::UpdateExhausted {
                    kind,
                    resource_id,
                    reason,
                    attempts: attempt,
                });
                return Ok(StateUpdateResult::Failure {
                    reason,
                    last_error: error.brief(),
                    attempt_count: attempt,
                });
            }

            let backoff = backoff_delay(attempt);
            self.observer.emit(WorkflowEvent::RetryScheduled {
                attempt,
                delay_ms: backoff.delay.as_millis() as u64,
                uncapped_delay_ms: backoff.uncapped_ms,
                capped: backoff.capped,
            });
            tokio::time::sleep(backoff.delay).await;
        }

        let detail = format!(
            "retry loop for {kind} #{resource_id} ended without a result after {max_retries} attempts"
        );
        self.observer.emit(WorkflowEvent::InternalInvariantViolated {
            component: "resilient_updater",
            detail: detail.clone(),
        });
        Err(UpdateError::Internal(detail))
    }
}
