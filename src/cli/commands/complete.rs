use anyhow::Result;

use super::{halt, print_json, with_session, Command, Outcome};
use crate::state::Step;
use crate::workflows::StepOutcome;

/// `wiggum complete <step>`: record the result of a review step
pub struct CompleteCommand {
    pub step: String,
    pub blocking_findings: u32,
    pub summary: Option<String>,
}

impl CompleteCommand {
    pub fn new(step: String, blocking_findings: u32) -> Self {
        Self {
            step,
            blocking_findings,
            summary: None,
        }
    }

    pub fn with_summary(mut self, summary: Option<String>) -> Self {
        self.summary = summary.filter(|s| !s.trim().is_empty());
        self
    }
}

impl Command for CompleteCommand {
    async fn execute(&self) -> Result<Outcome> {
        // reject a bad step id before touching the network
        let step = Step::parse(&self.step)?;
        let outcome = StepOutcome {
            blocking_findings: self.blocking_findings,
            summary: self.summary.clone(),
        };

        with_session(|session| async move {
            let current = match session.detect().await {
                Ok(current) => current,
                Err(result) => return halt(&result),
            };
            let result = session.router.complete_step(&current, step, outcome).await?;
            print_json(&result)?;
            Ok(if result.is_error() { Outcome::Halt } else { Outcome::Continue })
        })
        .await
    }
}
