use anyhow::Result;

use super::{halt, print_json, with_session, Command, Outcome};

/// `wiggum next`: run what can be run, then say what the agent should do
pub struct NextCommand;

impl Command for NextCommand {
    async fn execute(&self) -> Result<Outcome> {
        with_session(|session| async move {
            let current = match session.detect().await {
                Ok(current) => current,
                Err(result) => return halt(&result),
            };
            let result = session.router.get_next_step_instructions(&current).await?;
            print_json(&result)?;
            Ok(if result.is_error() { Outcome::Halt } else { Outcome::Continue })
        })
        .await
    }
}
