use anyhow::Result;

use super::{halt, print_json, with_session, Command, Outcome};

/// `wiggum state`: print the detected snapshot without changing anything
pub struct StateCommand;

impl Command for StateCommand {
    async fn execute(&self) -> Result<Outcome> {
        with_session(|session| async move {
            let current = match session.detect().await {
                Ok(current) => current,
                Err(result) => return halt(&result),
            };
            print_json(&current)?;
            Ok(Outcome::Continue)
        })
        .await
    }
}
