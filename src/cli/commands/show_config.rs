use anyhow::Result;

use super::{Command, Outcome};
use crate::config::config;

/// `wiggum config`: print the effective configuration as TOML
pub struct ShowConfigCommand;

impl Command for ShowConfigCommand {
    async fn execute(&self) -> Result<Outcome> {
        print!("{}", config()?.to_display_toml()?);
        Ok(Outcome::Continue)
    }
}
