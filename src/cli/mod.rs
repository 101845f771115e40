use clap::{Parser, Subcommand};

pub mod commands;

#[derive(Parser)]
#[command(name = "wiggum")]
#[command(version)]
#[command(about = "Resumable review workflow for a GitHub issue and its pull request")]
#[command(long_about = "wiggum tracks one issue/PR through CI monitoring, review and security steps. \
                       The workflow position lives in a marker inside the issue or PR body, so any \
                       agent can pick it up with 'wiggum next'.")]
pub struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Log at debug level
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run automated steps and print instructions for the next one
    Next,
    /// Report the result of the active review step
    Complete {
        /// Step identifier, e.g. p1-2 or p2-4
        #[arg(value_name = "STEP")]
        step: String,
        /// Number of findings that must be fixed before continuing
        #[arg(long, help = "Blocking findings from the review (0 advances the workflow)")]
        blocking_findings: u32,
        /// Short description of the findings
        #[arg(long, help = "Summary recorded as the iteration's failure reason")]
        summary: Option<String>,
    },
    /// Print the detected workflow state as JSON
    State,
    /// Print the effective configuration (token redacted)
    Config,
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Next => "next",
            Commands::Complete { .. } => "complete",
            Commands::State => "state",
            Commands::Config => "config",
        }
    }
}
