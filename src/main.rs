use anyhow::Result;
use clap::Parser;
use tracing::Instrument;

use wiggum::cli::commands::{
    complete::CompleteCommand, next::NextCommand, show_config::ShowConfigCommand, state::StateCommand, Command,
    Outcome,
};
use wiggum::cli::{Cli, Commands};
use wiggum::config::{config, WiggumConfig};
use wiggum::telemetry::{create_workflow_span, generate_correlation_id, init_telemetry};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // A broken config still gets reported through the command below
    let mut observability = config()
        .map(|c| c.observability.clone())
        .unwrap_or_else(|_| WiggumConfig::default().observability);
    if cli.json_logs {
        observability.json = true;
    }
    if cli.verbose {
        observability.log_level = "debug".to_string();
    }
    init_telemetry(&observability)?;

    let correlation_id = generate_correlation_id();
    let span = create_workflow_span(cli.command.name(), &correlation_id);

    let outcome = tokio::runtime::Runtime::new()?.block_on(
        async {
            match cli.command {
                Commands::Next => NextCommand.execute().await,
                Commands::Complete {
                    step,
                    blocking_findings,
                    summary,
                } => {
                    CompleteCommand::new(step, blocking_findings)
                        .with_summary(summary)
                        .execute()
                        .await
                }
                Commands::State => StateCommand.execute().await,
                Commands::Config => ShowConfigCommand.execute().await,
            }
        }
        .instrument(span),
    )?;

    if outcome == Outcome::Halt {
        std::process::exit(2);
    }
    Ok(())
}
