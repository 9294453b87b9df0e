//! Railyard CLI entry point.
//!
//! Binary name: `ryd`
//!
//! Parses CLI arguments, initializes the database and services, then
//! dispatches to the appropriate command handler or starts the worker loop.

mod cli;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The worker is a long-running service and defaults to info-level
    // structured logs; one-shot commands stay quiet unless asked.
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 if matches!(cli.command, Commands::Worker { .. }) => "info",
        0 => "warn",
        1 => "info,railyard=debug",
        _ => "trace",
    };
    let json_logs = matches!(cli.command, Commands::Worker { json_logs: true });
    railyard_observe::tracing_setup::init_tracing(filter, json_logs)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let state = AppState::init().await?;

    match cli.command {
        Commands::Worker { .. } => {
            cli::worker::run(&state).await?;
        }

        Commands::Trigger { workflow_id } => {
            cli::fire::trigger_workflow(&state, workflow_id, cli.json).await?;
        }

        Commands::Event { event_id } => {
            cli::fire::fire_event(&state, event_id, cli.json).await?;
        }

        Commands::Generate { subscription_id } => {
            cli::fire::generate_subscription(&state, subscription_id, cli.json).await?;
        }

        Commands::Finish { datastore_id } => {
            cli::entity::finish_datastore(&state, datastore_id, cli.json).await?;
        }

        Commands::Create { resource } => {
            cli::entity::create(&state, resource, cli.json).await?;
        }

        Commands::List { resource } => {
            cli::entity::list(&state, resource, cli.json).await?;
        }

        Commands::Delete { resource } => {
            cli::entity::delete(&state, resource, cli.json).await?;
        }
    }

    Ok(())
}
