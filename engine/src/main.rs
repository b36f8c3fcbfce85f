// Steward task agent
// Main entry point for the steward binary

use clap::Parser;
use steward_engine::cli::{Cli, Command, SecretAction};
use steward_engine::config::Config;
use steward_engine::handlers::{
    handle_doctor, handle_history, handle_replay, handle_run, handle_secret_set, OutputFormat,
};
use steward_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Secrets never need a config file
    if let Command::Secret {
        action: SecretAction::Set { key },
    } = cli.command
    {
        init_telemetry();
        return handle_secret_set(key, format).await;
    }

    let config = Config::load(cli.config.as_deref())?;

    // RUST_LOG still wins over both
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");
    tracing::info!("Steward v{} ({} - {})", version, commit, timestamp);

    match cli.command {
        Command::Run { task, max_steps } => {
            tracing::info!("Executing task: {}", task);
            handle_run(task, max_steps, &config, format).await
        }

        Command::History { limit } => {
            tracing::info!("Showing last {} tasks", limit);
            handle_history(limit, &config, format).await
        }

        Command::Replay { task_id } => {
            tracing::info!("Replaying task: {}", task_id);
            handle_replay(task_id, &config, format).await
        }

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }

        Command::Secret { .. } => Ok(()),
    }
}
