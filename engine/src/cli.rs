//! CLI interface for Steward
//!
//! Command-line surface built with clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Steward task agent
///
/// Plans a task with a language model, then works through it step by step
/// using abilities scoped to a per-task workspace.
#[derive(Parser, Debug)]
#[command(name = "steward")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a task and run steps until it finishes
    Run {
        /// The task to execute
        task: String,

        /// Stop after this many steps (default: agent.max_steps)
        #[arg(long, value_name = "N")]
        max_steps: Option<u32>,
    },

    /// Show task history
    History {
        /// Number of tasks to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Replay and show all steps for a task
    Replay {
        /// Task ID to replay
        task_id: String,
    },

    /// Manage stored secrets
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },

    /// Check configuration, storage and credentials
    Doctor,
}

#[derive(Subcommand, Debug)]
pub enum SecretAction {
    /// Read a secret without echo and store it in the keychain
    Set {
        /// Secret name, e.g. openai_api_key
        key: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["steward", "--json", "--log", "debug", "doctor"]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
        assert!(cli.config.is_none());
        assert!(matches!(cli.command, Command::Doctor));
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from(["steward", "run", "list files in the workspace"]);
        match cli.command {
            Command::Run { task, max_steps } => {
                assert_eq!(task, "list files in the workspace");
                assert_eq!(max_steps, None);
            }
            other => panic!("Expected Run command, got {:?}", other),
        }

        let cli = Cli::parse_from(["steward", "run", "go", "--max-steps", "5"]);
        assert!(matches!(cli.command, Command::Run { max_steps: Some(5), .. }));
    }

    #[test]
    fn test_history_command() {
        let cli = Cli::parse_from(["steward", "history", "--limit", "20"]);
        assert!(matches!(cli.command, Command::History { limit: 20 }));

        let cli = Cli::parse_from(["steward", "history"]);
        assert!(matches!(cli.command, Command::History { limit: 10 }));
    }

    #[test]
    fn test_secret_set() {
        let cli = Cli::parse_from(["steward", "--config", "/tmp/c.toml", "secret", "set", "openai_api_key"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        match cli.command {
            Command::Secret {
                action: SecretAction::Set { key },
            } => assert_eq!(key, "openai_api_key"),
            other => panic!("Expected Secret command, got {:?}", other),
        }
    }

    #[test]
    fn test_replay_requires_task_id() {
        assert!(Cli::try_parse_from(["steward", "replay"]).is_err());
    }
}
