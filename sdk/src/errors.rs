//! Error types and handling
//!
//! Errors in this module are the fatal surface of the engine: configuration
//! defects, persistence failures and cancellation. Failures that the agent
//! loop recovers from on its own (transport, malformed replies, ability
//! errors) never reach this type.
//!
//! Every variant implements [`StewardErrorExt`], which provides a hint that
//! is safe to print and a recoverability flag.

use thiserror::Error;

/// Extension trait for Steward errors
pub trait StewardErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint never contains secrets, file paths or model output.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried. Non-recoverable errors require the
    /// user to fix the configuration or environment first.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, StewardErrorExt};
///
/// let error = EngineError::UnsupportedModel("davinci".to_string());
/// assert!(!error.is_recoverable());
/// println!("Hint: {}", error.user_hint());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    // Keyring errors
    #[error("Keyring error: {0}")]
    KeyringError(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    // Agent loop errors
    #[error("Task cancelled")]
    Cancelled,

    #[error("Ability not found: {0}")]
    AbilityNotFound(String),

    // Workspace errors
    #[error("Path denied: {0:?}")]
    PathDenied(std::path::PathBuf),

    #[error("Path outside workspace: {0:?}")]
    PathOutsideWorkspace(std::path::PathBuf),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StewardErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::UnsupportedModel(_) => {
                "The configured model is not supported. Use a gpt-3.5-turbo or gpt-4 model"
            }
            Self::MissingCredential(_) => {
                "API key not found. Run 'steward secret set <key>' or set the environment variable"
            }
            Self::KeyringError(_) => "Failed to access secure storage. Check system keychain",

            Self::Database(_) => "Database operation failed. Check the data directory",
            Self::TaskNotFound(_) => "No task with that id. Run 'steward history' to list tasks",

            Self::Cancelled => "The task was cancelled",
            Self::AbilityNotFound(_) => "The requested ability is not available",

            Self::PathDenied(_) => "Access to this path is not allowed",
            Self::PathOutsideWorkspace(_) => "Operation must be within the task workspace",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Configuration defects need a user fix before anything can run
            Self::Config(_)
            | Self::UnsupportedModel(_)
            | Self::MissingCredential(_)
            | Self::KeyringError(_) => false,

            _ => true,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}
