pub mod cache;
pub mod string;

pub use cache::SecretCache;
pub use string::SecretString;

use keyring::Entry;
use regex::Regex;
use sdk::errors::EngineError;
use std::sync::OnceLock;

/// Keychain service the engine stores its secrets under
pub const SERVICE_NAME: &str = "steward";

/// Secret lookup backed by the OS keychain.
///
/// Lookups are non-interactive: an environment override `STEWARD_<KEY>`
/// wins, then the keychain entry under the manager's service name. A
/// missing secret is a configuration error; `steward secret set` is the
/// interactive path for storing one.
pub struct SecretManager {
    service_name: String,
}

/// Patterns for common credential formats, compiled once.
static SECRET_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn get_secret_patterns() -> &'static Vec<Regex> {
    SECRET_PATTERNS.get_or_init(|| {
        vec![
            // OpenAI keys, including sk-proj- and similar prefixes
            Regex::new(r"sk-[a-zA-Z0-9\-_]{20,}").expect("Invalid OpenAI pattern"),
            Regex::new(r"AIza[0-9A-Za-z\-_]{35}").expect("Invalid Google pattern"),
            Regex::new(r"ghp_[a-zA-Z0-9]{36}").expect("Invalid GitHub pattern"),
            Regex::new(r"Bearer\s+[^\s]{20,}").expect("Invalid Bearer pattern"),
        ]
    })
}

/// Environment variable consulted before the keychain for `key`.
pub fn env_override_name(key: &str) -> String {
    format!("STEWARD_{}", key.to_uppercase())
}

impl SecretManager {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Looks up a secret without prompting.
    ///
    /// # Errors
    /// `EngineError::MissingCredential` when neither the environment nor the
    /// keychain holds the key, `EngineError::KeyringError` when the keychain
    /// itself fails.
    pub fn get_secret(&self, key: &str) -> Result<String, EngineError> {
        if let Ok(value) = std::env::var(env_override_name(key)) {
            if !value.trim().is_empty() {
                tracing::debug!("Using secret '{}' from environment", key);
                return Ok(value.trim().to_string());
            }
        }

        let entry = Entry::new(&self.service_name, key).map_err(|e| {
            EngineError::KeyringError(format!("Failed to create keyring entry: {}", e))
        })?;

        match entry.get_password() {
            Ok(secret) => {
                tracing::debug!("Retrieved secret '{}' from keychain", key);
                Ok(secret)
            }
            Err(keyring::Error::NoEntry) => Err(EngineError::MissingCredential(key.to_string())),
            Err(e) => Err(EngineError::KeyringError(format!(
                "Failed to retrieve secret '{}': {}",
                key, e
            ))),
        }
    }

    /// Stores a secret in the OS keychain.
    pub fn set_secret(&self, key: &str, value: &str) -> Result<(), EngineError> {
        if value.trim().is_empty() {
            return Err(EngineError::KeyringError(
                "Secret cannot be empty".to_string(),
            ));
        }

        let entry = Entry::new(&self.service_name, key).map_err(|e| {
            EngineError::KeyringError(format!("Failed to create keyring entry: {}", e))
        })?;

        entry.set_password(value.trim()).map_err(|e| {
            EngineError::KeyringError(format!("Failed to store secret '{}': {}", key, e))
        })?;

        tracing::info!("Stored secret '{}' in keychain", key);
        Ok(())
    }

    /// Reads a secret from the terminal without echo and stores it.
    pub fn prompt_and_store(&self, key: &str) -> Result<(), EngineError> {
        let value = rpassword::prompt_password_stderr(&format!("Enter value for '{}': ", key))
            .map_err(|e| EngineError::KeyringError(format!("Failed to read input: {}", e)))?;
        self.set_secret(key, &value)
    }

    /// Replaces credential-shaped substrings with `[REDACTED]`.
    ///
    /// # Examples
    /// ```
    /// use steward_engine::secrets::SecretManager;
    ///
    /// let manager = SecretManager::new("test");
    /// let scrubbed = manager.scrub("key sk-1234567890abcdefghij rejected");
    /// assert_eq!(scrubbed, "key [REDACTED] rejected");
    /// ```
    pub fn scrub(&self, text: &str) -> String {
        scrub(text)
    }
}

/// Free-function form of [`SecretManager::scrub`] for call sites without a manager.
pub fn scrub(text: &str) -> String {
    get_secret_patterns()
        .iter()
        .fold(text.to_string(), |acc, pattern| {
            pattern.replace_all(&acc, "[REDACTED]").into_owned()
        })
}
