//! Integration tests for configuration loading
//!
//! Verifies TOML parsing, defaults for omitted sections, validation errors
//! and directory creation.

use sdk::errors::EngineError;
use steward_engine::config::{Config, MemoryBackend};
use steward_engine::tokens::{ContextPolicy, TokenVerdict};
use tempfile::TempDir;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    let header = format!(
        "[core]\nworkspace = {:?}\ndata_dir = {:?}\n",
        dir.path().join("workspace"),
        dir.path().join("data"),
    );
    std::fs::write(&path, format!("{}{}", header, body)).unwrap();
    path
}

#[test]
fn test_full_config_loads() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"log_level = "debug"

[llm]
base_url = "http://localhost:8080/v1/"
model = "gpt-4"
api_key_name = "team_key"
timeout_secs = 60
max_attempts = 5
step_temperature = 0.5
planning_temperature = 0.7

[agent]
repeat_threshold = 4
throttle_secs = 2
soft_warn_tokens = 4000
context_limit = 6000
max_steps = 12

[memory]
backend = "in_memory"
"#,
    );

    let config = Config::load(Some(&path)).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.llm.base_url, "http://localhost:8080/v1");
    assert_eq!(config.llm.api_key_name, "team_key");
    assert_eq!(config.llm.max_attempts, 5);
    assert_eq!(config.agent.repeat_threshold, 4);
    assert_eq!(config.agent.max_steps, 12);
    assert_eq!(config.memory.backend, MemoryBackend::InMemory);
    assert!(config.core.workspace.is_dir());
    assert!(config.core.data_dir.is_dir());

    let policy = ContextPolicy::for_model(&config.llm.model, &config.agent);
    assert_eq!(policy.limit, Some(6000));
    assert_eq!(policy.check(4500), TokenVerdict::Throttle);
    assert_eq!(policy.check(6000), TokenVerdict::Reset);
}

#[test]
fn test_minimal_config_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "\n[llm]\n");

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.llm.model, "gpt-3.5-turbo");
    assert_eq!(config.llm.timeout_secs, 300);
    assert_eq!(config.agent.throttle_secs, 10);
    assert_eq!(config.memory.backend, MemoryBackend::Sqlite);
    assert_eq!(config.db_path(), config.core.data_dir.join("steward.db"));
}

#[test]
fn test_invalid_values_rejected() {
    let cases = [
        "log_level = \"loud\"\n[llm]\n",
        "\n[llm]\nmax_attempts = 0\n",
        "\n[llm]\nstep_temperature = 3.5\n",
        "\n[llm]\n[agent]\nrepeat_threshold = 0\n",
        "\n[llm]\n[agent]\nsoft_warn_tokens = 9000\ncontext_limit = 8000\n",
    ];

    for body in cases {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, body);
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)), "accepted: {}", body);
    }
}

#[test]
fn test_unknown_backend_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "\n[llm]\n[memory]\nbackend = \"weaviate\"\n");
    assert!(matches!(
        Config::load(Some(&path)),
        Err(EngineError::Config(msg)) if msg.contains("parse")
    ));
}
