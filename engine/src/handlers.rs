//! Command handlers for CLI operations
//!
//! - run: create a task and execute steps until it finishes
//! - history: show the last N tasks
//! - replay: show every step of a task
//! - secret set: store a credential in the keychain
//! - doctor: validate configuration, storage and credentials

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;

use crate::abilities::AbilityRegistry;
use crate::agent::{AgentCore, StepRequest, TaskRequest};
use crate::config::{Config, MemoryBackend};
use crate::db::{Database, Step};
use crate::llm::openai::OpenAIProvider;
use crate::memory::{InMemoryStore, MemoryStore, SqliteMemoryStore};
use crate::secrets::{SecretCache, SecretManager, SERVICE_NAME};
use crate::tokens::{TiktokenEstimator, TokenEstimator};
use crate::workspace::TaskWorkspace;
use sdk::errors::{EngineError, StewardErrorExt};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::new(&config.db_path())
        .await
        .context("Failed to open database")
}

/// Wire the agent from configuration
///
/// Fails early when the API key is missing or the model is unsupported.
pub fn build_agent(config: &Config, database: &Database) -> Result<AgentCore> {
    let secrets = Arc::new(SecretCache::new(Arc::new(SecretManager::new(SERVICE_NAME))));
    secrets
        .preload(&[config.llm.api_key_name.as_str()])
        .map_err(|e| anyhow::anyhow!("{} ({})", e, e.user_hint()))?;

    let memory: Arc<dyn MemoryStore> = match config.memory.backend {
        MemoryBackend::Sqlite => Arc::new(SqliteMemoryStore::new(database.pool().clone())),
        MemoryBackend::InMemory => Arc::new(InMemoryStore::new()),
    };

    let abilities = AbilityRegistry::with_builtins(
        TaskWorkspace::new(&config.core.workspace),
        Arc::clone(&memory),
    );

    let agent = AgentCore::new(
        Arc::new(config.clone()),
        Arc::new(OpenAIProvider::new(config.llm.clone(), secrets)),
        Arc::new(TiktokenEstimator::new()?),
        Arc::new(abilities),
        Arc::new(database.tasks()),
        memory,
    )?;

    Ok(agent)
}

fn print_step(step: &Step, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let marker = if step.is_completed() { "✓" } else { "…" };
            println!(
                "{} Step {} [{}]: {}",
                marker,
                step.index,
                step.status.as_str(),
                step.output.as_deref().unwrap_or("")
            );
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(step)?),
    }
    Ok(())
}

/// Run a task to completion
///
/// Steps run until one is marked last or the step cap is reached. Ctrl-C
/// cancels the session between steps or during a throttle pause.
pub async fn handle_run(
    task: String,
    max_steps: Option<u32>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let database = open_database(config).await?;
    let agent = build_agent(config, &database)?;
    let max_steps = max_steps.unwrap_or(config.agent.max_steps);

    let mut session = agent.create_task(TaskRequest::new(task.clone())).await?;

    let token = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling task");
            token.cancel();
        }
    });

    match format {
        OutputFormat::Text => {
            println!("Executing task {}: {}", session.task_id(), task);
            println!("Expert: {} ({})", session.profile().name, session.profile().expertise);
            println!();
        }
        OutputFormat::Json => {
            let output = json!({
                "status": "running",
                "task_id": session.task_id(),
                "task": task,
            });
            println!("{}", serde_json::to_string(&output)?);
        }
    }

    let mut finished = false;
    let mut steps_run = 0;
    let mut outcome = Ok(());

    while steps_run < max_steps {
        match session.execute_step(StepRequest::default()).await {
            Ok(step) => {
                steps_run += 1;
                print_step(&step, format)?;
                if step.is_last {
                    finished = true;
                    break;
                }
            }
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }

    let cancelled = matches!(
        outcome.as_ref().err().and_then(|e| e.downcast_ref::<EngineError>()),
        Some(EngineError::Cancelled)
    );
    let status = if finished {
        "completed"
    } else if cancelled {
        "cancelled"
    } else if outcome.is_err() {
        "failed"
    } else {
        "incomplete"
    };

    match format {
        OutputFormat::Text => {
            println!();
            match status {
                "completed" => println!("✓ Task completed in {} steps", steps_run),
                "cancelled" => println!("✗ Task cancelled after {} steps", steps_run),
                "failed" => println!("✗ Task failed after {} steps", steps_run),
                _ => println!("✗ Step limit of {} reached before the task finished", max_steps),
            }
            println!("  Resets: {}", session.reset_count());
            println!("  Workspace: {}", agent.workspace().task_dir(session.task_id()).display());
        }
        OutputFormat::Json => {
            let output = json!({
                "status": status,
                "task_id": session.task_id(),
                "steps": steps_run,
                "resets": session.reset_count(),
                "completed_substeps": session.conversation().completed_substeps(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    database.flush_wal().await.ok();
    if cancelled {
        return Ok(());
    }
    outcome
}

/// Show task history
pub async fn handle_history(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;

    let tasks = database
        .tasks()
        .get_recent_tasks(limit as i64)
        .await
        .context("Failed to fetch task history")?;

    match format {
        OutputFormat::Text => {
            if tasks.is_empty() {
                println!("No tasks in history");
                return Ok(());
            }

            println!("Task History (last {} tasks):", limit);
            println!();

            for task in tasks {
                println!("Task ID: {}", task.id);
                println!("  Input: {}", task.input);
                println!("  Status: {}", task.status.as_str());

                let created = chrono::DateTime::from_timestamp(task.created_at, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "Unknown".to_string());
                println!("  Created: {}", created);

                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "tasks": tasks,
                "count": tasks.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Replay a task and show all steps
pub async fn handle_replay(task_id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let tasks = database.tasks();

    let task = tasks
        .get_task(&task_id)
        .await
        .context("Failed to fetch task")?
        .ok_or_else(|| EngineError::TaskNotFound(task_id.clone()))?;

    let steps = tasks
        .get_steps(&task_id)
        .await
        .context("Failed to fetch task steps")?;

    match format {
        OutputFormat::Text => {
            println!("Task Replay: {}", task_id);
            println!();
            println!("Input: {}", task.input);
            println!("Status: {}", task.status.as_str());
            println!();
            println!("Steps ({} total):", steps.len());
            println!();

            for step in &steps {
                print_step(step, format)?;
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "task": task,
                "steps": steps,
                "step_count": steps.len()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Prompt for a secret and store it in the keychain
pub async fn handle_secret_set(key: String, format: OutputFormat) -> Result<()> {
    let manager = SecretManager::new(SERVICE_NAME);
    let key = tokio::task::spawn_blocking(move || manager.prompt_and_store(&key).map(|_| key))
        .await
        .context("Secret prompt panicked")?
        .map_err(|e| anyhow::anyhow!("{} ({})", e, e.user_hint()))?;

    match format {
        OutputFormat::Text => println!("✓ Stored secret '{}'", key),
        OutputFormat::Json => println!("{}", json!({"status": "stored", "key": key})),
    }

    Ok(())
}

/// Validate configuration, storage and credentials
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut checks: Vec<(&str, String)> = Vec::new();
    let mut issues = Vec::new();

    checks.push(("Configuration", "Valid".to_string()));

    if config.core.workspace.is_dir() {
        checks.push(("Workspace directory", "Exists".to_string()));
    } else {
        checks.push(("Workspace directory", "Missing".to_string()));
        issues.push(format!(
            "Workspace directory does not exist: {}",
            config.core.workspace.display()
        ));
    }

    match Database::new(&config.db_path()).await {
        Ok(db) => {
            checks.push(("Database", "OK".to_string()));
            db.close().await.ok();
        }
        Err(e) => {
            checks.push(("Database", "Failed".to_string()));
            issues.push(format!("Cannot open database: {:#}", e));
        }
    }

    let estimator_check = TiktokenEstimator::new().and_then(|e| e.supports(&config.llm.model));
    match estimator_check {
        Ok(()) => checks.push(("Model", config.llm.model.clone())),
        Err(e) => {
            checks.push(("Model", "Unsupported".to_string()));
            issues.push(format!("{} ({})", e, e.user_hint()));
        }
    }

    match SecretManager::new(SERVICE_NAME).get_secret(&config.llm.api_key_name) {
        Ok(_) => checks.push(("API key", "Configured".to_string())),
        Err(e) => {
            checks.push(("API key", "Not configured".to_string()));
            issues.push(format!("{} ({})", e, e.user_hint()));
        }
    }

    match format {
        OutputFormat::Text => {
            println!("Steward Doctor");
            println!();
            for (name, status) in &checks {
                println!("  {:<22} {}", name, status);
            }
            println!();
            if issues.is_empty() {
                println!("✓ No issues found");
            } else {
                println!("✗ {} issue(s) found:", issues.len());
                for issue in &issues {
                    println!("  - {}", issue);
                }
            }
        }
        OutputFormat::Json => {
            let checks: serde_json::Map<String, serde_json::Value> = checks
                .into_iter()
                .map(|(name, status)| (name.to_string(), json!(status)))
                .collect();
            let output = json!({
                "checks": checks,
                "issues": issues,
                "healthy": issues.is_empty(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(temp: &TempDir) -> Config {
        let mut config = Config::default();
        config.core.workspace = temp.path().join("workspace");
        config.core.data_dir = temp.path().join("data");
        config
    }

    #[tokio::test]
    async fn test_history_and_replay_of_stored_task() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);

        let db = open_database(&config).await.unwrap();
        db.tasks().create_task("t1", "list files", None).await.unwrap();
        let mut step = db.tasks().create_step("t1", None, None).await.unwrap();
        step.output = Some("listing".to_string());
        db.tasks().finish_step(&step).await.unwrap();
        db.close().await.unwrap();

        handle_history(5, &config, OutputFormat::Json).await.unwrap();
        handle_replay("t1".to_string(), &config, OutputFormat::Text)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_replay_unknown_task() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);

        let err = handle_replay("missing".to_string(), &config, OutputFormat::Json)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::TaskNotFound(id)) if id == "missing"
        ));
    }

    #[tokio::test]
    async fn test_doctor_reports_without_failing() {
        let temp = TempDir::new().unwrap();
        let mut config = config_in(&temp);
        config.llm.model = "not-a-model".to_string();

        handle_doctor(&config, OutputFormat::Json).await.unwrap();
    }
}
