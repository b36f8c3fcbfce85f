//! Agent Core
//!
//! [`AgentCore`] holds the collaborators shared by every task: the model
//! provider, the token estimator, the ability registry, persistence and the
//! document memory. All of them are read-only after start-up, so one core
//! can hand out any number of [`TaskSession`]s running side by side.
//!
//! Creating a task:
//!
//! 1. Persist the task record
//! 2. Create the task's workspace directory
//! 3. Ask the model for an expert profile and a step plan
//! 4. Build the instruction prefix and seed the conversation

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::abilities::AbilityRegistry;
use crate::config::Config;
use crate::db::TaskRepository;
use crate::llm::LLMProvider;
use crate::memory::{MemoryStore, Metadata};
use crate::tokens::{ContextPolicy, TokenEstimator};
use crate::workspace::TaskWorkspace;
use sdk::errors::EngineError;

use super::conversation::ConversationState;
use super::instructions::{InstructionSet, PlanningClient, Planner, ProfileGenerator};
use super::session::TaskSession;

/// Characters of task input shown in logs
const INPUT_PREVIEW: usize = 40;

/// Request to start a task
#[derive(Debug, Clone, Default)]
pub struct TaskRequest {
    pub input: String,
    pub additional_input: Option<Value>,
}

impl TaskRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            additional_input: None,
        }
    }
}

/// Request to run one more step of a task
#[derive(Debug, Clone, Default)]
pub struct StepRequest {
    pub input: Option<String>,
    pub additional_input: Option<Value>,
}

fn preview(input: &str) -> String {
    if input.chars().count() > INPUT_PREVIEW {
        format!("{}...", input.chars().take(INPUT_PREVIEW).collect::<String>())
    } else {
        input.to_string()
    }
}

/// Shared, read-only agent collaborators
#[derive(Clone)]
pub struct AgentCore {
    pub(super) config: Arc<Config>,
    pub(super) provider: Arc<dyn LLMProvider>,
    pub(super) estimator: Arc<dyn TokenEstimator>,
    pub(super) abilities: Arc<AbilityRegistry>,
    pub(super) tasks: Arc<TaskRepository>,
    pub(super) memory: Arc<dyn MemoryStore>,
    pub(super) workspace: TaskWorkspace,
    pub(super) policy: ContextPolicy,
    shutdown: CancellationToken,
}

impl AgentCore {
    /// Create a new agent core
    ///
    /// # Errors
    /// `EngineError::UnsupportedModel` when the configured model cannot be
    /// token-counted; this is a configuration defect, not a runtime failure.
    pub fn new(
        config: Arc<Config>,
        provider: Arc<dyn LLMProvider>,
        estimator: Arc<dyn TokenEstimator>,
        abilities: Arc<AbilityRegistry>,
        tasks: Arc<TaskRepository>,
        memory: Arc<dyn MemoryStore>,
    ) -> Result<Self, EngineError> {
        estimator.supports(&config.llm.model)?;

        let policy = ContextPolicy::for_model(&config.llm.model, &config.agent);
        info!(
            "Agent using {} via {} (context limit {:?}, soft-warn {:?})",
            config.llm.model,
            provider.name(),
            policy.limit,
            policy.soft_warn
        );

        Ok(Self {
            workspace: TaskWorkspace::new(&config.core.workspace),
            config,
            provider,
            estimator,
            abilities,
            tasks,
            memory,
            policy,
            shutdown: CancellationToken::new(),
        })
    }

    /// Start a task and return the session that runs its steps
    pub async fn create_task(&self, request: TaskRequest) -> Result<TaskSession> {
        if self.shutdown.is_cancelled() {
            return Err(EngineError::Cancelled.into());
        }

        let task_id = Uuid::new_v4().to_string();
        let task = self
            .tasks
            .create_task(&task_id, &request.input, request.additional_input.as_ref())
            .await
            .context("Failed to create task in database")?;
        info!("Task created: {} input: {}", task.id, preview(&task.input));

        self.workspace
            .ensure(&task.id)
            .await
            .context("Failed to create task workspace")?;

        let mut metadata = Metadata::new();
        metadata.insert("role".to_string(), Value::from("user"));
        metadata.insert("type".to_string(), Value::from("task"));
        if let Err(e) = self.memory.add(&task.id, &task.input, metadata).await {
            warn!("Failed to store task input in memory: {}", e);
        }

        let client = self.planning_client();
        let profile = ProfileGenerator::new(client.clone())
            .generate(&task.input)
            .await;

        let catalogue = self.abilities.catalogue();
        let plan = Planner::new(client).plan(&task.input, &catalogue, &[]).await;

        let instructions = InstructionSet::build(&catalogue, &profile, &task.input, &plan);
        let conversation = ConversationState::new(instructions, self.config.agent.repeat_threshold);

        Ok(TaskSession::new(
            self.clone(),
            task,
            profile,
            conversation,
            self.shutdown.child_token(),
        ))
    }

    pub(super) fn planning_client(&self) -> PlanningClient {
        PlanningClient::new(
            Arc::clone(&self.provider),
            self.config.llm.model.clone(),
            self.config.llm.planning_temperature,
            self.call_timeout(),
        )
    }

    pub(super) fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.config.llm.timeout_secs)
    }

    /// Cancel every session created from this core
    pub fn shutdown(&self) {
        info!("Shutting down agent");
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tasks(&self) -> &TaskRepository {
        &self.tasks
    }

    pub fn abilities(&self) -> &AbilityRegistry {
        &self.abilities
    }

    pub fn workspace(&self) -> &TaskWorkspace {
        &self.workspace
    }

    pub fn context_policy(&self) -> ContextPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(50);
        assert_eq!(preview(&long), format!("{}...", "x".repeat(40)));
    }
}
