//! Instruction prefix
//!
//! Every task attempt starts from the same four messages: reply-format
//! rules, the ability catalogue, the expert role and the task with its plan.
//! The role comes from [`ProfileGenerator`] and the plan from [`Planner`];
//! both are model calls whose failures degrade to defaults.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::parser::extract_json_object;
use super::prompts::Template;
use crate::llm::{CompletionRequest, LLMProvider, Message};

/// Attempts at getting a well-formed profile before using the default
const PROFILE_ATTEMPTS: usize = 3;

/// Ordered (role, content) messages that open every conversation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstructionSet {
    messages: Vec<Message>,
}

impl InstructionSet {
    /// Reformat rules, catalogue, role statement, task directive
    pub fn build(catalogue: &str, profile: &ExpertProfile, task: &str, plan: &str) -> Self {
        let plan = if plan.trim().is_empty() {
            "No plan is available. Decide the steps yourself."
        } else {
            plan.trim()
        };

        Self {
            messages: vec![
                Message::system(Template::SystemReformat.render(&[])),
                Message::system(Template::AbilitiesList.render(&[("abilities", catalogue)])),
                Message::system(Template::RoleStatement.render(&[
                    ("name", &profile.name),
                    ("expertise", &profile.expertise),
                ])),
                Message::user(Template::StepDirective.render(&[("task", task), ("plan", plan)])),
            ],
        }
    }

    /// Arbitrary prefix, for callers that bring their own prompts
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Persona the model is asked to adopt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertProfile {
    pub name: String,
    pub expertise: String,
}

impl Default for ExpertProfile {
    fn default() -> Self {
        Self {
            name: "Generalist".to_string(),
            expertise: "Project Manager".to_string(),
        }
    }
}

/// Shared settings for the planning-time model calls
#[derive(Clone)]
pub struct PlanningClient {
    provider: Arc<dyn LLMProvider>,
    model: String,
    temperature: f32,
    call_timeout: Duration,
}

impl PlanningClient {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
        temperature: f32,
        call_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
            call_timeout,
        }
    }

    async fn ask(&self, messages: Vec<Message>) -> Result<String, String> {
        let request = CompletionRequest::new(messages, self.model.clone(), self.temperature);

        match timeout(self.call_timeout, self.provider.complete(&request)).await {
            Ok(Ok(completion)) => completion
                .first_content()
                .map(str::to_string)
                .ok_or_else(|| "empty completion".to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.call_timeout)),
        }
    }
}

/// Asks the model which expert should handle the task
pub struct ProfileGenerator {
    client: PlanningClient,
}

impl ProfileGenerator {
    pub fn new(client: PlanningClient) -> Self {
        Self { client }
    }

    /// Never fails; falls back to [`ExpertProfile::default`]
    pub async fn generate(&self, task: &str) -> ExpertProfile {
        info!("Generating expert profile");
        let prompt = Template::RoleFind.render(&[("task", task)]);

        for attempt in 1..=PROFILE_ATTEMPTS {
            let reply = match self.client.ask(vec![Message::user(prompt.clone())]).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("Profile attempt {}/{} failed: {}", attempt, PROFILE_ATTEMPTS, e);
                    continue;
                }
            };

            let profile = extract_json_object(&reply)
                .and_then(|json| serde_json::from_str::<ExpertProfile>(json).ok());
            match profile {
                Some(profile) => {
                    info!("Profile generated: {} ({})", profile.name, profile.expertise);
                    return profile;
                }
                None => debug!("Profile attempt {} returned malformed JSON", attempt),
            }
        }

        let fallback = ExpertProfile::default();
        warn!(
            "Using default profile {} ({})",
            fallback.name, fallback.expertise
        );
        fallback
    }
}

/// Asks the model for a step plan
pub struct Planner {
    client: PlanningClient,
}

impl Planner {
    pub fn new(client: PlanningClient) -> Self {
        Self { client }
    }

    /// Numbered plan text, or "" when the model call fails.
    ///
    /// A non-empty `completed` log means an earlier attempt was reset; the
    /// finished steps are handed back so the new plan builds on them.
    pub async fn plan(&self, task: &str, catalogue: &str, completed: &[String]) -> String {
        let mut messages = vec![
            Message::system(Template::AbilitiesList.render(&[("abilities", catalogue)])),
            Message::system("You are a professional Project Manager."),
            Message::user(Template::GetSteps.render(&[("task", task)])),
        ];

        if !completed.is_empty() {
            messages.push(Message::user(format!(
                "There was an error with the last plan. Please make a new plan. \
                 Here were the last steps attempted which will help you plan better:\n{}",
                completed.join("\n")
            )));
        }

        info!("Generating step plan");
        match self.client.ask(messages).await {
            Ok(plan) => {
                debug!("Planned steps:\n{}", plan);
                plan
            }
            Err(e) => {
                error!("Plan generation failed: {}", e);
                String::new()
            }
        }
    }
}
