//! Task session
//!
//! One [`TaskSession`] drives one task. Each call to
//! [`TaskSession::execute_step`] checks the token budget, queries the model,
//! parses the reply, dispatches at most one ability and folds the result
//! back into the conversation. Every model-side failure is absorbed with a
//! corrective message or a conversation reset; the caller always gets a
//! [`Step`] back and recovers by asking for the next one.

use anyhow::Result;
use chrono::Local;
use sdk::{AbilityArgs, AbilityContext};
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::abilities::FINISH;
use crate::db::{Step, StepStatus, Task};
use crate::llm::{CompletionRequest, LLMError, Message};
use crate::tokens::TokenVerdict;
use sdk::errors::EngineError;

use super::conversation::{AppendOutcome, ConversationState, ResetMode};
use super::core::{AgentCore, StepRequest};
use super::instructions::{ExpertProfile, InstructionSet, Planner};
use super::parser::{parse_reply, AbilityDirective, ReplyOutcome};

/// Step output when the reply has nothing to say
const NOTHING_TO_SAY: &str = "Nothing to say...";

fn timestamp() -> String {
    Local::now().format("%m/%d/%Y %H:%M:%S").to_string()
}

pub struct TaskSession {
    core: AgentCore,
    task: Task,
    profile: ExpertProfile,
    conversation: ConversationState,
    cancel: CancellationToken,
    resets: u32,
}

impl TaskSession {
    pub(super) fn new(
        core: AgentCore,
        task: Task,
        profile: ExpertProfile,
        conversation: ConversationState,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            core,
            task,
            profile,
            conversation,
            cancel,
            resets: 0,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task.id
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn profile(&self) -> &ExpertProfile {
        &self.profile
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    /// Conversation resets so far, from any cause
    pub fn reset_count(&self) -> u32 {
        self.resets
    }

    /// Stop the session; pending waits and later steps fail with `Cancelled`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one step of the task.
    ///
    /// # Errors
    /// Only persistence failures, an unsupported model and cancellation.
    /// Model, parse and ability failures are folded into the conversation
    /// and the step is returned with status `running`.
    pub async fn execute_step(&mut self, request: StepRequest) -> Result<Step> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled.into());
        }

        let mut step = self
            .core
            .tasks
            .create_step(
                &self.task.id,
                request.input.as_deref(),
                request.additional_input.as_ref(),
            )
            .await?;
        info!("Task {} step {}", self.task.id, step.index);

        self.check_tokens().await?;

        match self.query_model().await? {
            Ok(content) => self.handle_reply(&mut step, &content).await?,
            Err(e) => {
                error!("LLM call failed on step {}: {}", step.index, e);
                if matches!(e, LLMError::RateLimitExceeded) {
                    warn!("Rate limit hit after retries");
                }
                info!("Resetting conversation and resending instructions");
                self.hard_reset(ResetMode::Summarize).await?;
            }
        }

        if step.is_last {
            debug!("Final conversation:\n{:#?}", self.conversation.messages());
        }

        self.core.tasks.finish_step(&step).await?;
        Ok(step)
    }

    async fn check_tokens(&mut self) -> Result<()> {
        let model = &self.core.config.llm.model;
        let tokens = self.core.estimator.estimate(self.conversation.messages(), model)?;
        info!("Total token amount: {}", tokens);

        match self.core.policy.check(tokens) {
            TokenVerdict::WithinBudget => {}
            TokenVerdict::Reset => {
                info!(
                    "Token limit of {} reached, resetting conversation",
                    self.core.policy.limit.unwrap_or_default()
                );
                self.hard_reset(ResetMode::Clean).await?;
            }
            TokenVerdict::Throttle => {
                let pause = Duration::from_secs(self.core.config.agent.throttle_secs);
                info!("Token amount high, waiting {:?} to stay under rate limits", pause);
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(EngineError::Cancelled.into()),
                    _ = sleep(pause) => {}
                }
                info!("Continuing...");
            }
        }

        Ok(())
    }

    /// Outer error is cancellation; inner error is an absorbed model failure
    async fn query_model(&self) -> Result<std::result::Result<String, LLMError>> {
        let request = CompletionRequest::new(
            self.conversation.messages().to_vec(),
            self.core.config.llm.model.clone(),
            self.core.config.llm.step_temperature,
        );

        let completion = tokio::select! {
            _ = self.cancel.cancelled() => return Err(EngineError::Cancelled.into()),
            result = timeout(self.core.call_timeout(), self.core.provider.complete(&request)) => result,
        };

        Ok(match completion {
            Ok(Ok(completion)) => completion
                .first_content()
                .map(str::to_string)
                .ok_or_else(|| LLMError::ParseError("reply has no content".to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(LLMError::Timeout),
        })
    }

    async fn handle_reply(&mut self, step: &mut Step, content: &str) -> Result<()> {
        let ts = timestamp();

        match parse_reply(content) {
            ReplyOutcome::Malformed(err) => {
                error!("Reply is not valid JSON, ignoring it: {}", err);
                debug!("Raw reply: {}", content);
                info!("Resetting conversation and resending instructions");
                self.hard_reset(ResetMode::Summarize).await?;
                self.append(Message::user(format!(
                    "[{}] Your reply was not in the correct JSON format. Reply with a single JSON object.",
                    ts
                )))
                .await
            }
            ReplyOutcome::MissingKeys(missing) => {
                self.append(Message::assistant(content)).await?;
                error!("Reply is missing keys: {}", missing.join(", "));
                self.append(Message::user(format!(
                    "[{}] Your reply was not in the correct JSON format. Missing keys: {}",
                    ts,
                    missing.join(", ")
                )))
                .await
            }
            ReplyOutcome::Parsed(reply) => {
                self.append(Message::assistant(content)).await?;

                let output = reply.speak.unwrap_or_else(|| NOTHING_TO_SAY.to_string());
                info!("Step {} output: {}", step.index, output);
                step.output = Some(output);

                if let Some(done) = reply.step_completed {
                    self.conversation.record_completed(done);
                }

                self.dispatch(step, reply.ability, &ts).await
            }
        }
    }

    async fn dispatch(
        &mut self,
        step: &mut Step,
        directive: AbilityDirective,
        ts: &str,
    ) -> Result<()> {
        match directive {
            AbilityDirective::None => {
                debug!("No ability requested");
                Ok(())
            }
            AbilityDirective::Unnamed => {
                info!("No ability name found");
                self.append(Message::user(format!(
                    "[{}] You stated an ability without a name. Please include the name of the ability you want to use",
                    ts
                )))
                .await
            }
            AbilityDirective::Invalid(found) => {
                info!("Not an ability: {}", found);
                self.append(Message::user(format!(
                    "[{}] You didn't state a correct ability. You must use a real ability but if not using any set ability to None or a blank string.",
                    ts
                )))
                .await
            }
            AbilityDirective::BadArguments { name, found } => {
                warn!("Ability {} called with non-object args {}", name, found);
                self.append(Message::system(format!(
                    "[{}] Ability {} error: args must be a JSON object, got {}",
                    ts, name, found
                )))
                .await
            }
            AbilityDirective::Invoke { name, args } => self.invoke(step, &name, args, ts).await,
        }
    }

    async fn invoke(
        &mut self,
        step: &mut Step,
        name: &str,
        args: Option<AbilityArgs>,
        ts: &str,
    ) -> Result<()> {
        info!("Running ability {}", name);
        let ctx = AbilityContext::new(&self.task.id, self.core.workspace.task_dir(&self.task.id));
        let no_args = AbilityArgs::new();

        let output = match self
            .core
            .abilities
            .invoke(name, &ctx, args.as_ref().unwrap_or(&no_args))
            .await
        {
            Ok(output) => output.into_text(),
            Err(e) => {
                error!("Ability run failed: {}", e);
                return self
                    .append(Message::system(format!("[{}] Ability {} error: {}", ts, name, e)))
                    .await;
            }
        };
        info!("Ability output\n{}", output);

        let content = match &args {
            Some(args) => format!(
                "[Arguments {}]: {}",
                serde_json::to_string(args).unwrap_or_default(),
                output
            ),
            None => output,
        };
        self.append(Message::function(name, content)).await?;
        step.status = StepStatus::Completed;

        if name == FINISH {
            step.is_last = true;
            self.archive().await;
        }
        Ok(())
    }

    async fn archive(&self) {
        if let Err(e) = self.core.workspace.archive(&self.task.id).await {
            warn!("Failed to archive task {}: {}", self.task.id, e);
        }
    }

    /// Append to the conversation, resetting it when a repeat loop is detected
    async fn append(&mut self, message: Message) -> Result<()> {
        if self.conversation.append(message) == AppendOutcome::LoopDetected {
            info!("Resetting conversation to break the repeat loop");
            self.hard_reset(ResetMode::Clean).await?;
        }
        Ok(())
    }

    /// Replace the conversation with a freshly planned instruction prefix.
    ///
    /// The completed sub-steps are handed to the planner so the new plan
    /// picks up where the old one stopped. Cancellation interrupts the
    /// planner call and leaves the conversation as it was.
    async fn hard_reset(&mut self, mode: ResetMode) -> Result<()> {
        let catalogue = self.core.abilities.catalogue();
        let planner = Planner::new(self.core.planning_client());

        let plan = tokio::select! {
            _ = self.cancel.cancelled() => return Err(EngineError::Cancelled.into()),
            plan = planner.plan(
                &self.task.input,
                &catalogue,
                self.conversation.completed_substeps(),
            ) => plan,
        };

        let instructions = InstructionSet::build(&catalogue, &self.profile, &self.task.input, &plan);
        self.conversation.reset(instructions, mode);
        self.resets += 1;
        Ok(())
    }
}
