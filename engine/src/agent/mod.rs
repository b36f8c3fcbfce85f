//! Agent loop
//!
//! [`AgentCore`] creates tasks; each [`TaskSession`] runs its task one step
//! at a time over a [`ConversationState`] that is reset whenever the model
//! fails, the reply is unusable or the context budget runs out.

pub mod conversation;
pub mod core;
pub mod instructions;
pub mod parser;
pub mod prompts;
pub mod session;

pub use conversation::{AppendOutcome, ConversationState, ResetMode};
pub use self::core::{AgentCore, StepRequest, TaskRequest};
pub use instructions::{ExpertProfile, InstructionSet, Planner, PlanningClient, ProfileGenerator};
pub use parser::{parse_reply, AbilityDirective, ParsedReply, ReplyOutcome};
pub use session::TaskSession;
