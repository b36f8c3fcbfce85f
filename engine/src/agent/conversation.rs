//! Conversation state for one task attempt
//!
//! Owns the transcript sent to the model, the instruction prefix it always
//! starts with, the repeat counter that detects duplicate loops and the log
//! of sub-steps the model reported as done. All mutation goes through
//! [`ConversationState::append`], [`ConversationState::reset`] and
//! [`ConversationState::record_completed`].

use tracing::{debug, info, warn};

use super::instructions::InstructionSet;
use super::parser::thoughts_of;
use crate::llm::{Message, MessageRole};

/// How much of the old transcript survives a reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Instruction prefix only
    Clean,
    /// Instruction prefix plus a note carrying the last thought and ability result
    Summarize,
}

/// Effect of one append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Already in the transcript; only the repeat counter moved
    Duplicate,
    /// Duplicate that hit the threshold; the caller must reset
    LoopDetected,
}

#[derive(Debug, Clone)]
pub struct ConversationState {
    messages: Vec<Message>,
    instructions: InstructionSet,
    repeat_count: u32,
    repeat_threshold: u32,
    completed: Vec<String>,
}

impl ConversationState {
    /// Fresh transcript holding only `instructions`
    pub fn new(instructions: InstructionSet, repeat_threshold: u32) -> Self {
        let messages = instructions.messages().to_vec();
        Self {
            messages,
            instructions,
            repeat_count: 0,
            repeat_threshold: repeat_threshold.max(1),
            completed: Vec::new(),
        }
    }

    /// Append unless an equal message is already present.
    ///
    /// Duplicates bump the repeat counter. At the threshold the counter is
    /// cleared and [`AppendOutcome::LoopDetected`] is returned; the transcript
    /// is left untouched so the owner can rebuild the instructions.
    pub fn append(&mut self, message: Message) -> AppendOutcome {
        if !self.messages.contains(&message) {
            self.messages.push(message);
            self.repeat_count = 0;
            return AppendOutcome::Appended;
        }

        self.repeat_count += 1;
        debug!(
            "Duplicate {} message ({}/{})",
            message.role(),
            self.repeat_count,
            self.repeat_threshold
        );

        if self.repeat_count >= self.repeat_threshold {
            warn!("Stuck in a repeat loop");
            self.repeat_count = 0;
            return AppendOutcome::LoopDetected;
        }

        AppendOutcome::Duplicate
    }

    /// Replace the transcript with `instructions`.
    ///
    /// In [`ResetMode::Summarize`] the old transcript is scanned backward for
    /// the last assistant thoughts and the last ability result, and a user
    /// note carrying them is appended after the prefix.
    pub fn reset(&mut self, instructions: InstructionSet, mode: ResetMode) {
        let summary = match mode {
            ResetMode::Clean => None,
            ResetMode::Summarize => self.continuity_note(),
        };

        info!(
            "Resetting conversation ({} messages dropped, mode {:?})",
            self.messages.len(),
            mode
        );

        self.instructions = instructions;
        self.messages = self.instructions.messages().to_vec();
        self.repeat_count = 0;

        if let Some(note) = summary {
            self.messages.push(Message::user(note));
        }
    }

    fn continuity_note(&self) -> Option<String> {
        let last_thoughts = self
            .messages
            .iter()
            .rev()
            .filter(|m| m.role() == MessageRole::Assistant)
            .find_map(|m| thoughts_of(m.content()));

        let last_ability = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role() == MessageRole::Function)
            .map(|m| m.content().to_string());

        if last_thoughts.is_none() && last_ability.is_none() {
            return None;
        }

        Some(format!(
            "Error caused chat reset. Your last thought was\n'{}'\nYour last ability used was\n'{}'",
            last_thoughts.as_deref().unwrap_or("none"),
            last_ability.as_deref().unwrap_or("none"),
        ))
    }

    /// Record a sub-step the model reported as finished
    pub fn record_completed(&mut self, step: impl Into<String>) {
        self.completed.push(step.into());
        debug!("Steps completed: {:?}", self.completed);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn instructions(&self) -> &InstructionSet {
        &self.instructions
    }

    /// Messages after the instruction prefix
    pub fn tail(&self) -> &[Message] {
        &self.messages[self.instructions.len().min(self.messages.len())..]
    }

    pub fn repeat_count(&self) -> u32 {
        self.repeat_count
    }

    pub fn completed_substeps(&self) -> &[String] {
        &self.completed
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
