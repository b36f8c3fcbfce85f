//! LLM client abstraction
//!
//! The agent talks to the model through [`LLMProvider::complete`]: send an
//! ordered list of role-tagged messages, get back a chat completion or an
//! [`LLMError`]. Every error variant is a transport failure from the agent's
//! point of view and is absorbed by a conversation reset.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod openai;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl LLMError {
    /// Whether another attempt may succeed without changing the request
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimitExceeded | Self::NetworkError(_))
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    /// Ability result; always carries the ability name
    Function,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Function => write!(f, "function"),
        }
    }
}

/// One turn in the conversation
///
/// `name` is present exactly when the role is [`MessageRole::Function`];
/// the constructors are the only way to build a message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash)]
pub struct Message {
    role: MessageRole,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::Assistant, content)
    }

    /// Result of the named ability
    pub fn function(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Function,
            content: content.into(),
            name: Some(name.into()),
        }
    }

    fn plain(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Input to one completion call
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            messages,
            model: model.into(),
            temperature,
        }
    }
}

/// Message inside a completion choice
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Choice {
    pub message: ReplyMessage,
}

/// Structured reply of the chat-completion API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletion {
    pub choices: Vec<Choice>,
}

impl ChatCompletion {
    /// Reply with a single assistant choice
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                message: ReplyMessage {
                    role: "assistant".to_string(),
                    content: Some(content.into()),
                },
            }],
        }
    }

    /// Content of the first choice, if any
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
    }
}

/// Chat-completion provider
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Send the messages and return the model's reply
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatCompletion>;
}
