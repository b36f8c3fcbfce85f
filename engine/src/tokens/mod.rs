//! Token budget
//!
//! [`TiktokenEstimator`] reproduces the chat-format accounting of the GPT
//! model families: a fixed overhead per message, the encoded length of every
//! field, an adjustment per named message and three tokens of reply priming.
//! [`ContextPolicy`] turns a count into a verdict for the agent loop.

use crate::config::AgentConfig;
use crate::llm::Message;
use sdk::errors::EngineError;
use tiktoken_rs::CoreBPE;

/// Tokens the API adds to prime the assistant reply
const REPLY_PRIMING: i64 = 3;

/// Counts the tokens a conversation costs for a model
pub trait TokenEstimator: Send + Sync {
    /// # Errors
    /// `EngineError::UnsupportedModel` for model ids the estimator cannot
    /// account for.
    fn estimate(&self, messages: &[Message], model: &str) -> Result<usize, EngineError>;

    /// Fails with `UnsupportedModel` when `model` cannot be estimated
    fn supports(&self, model: &str) -> Result<(), EngineError> {
        self.estimate(&[], model).map(|_| ())
    }
}

/// Per-message accounting constants of a concrete model revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChatOverhead {
    per_message: i64,
    per_name: i64,
}

/// Overheads for concrete revisions only
fn concrete_overhead(model: &str) -> Option<ChatOverhead> {
    match model {
        "gpt-3.5-turbo-0613" | "gpt-3.5-turbo-16k-0613" | "gpt-4-0314" | "gpt-4-32k-0314"
        | "gpt-4-0613" | "gpt-4-32k-0613" => Some(ChatOverhead {
            per_message: 3,
            per_name: 1,
        }),
        // every message follows <|start|>{role/name}\n{content}<|end|>\n
        "gpt-3.5-turbo-0301" => Some(ChatOverhead {
            per_message: 4,
            per_name: -1,
        }),
        _ => None,
    }
}

/// Resolve a model id, following at most one family alias.
fn resolve_overhead(model: &str) -> Result<ChatOverhead, EngineError> {
    if let Some(overhead) = concrete_overhead(model) {
        return Ok(overhead);
    }

    let alias = if model.contains("gpt-3.5-turbo") {
        "gpt-3.5-turbo-0613"
    } else if model.contains("gpt-4") {
        "gpt-4-0613"
    } else {
        return Err(EngineError::UnsupportedModel(model.to_string()));
    };

    tracing::trace!("Resolving token accounting for {} as {}", model, alias);
    concrete_overhead(alias).ok_or_else(|| EngineError::UnsupportedModel(model.to_string()))
}

/// Estimator backed by the cl100k_base subword tokenizer
pub struct TiktokenEstimator {
    bpe: CoreBPE,
}

impl TiktokenEstimator {
    pub fn new() -> Result<Self, EngineError> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| EngineError::Config(format!("Failed to load tokenizer: {}", e)))?;
        Ok(Self { bpe })
    }

    fn encoded_len(&self, text: &str) -> i64 {
        self.bpe.encode_with_special_tokens(text).len() as i64
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, messages: &[Message], model: &str) -> Result<usize, EngineError> {
        let overhead = resolve_overhead(model)?;

        let mut total = REPLY_PRIMING;
        for message in messages {
            total += overhead.per_message;
            total += self.encoded_len(&message.role().to_string());
            total += self.encoded_len(message.content());
            if let Some(name) = message.name() {
                total += self.encoded_len(name);
                total += overhead.per_name;
            }
        }

        Ok(total.max(0) as usize)
    }
}

/// What the loop should do with the current token count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVerdict {
    WithinBudget,
    /// Pause before querying to stay under upstream rate limits
    Throttle,
    /// Replace the conversation before querying
    Reset,
}

/// Hard limit and soft-warn threshold for one model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextPolicy {
    pub limit: Option<usize>,
    pub soft_warn: Option<usize>,
}

impl ContextPolicy {
    /// Family table, with `[agent]` overrides applied on top.
    ///
    /// | family | limit | soft-warn |
    /// |---|---|---|
    /// | gpt-3.5-turbo | 4096 | - |
    /// | gpt-4 | 8192 | 5000 |
    /// | gpt-3.5-turbo-16k | 16384 | - |
    ///
    /// Other models have no limit unless configured.
    pub fn for_model(model: &str, config: &AgentConfig) -> Self {
        let (limit, soft_warn) = if model.starts_with("gpt-3.5-turbo-16k") {
            (Some(16_384), None)
        } else if model.starts_with("gpt-3.5-turbo") {
            (Some(4_096), None)
        } else if model.starts_with("gpt-4") && !model.contains("32k") {
            (Some(8_192), Some(5_000))
        } else {
            (None, None)
        };

        Self {
            limit: config.context_limit.or(limit),
            soft_warn: config.soft_warn_tokens.or(soft_warn),
        }
    }

    /// At or above the limit resets; at or above soft-warn throttles.
    pub fn check(&self, tokens: usize) -> TokenVerdict {
        if self.limit.is_some_and(|limit| tokens >= limit) {
            TokenVerdict::Reset
        } else if self.soft_warn.is_some_and(|soft| tokens >= soft) {
            TokenVerdict::Throttle
        } else {
            TokenVerdict::WithinBudget
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_resolution() {
        assert_eq!(
            resolve_overhead("gpt-3.5-turbo").unwrap(),
            resolve_overhead("gpt-3.5-turbo-0613").unwrap()
        );
        assert_eq!(
            resolve_overhead("gpt-4").unwrap(),
            resolve_overhead("gpt-4-0613").unwrap()
        );
        assert_eq!(resolve_overhead("gpt-3.5-turbo-0301").unwrap().per_message, 4);
    }

    #[test]
    fn test_unsupported_model() {
        let err = resolve_overhead("text-davinci-003").unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedModel(m) if m == "text-davinci-003"));
    }

    #[test]
    fn test_empty_conversation_costs_priming() {
        let estimator = TiktokenEstimator::new().unwrap();
        assert_eq!(estimator.estimate(&[], "gpt-4").unwrap(), 3);
    }

    #[test]
    fn test_message_overhead_structure() {
        let estimator = TiktokenEstimator::new().unwrap();
        let content = "list the files in the workspace";
        let role_len = estimator.encoded_len("user");
        let content_len = estimator.encoded_len(content);

        let count = estimator
            .estimate(&[Message::user(content)], "gpt-3.5-turbo")
            .unwrap() as i64;
        assert_eq!(count, 3 + 3 + role_len + content_len);
    }

    #[test]
    fn test_named_message_adds_name_tokens() {
        let estimator = TiktokenEstimator::new().unwrap();
        let plain = estimator
            .estimate(&[Message::user("a.txt")], "gpt-4")
            .unwrap() as i64;
        let named = estimator
            .estimate(&[Message::function("list_files", "a.txt")], "gpt-4")
            .unwrap() as i64;

        let role_delta = estimator.encoded_len("function") - estimator.encoded_len("user");
        let name_cost = estimator.encoded_len("list_files") + 1;
        assert_eq!(named - plain, role_delta + name_cost);
    }

    #[test]
    fn test_policy_families() {
        let config = AgentConfig::default();
        assert_eq!(ContextPolicy::for_model("gpt-3.5-turbo", &config).limit, Some(4096));
        assert_eq!(
            ContextPolicy::for_model("gpt-3.5-turbo-16k", &config).limit,
            Some(16384)
        );
        let gpt4 = ContextPolicy::for_model("gpt-4", &config);
        assert_eq!(gpt4.limit, Some(8192));
        assert_eq!(gpt4.soft_warn, Some(5000));
        assert_eq!(ContextPolicy::for_model("local-model", &config).limit, None);
    }

    #[test]
    fn test_policy_overrides() {
        let config = AgentConfig {
            context_limit: Some(100),
            soft_warn_tokens: Some(50),
            ..AgentConfig::default()
        };
        let policy = ContextPolicy::for_model("gpt-3.5-turbo", &config);
        assert_eq!(policy.check(49), TokenVerdict::WithinBudget);
        assert_eq!(policy.check(50), TokenVerdict::Throttle);
        assert_eq!(policy.check(100), TokenVerdict::Reset);
    }

    #[test]
    fn test_check_boundaries() {
        let policy = ContextPolicy::for_model("gpt-4", &AgentConfig::default());
        assert_eq!(policy.check(4999), TokenVerdict::WithinBudget);
        assert_eq!(policy.check(5000), TokenVerdict::Throttle);
        assert_eq!(policy.check(8191), TokenVerdict::Throttle);
        assert_eq!(policy.check(8192), TokenVerdict::Reset);
    }
}
