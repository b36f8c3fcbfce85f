//! Model reply parsing
//!
//! One function, [`parse_reply`], turns raw reply text into a
//! [`ReplyOutcome`] that the step loop matches on exhaustively.

use sdk::AbilityArgs;
use serde_json::{Map, Value};

/// Keys every reply object must carry
pub const REQUIRED_KEYS: [&str; 2] = ["thoughts", "ability"];

/// Result of interpreting one reply
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    Parsed(ParsedReply),
    /// Valid JSON object without some required keys (listed in order)
    MissingKeys(Vec<String>),
    /// Not a JSON object at all
    Malformed(String),
}

/// A well-formed reply
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    /// `thoughts.speak`, when present
    pub speak: Option<String>,
    /// `thoughts."step completed"`, unless null or "None"
    pub step_completed: Option<String>,
    pub ability: AbilityDirective,
}

/// What the reply asks the loop to run
#[derive(Debug, Clone, PartialEq)]
pub enum AbilityDirective {
    /// null, "" or "None": nothing to dispatch
    None,
    /// Object whose name is missing, null, "" or "None"
    Unnamed,
    /// Neither an object nor one of the no-op values
    Invalid(String),
    /// Named ability whose `args` is not an object
    BadArguments { name: String, found: String },
    Invoke {
        name: String,
        args: Option<AbilityArgs>,
    },
}

/// Parse raw reply content.
///
/// The JSON may be bare, inside a markdown fence, or embedded in prose.
pub fn parse_reply(content: &str) -> ReplyOutcome {
    let candidate = extract_json_object(content).unwrap_or_else(|| content.trim());

    let value: Value = match serde_json::from_str(candidate) {
        Ok(value) => value,
        Err(e) => return ReplyOutcome::Malformed(e.to_string()),
    };

    let Value::Object(reply) = value else {
        return ReplyOutcome::Malformed("reply is not a JSON object".to_string());
    };

    let missing: Vec<String> = REQUIRED_KEYS
        .iter()
        .filter(|key| !reply.contains_key(**key))
        .map(|key| key.to_string())
        .collect();
    if !missing.is_empty() {
        return ReplyOutcome::MissingKeys(missing);
    }

    let thoughts = reply.get("thoughts").and_then(Value::as_object);

    let speak = thoughts
        .and_then(|t| t.get("speak"))
        .map(value_to_text);

    let step_completed = thoughts
        .and_then(|t| t.get("step completed"))
        .filter(|v| !is_none_marker(v))
        .map(value_to_text);

    let ability = reply
        .get("ability")
        .map(parse_ability)
        .unwrap_or(AbilityDirective::None);

    ReplyOutcome::Parsed(ParsedReply {
        speak,
        step_completed,
        ability,
    })
}

fn parse_ability(value: &Value) -> AbilityDirective {
    match value {
        Value::Null => AbilityDirective::None,
        Value::String(s) if s.is_empty() || s == "None" => AbilityDirective::None,
        Value::Object(ability) => parse_invocation(ability),
        other => AbilityDirective::Invalid(other.to_string()),
    }
}

fn parse_invocation(ability: &Map<String, Value>) -> AbilityDirective {
    let name = match ability.get("name") {
        Some(Value::String(name)) if !name.is_empty() && name != "None" => name.clone(),
        _ => return AbilityDirective::Unnamed,
    };

    match ability.get("args") {
        None | Some(Value::Null) => AbilityDirective::Invoke { name, args: None },
        Some(Value::Object(args)) => AbilityDirective::Invoke {
            name,
            args: Some(args.clone()),
        },
        Some(other) => AbilityDirective::BadArguments {
            name,
            found: other.to_string(),
        },
    }
}

fn is_none_marker(value: &Value) -> bool {
    matches!(value, Value::Null) || value.as_str() == Some("None")
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `thoughts` of an assistant reply as compact JSON, if the reply has one.
pub fn thoughts_of(content: &str) -> Option<String> {
    let candidate = extract_json_object(content)?;
    let value: Value = serde_json::from_str(candidate).ok()?;
    value.get("thoughts").map(|t| t.to_string())
}

/// Locate the JSON object inside a reply.
///
/// Tries, in order: the whole trimmed text, the first markdown fence, and
/// the first balanced `{...}` span.
pub fn extract_json_object(content: &str) -> Option<&str> {
    let trimmed = content.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    if let Some(inner) = extract_fenced(trimmed) {
        let inner = inner.trim();
        if inner.starts_with('{') {
            return Some(inner);
        }
    }

    let start = trimmed.find('{')?;
    extract_balanced(&trimmed[start..])
}

/// Body of the first ``` fence, skipping the language tag line
fn extract_fenced(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    let body_start = fence_start + 3 + after_opening.find('\n')? + 1;
    let body_end = body_start + content[body_start..].find("```")?;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Span from the opening brace at index 0 to its matching close brace
fn extract_balanced(s: &str) -> Option<&str> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(content: &str) -> ParsedReply {
        match parse_reply(content) {
            ReplyOutcome::Parsed(reply) => reply,
            other => panic!("expected parsed reply, got {:?}", other),
        }
    }

    #[test]
    fn test_full_reply() {
        let reply = parsed(
            r#"{"thoughts":{"speak":"listing","step completed":"plan"},"ability":{"name":"list_files","args":{"path":"."}}}"#,
        );
        assert_eq!(reply.speak.as_deref(), Some("listing"));
        assert_eq!(reply.step_completed.as_deref(), Some("plan"));
        match reply.ability {
            AbilityDirective::Invoke { name, args } => {
                assert_eq!(name, "list_files");
                assert_eq!(args.unwrap()["path"], ".");
            }
            other => panic!("unexpected directive {:?}", other),
        }
    }

    #[test]
    fn test_not_json_is_malformed() {
        assert!(matches!(
            parse_reply("I will list the files now."),
            ReplyOutcome::Malformed(_)
        ));
        assert!(matches!(parse_reply("[1, 2]"), ReplyOutcome::Malformed(_)));
    }

    #[test]
    fn test_missing_keys_listed() {
        assert_eq!(
            parse_reply(r#"{"thoughts": {}}"#),
            ReplyOutcome::MissingKeys(vec!["ability".to_string()])
        );
        assert_eq!(
            parse_reply(r#"{"answer": 42}"#),
            ReplyOutcome::MissingKeys(vec!["thoughts".to_string(), "ability".to_string()])
        );
    }

    #[test]
    fn test_noop_abilities() {
        for ability in ["null", "\"\"", "\"None\""] {
            let reply = parsed(&format!(r#"{{"thoughts":{{}},"ability":{}}}"#, ability));
            assert_eq!(reply.ability, AbilityDirective::None);
        }
    }

    #[test]
    fn test_unnamed_ability() {
        for ability in [r#"{"args":{}}"#, r#"{"name":""}"#, r#"{"name":"None"}"#, r#"{"name":null}"#] {
            let reply = parsed(&format!(r#"{{"thoughts":{{}},"ability":{}}}"#, ability));
            assert_eq!(reply.ability, AbilityDirective::Unnamed);
        }
    }

    #[test]
    fn test_invalid_ability_and_args() {
        let reply = parsed(r#"{"thoughts":{},"ability":"list_files"}"#);
        assert!(matches!(reply.ability, AbilityDirective::Invalid(_)));

        let reply = parsed(r#"{"thoughts":{},"ability":{"name":"read_file","args":["a"]}}"#);
        assert!(matches!(reply.ability, AbilityDirective::BadArguments { .. }));
    }

    #[test]
    fn test_step_completed_none_markers() {
        let reply = parsed(r#"{"thoughts":{"step completed":"None"},"ability":null}"#);
        assert_eq!(reply.step_completed, None);
        let reply = parsed(r#"{"thoughts":{"step completed":null},"ability":null}"#);
        assert_eq!(reply.step_completed, None);
        let reply = parsed(r#"{"thoughts":{"speak":"hi"},"ability":null}"#);
        assert_eq!(reply.step_completed, None);
    }

    #[test]
    fn test_fenced_and_embedded_json() {
        let fenced = "Here you go:\n```json\n{\"thoughts\":{\"speak\":\"a\"},\"ability\":null}\n```\nthanks";
        assert_eq!(parsed(fenced).speak.as_deref(), Some("a"));

        let embedded = "Sure! {\"thoughts\":{\"speak\":\"b {x}\"},\"ability\":null} done";
        assert_eq!(parsed(embedded).speak.as_deref(), Some("b {x}"));
    }

    #[test]
    fn test_thoughts_of() {
        assert_eq!(
            thoughts_of(r#"{"thoughts":{"speak":"X"}}"#).as_deref(),
            Some(r#"{"speak":"X"}"#)
        );
        assert_eq!(thoughts_of("plain text"), None);
    }
}
