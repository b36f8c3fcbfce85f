use proptest::prelude::*;
use steward_engine::agent::{parse_reply, AbilityDirective, ConversationState, InstructionSet, ReplyOutcome};
use steward_engine::config::AgentConfig;
use steward_engine::llm::Message;
use steward_engine::tokens::{ContextPolicy, TokenVerdict};

fn prefix() -> InstructionSet {
    InstructionSet::from_messages(vec![
        Message::system("reply in JSON"),
        Message::user("do the task"),
    ])
}

proptest! {
    // Arbitrary model output never panics the parser
    #[test]
    fn test_parse_reply_total(content in ".{0,200}") {
        let _ = parse_reply(&content);
    }

    // Any named object ability with object args is dispatched as-is
    #[test]
    fn test_named_ability_is_invoked(
        name in "[a-z_]{1,16}",
        key in "[a-z]{1,8}",
        value in "[a-zA-Z0-9 ]{0,20}",
    ) {
        let mut args = serde_json::Map::new();
        args.insert(key.clone(), serde_json::Value::from(value.clone()));
        let reply = serde_json::json!({
            "thoughts": {"speak": "ok"},
            "ability": {"name": name.clone(), "args": args}
        });
        match parse_reply(&reply.to_string()) {
            ReplyOutcome::Parsed(parsed) => match parsed.ability {
                AbilityDirective::Invoke { name: got, args: Some(args) } => {
                    prop_assert_eq!(got, name);
                    prop_assert_eq!(args.get(&key).and_then(|v| v.as_str()), Some(value.as_str()));
                }
                other => prop_assert!(false, "unexpected directive {:?}", other),
            },
            other => prop_assert!(false, "unexpected outcome {:?}", other),
        }
    }

    // The transcript never holds two equal messages and never loses its prefix
    #[test]
    fn test_conversation_never_duplicates(contents in prop::collection::vec("[a-c]", 0..40)) {
        let mut conversation = ConversationState::new(prefix(), 3);
        for content in &contents {
            conversation.append(Message::user(content.clone()));

            let messages = conversation.messages();
            let expected_prefix = prefix();
            prop_assert_eq!(&messages[..2], expected_prefix.messages());
            for (i, a) in messages.iter().enumerate() {
                prop_assert!(!messages[i + 1..].contains(a));
            }
            prop_assert!(conversation.repeat_count() < 3);
        }
    }

    // Verdicts only ever escalate as the token count grows
    #[test]
    fn test_policy_monotonic(model in "gpt-4|gpt-3.5-turbo|gpt-3.5-turbo-16k", a in 0usize..20_000, b in 0usize..20_000) {
        let policy = ContextPolicy::for_model(&model, &AgentConfig::default());
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let rank = |v: TokenVerdict| match v {
            TokenVerdict::WithinBudget => 0,
            TokenVerdict::Throttle => 1,
            TokenVerdict::Reset => 2,
        };
        prop_assert!(rank(policy.check(low)) <= rank(policy.check(high)));
    }
}
