//! Built-in prompt templates
//!
//! Templates use `{placeholder}` substitution. Unknown placeholders are left
//! in place so a missing value is visible in the transcript.

use std::collections::HashMap;

const SYSTEM_REFORMAT: &str = r#"You are an autonomous agent working through a task one step at a time.
Reply ONLY with a single JSON object in this exact shape, with no text before or after it:

{
    "thoughts": {
        "text": "what you are thinking",
        "reasoning": "why",
        "plan": "short bulleted plan",
        "criticism": "constructive self-criticism",
        "speak": "summary of this step to say to the user",
        "step completed": "the plan step you just finished, or null"
    },
    "ability": {
        "name": "ability name",
        "args": {
            "arg name": "value"
        }
    }
}

Use exactly one ability per reply. When the task is complete, use the "finish" ability."#;

const ABILITIES_LIST: &str = r#"You have access to the following abilities:

{abilities}

Only use these abilities, with arguments as listed."#;

const ROLE_STATEMENT: &str =
    "You are {name}, an expert in {expertise}. Use that expertise to complete the task efficiently.";

const STEP_DIRECTIVE: &str = r#"Your task is:

{task}

Follow this plan, using one ability per step:

{plan}

Reply with your first step in the required JSON format."#;

const GET_STEPS: &str = r#"Create a short numbered plan to complete the following task using only the listed abilities. Keep each step to one ability call and end with the finish ability.

Task: {task}"#;

const ROLE_FIND: &str = r#"Pick the expert best suited to complete the following task.
Reply ONLY with JSON in the form {"name": "expert name", "expertise": "field of expertise"}.

Task: {task}"#;

/// Names of the built-in templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    SystemReformat,
    AbilitiesList,
    RoleStatement,
    StepDirective,
    GetSteps,
    RoleFind,
}

impl Template {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SystemReformat => "system-reformat",
            Self::AbilitiesList => "abilities-list",
            Self::RoleStatement => "role-statement",
            Self::StepDirective => "step-directive",
            Self::GetSteps => "get-steps",
            Self::RoleFind => "role-find",
        }
    }

    fn source(&self) -> &'static str {
        match self {
            Self::SystemReformat => SYSTEM_REFORMAT,
            Self::AbilitiesList => ABILITIES_LIST,
            Self::RoleStatement => ROLE_STATEMENT,
            Self::StepDirective => STEP_DIRECTIVE,
            Self::GetSteps => GET_STEPS,
            Self::RoleFind => ROLE_FIND,
        }
    }

    /// Render with `{key}` placeholders replaced by `vars`
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        let vars: HashMap<&str, &str> = vars.iter().copied().collect();
        substitute(self.source(), &vars)
    }
}

fn substitute(source: &str, vars: &HashMap<&str, &str>) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder(&after[..close]) => {
                let key = &after[..close];
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn is_placeholder(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_role_statement() {
        let text = Template::RoleStatement.render(&[("name", "Ada"), ("expertise", "data")]);
        assert_eq!(
            text,
            "You are Ada, an expert in data. Use that expertise to complete the task efficiently."
        );
    }

    #[test]
    fn test_json_braces_survive_rendering() {
        let text = Template::SystemReformat.render(&[]);
        assert!(text.contains("\"thoughts\": {"));
        assert!(text.contains("\"step completed\""));
    }

    #[test]
    fn test_missing_placeholder_kept() {
        let text = Template::StepDirective.render(&[("task", "list files")]);
        assert!(text.contains("list files"));
        assert!(text.contains("{plan}"));
    }

    #[test]
    fn test_template_names() {
        assert_eq!(Template::GetSteps.name(), "get-steps");
        assert_eq!(Template::RoleFind.name(), "role-find");
    }
}
